//! Bridge configuration
//!
//! Small set of tunables loaded from a `glossa.toml`:
//!
//! ```toml
//! writeable_capacity_hint = 64
//! max_alloc_bytes = 1048576
//! ```
//!
//! Defaults preserve the bare-bridge behavior: writeables start at capacity
//! 0 and no allocation ceiling is enforced.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Bridge tunables
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BridgeConfig {
    /// Initial capacity passed to `writeable_create` by
    /// [`crate::writeable::with_writeable_cfg`]
    pub writeable_capacity_hint: u32,

    /// Ceiling for host-initiated buffer allocations, checked before the
    /// native allocator is called; `None` disables the guard
    pub max_alloc_bytes: Option<u32>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            writeable_capacity_hint: 0,
            max_alloc_bytes: None,
        }
    }
}

impl BridgeConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
