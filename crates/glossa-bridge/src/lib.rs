//! Glossa Bridge - host-side FFI glue for a sandboxed locale module
//!
//! This library marshals between host values and the linear memory of a
//! wasm-style native module exposing Unicode locale primitives (locale
//! canonicalization and expansion live in the module; nothing here knows
//! anything about locales). It provides:
//! - Primitive memory reads and UTF-8 string decoding ([`memory`])
//! - Return-buffer decoding: flags, discriminants, pointers ([`decode`])
//! - Scoped use of the native growable-output protocol ([`writeable`])
//! - Host-owned native allocations with explicit, borrow-aware release
//!   ([`buffer`])
//! - Single-code-point parameter validation ([`scalar`])
//!
//! The native module sits behind the [`module::WasmModule`] trait; the
//! in-process [`module::MemModule`] documents the expected ABI and drives
//! the test suites.

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod buffer;
pub mod config;
pub mod decode;
pub mod error;
pub mod memory;
pub mod module;
pub mod scalar;
pub mod writeable;

// Re-export commonly used types
pub use buffer::{BufferId, BufferRegistry, OwnedBuffer};
pub use config::{BridgeConfig, ConfigError, ConfigResult};
pub use decode::{enum_discriminant, ptr_read, result_flag};
pub use error::{BridgeError, BridgeResult, ErrorPayload, FfiError, MemoryError};
pub use memory::{read_bytes, read_str};
pub use module::{MemModule, WasmModule};
pub use scalar::extract_code_point;
pub use writeable::{with_writeable, with_writeable_cfg, with_writeable_hint};
