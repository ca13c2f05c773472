//! Error taxonomy for the bridge boundary
//!
//! Three failure families cross this layer (plus one that deliberately does
//! not):
//! - Validation errors (`BridgeError::Type`): malformed host-side parameters,
//!   raised before any native call happens.
//! - Native-reported errors (`BridgeError::Ffi`): the module signalled
//!   failure through its own return convention; the payload is relayed
//!   verbatim and never interpreted here.
//! - Decoding errors (`BridgeError::InvalidUtf8`, `BridgeError::Memory`):
//!   the bytes read back from linear memory were not what the layout
//!   promised.
//! - Resource-management bugs (double free) are *not* errors: they are
//!   logged and suppressed in [`crate::buffer`], so they can never mask an
//!   already-successful release.

use thiserror::Error;

/// Result alias used throughout the bridge
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Opaque native error payload, stored unexamined
///
/// The native module reports errors in whatever shape its generated ABI
/// declares for the failing operation. Call sites pick the matching variant;
/// the bridge never looks inside.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// A bare enum discriminant read from the return buffer
    Discriminant(i32),
    /// A message string decoded from native memory
    Text(String),
    /// A structured value for ABIs that report richer error objects
    Structured(serde_json::Value),
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorPayload::Discriminant(tag) => write!(f, "discriminant {}", tag),
            ErrorPayload::Text(msg) => write!(f, "{}", msg),
            ErrorPayload::Structured(value) => write!(f, "{}", value),
        }
    }
}

/// A failure reported by the native module through its return convention
///
/// Construction always succeeds; the payload lives under the stable
/// `payload` field so callers can branch on its structure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("native module reported an error: {payload}")]
pub struct FfiError {
    /// The native-reported payload, verbatim
    pub payload: ErrorPayload,
}

impl FfiError {
    /// Wrap an opaque native payload
    pub fn new(payload: ErrorPayload) -> Self {
        Self { payload }
    }

    /// Wrap a bare enum discriminant
    pub fn discriminant(tag: i32) -> Self {
        Self::new(ErrorPayload::Discriminant(tag))
    }

    /// Wrap a message string decoded from native memory
    pub fn text(msg: impl Into<String>) -> Self {
        Self::new(ErrorPayload::Text(msg.into()))
    }

    /// Wrap a structured error value
    pub fn structured(value: serde_json::Value) -> Self {
        Self::new(ErrorPayload::Structured(value))
    }
}

/// Failures at the linear-memory boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MemoryError {
    /// Access past the end of the module's linear memory
    #[error("memory access out of bounds: addr={addr} len={len} (memory size {size})")]
    OutOfBounds { addr: u32, len: u32, size: u32 },

    /// The native allocator refused the request (or a configured guard did)
    #[error("native allocation failed: size={size} align={align}")]
    AllocFailed { size: u32, align: u32 },

    /// A writeable handle the module does not recognize
    #[error("unknown writeable handle: {0}")]
    BadWriteable(u32),
}

/// Crate-wide error type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Host-side parameter validation failure
    #[error("type error: parameter `{param}` {msg} (got {value:?})")]
    Type {
        param: String,
        value: String,
        msg: String,
    },

    /// Native-reported failure, relayed opaquely
    #[error(transparent)]
    Ffi(#[from] FfiError),

    /// Bytes read from native memory were not valid UTF-8
    ///
    /// Indicates a native-side bug or a mismatched addr/len pair; never
    /// retried.
    #[error("invalid UTF-8 in native memory at addr={addr} len={len}: {source}")]
    InvalidUtf8 {
        addr: u32,
        len: u32,
        source: std::str::Utf8Error,
    },

    /// Linear-memory boundary failure
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffi_error_construction_always_succeeds() {
        let err = FfiError::discriminant(3);
        assert_eq!(err.payload, ErrorPayload::Discriminant(3));

        let err = FfiError::text("bad subtag");
        assert_eq!(err.payload, ErrorPayload::Text("bad subtag".to_string()));

        let err = FfiError::structured(serde_json::json!({ "kind": "parse", "offset": 4 }));
        assert!(matches!(err.payload, ErrorPayload::Structured(_)));
    }

    #[test]
    fn test_ffi_error_payload_is_relayed_verbatim() {
        // The bridge never normalizes or rewrites the payload.
        let payload = ErrorPayload::Structured(serde_json::json!([1, 2, 3]));
        let err = FfiError::new(payload.clone());
        assert_eq!(err.payload, payload);
    }

    #[test]
    fn test_type_error_message_names_param_and_value() {
        let err = BridgeError::Type {
            param: "code_point".to_string(),
            value: "ab".to_string(),
            msg: "expected a single Unicode code point".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("code_point"));
        assert!(rendered.contains("\"ab\""));
    }

    #[test]
    fn test_memory_error_converts_into_bridge_error() {
        let err: BridgeError = MemoryError::AllocFailed { size: 8, align: 4 }.into();
        assert!(matches!(
            err,
            BridgeError::Memory(MemoryError::AllocFailed { size: 8, align: 4 })
        ));
    }

    #[test]
    fn test_ffi_error_display_includes_payload() {
        let err = BridgeError::Ffi(FfiError::text("locale parse failed"));
        assert!(err.to_string().contains("locale parse failed"));
    }

    #[test]
    fn test_out_of_bounds_display() {
        let err = MemoryError::OutOfBounds {
            addr: 100,
            len: 8,
            size: 64,
        };
        assert_eq!(
            err.to_string(),
            "memory access out of bounds: addr=100 len=8 (memory size 64)"
        );
    }
}
