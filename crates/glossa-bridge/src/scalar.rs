//! Single-code-point parameter validation
//!
//! Native functions that take a `char` argument receive it as a `u32` scalar
//! value; the host side hands us a string. [`extract_code_point`] validates
//! that the string is exactly one Unicode scalar and extracts it. Counting
//! is by code point, not by encoded length, so a four-byte astral-plane
//! character is one code point and passes.

use crate::error::{BridgeError, BridgeResult};

/// Extract the single Unicode code point from `value`
///
/// `param` names the parameter in diagnostics; the offending string is
/// echoed in the error message so boundary bugs are traceable from the
/// failure alone.
///
/// # Example
///
/// ```
/// use glossa_bridge::scalar::extract_code_point;
///
/// assert_eq!(extract_code_point("A", "ch").unwrap(), 65);
/// assert_eq!(extract_code_point("𝄞", "ch").unwrap(), 0x1D11E);
/// assert!(extract_code_point("ab", "ch").is_err());
/// ```
pub fn extract_code_point(value: &str, param: &str) -> BridgeResult<u32> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c as u32),
        _ => Err(BridgeError::Type {
            param: param.to_string(),
            value: value.to_string(),
            msg: "expected a single Unicode code point".to_string(),
        }),
    }
}
