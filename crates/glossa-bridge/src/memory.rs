//! Primitive reads out of the module's linear memory
//!
//! Every function here performs a fresh read through [`WasmModule`] — no
//! decoded view is ever cached across calls. A native allocation between two
//! reads may grow or relocate the region, so the address/length pair must be
//! obtained immediately before the read that uses it.
//!
//! Multi-byte values are little-endian, the linear-memory convention of the
//! sandboxed module format.

use crate::error::{BridgeError, BridgeResult};
use crate::module::WasmModule;

/// Read `len` raw bytes at `addr`
pub fn read_bytes(module: &dyn WasmModule, addr: u32, len: u32) -> BridgeResult<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    module.read(addr, &mut buf)?;
    Ok(buf)
}

/// Decode the `len` bytes at `addr` as a UTF-8 string
///
/// Propagates a decoding error if the bytes are not valid UTF-8; that means
/// either a native-side bug or a mismatched addr/len pair, and is never
/// retried.
pub fn read_str(module: &dyn WasmModule, addr: u32, len: u32) -> BridgeResult<String> {
    let bytes = read_bytes(module, addr, len)?;
    String::from_utf8(bytes).map_err(|e| BridgeError::InvalidUtf8 {
        addr,
        len,
        source: e.utf8_error(),
    })
}

/// Read a single byte at `addr`
pub fn read_u8(module: &dyn WasmModule, addr: u32) -> BridgeResult<u8> {
    let mut buf = [0u8; 1];
    module.read(addr, &mut buf)?;
    Ok(buf[0])
}

/// Read a 4-byte unsigned little-endian value at `addr`
pub fn read_u32(module: &dyn WasmModule, addr: u32) -> BridgeResult<u32> {
    let mut buf = [0u8; 4];
    module.read(addr, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a 4-byte signed little-endian value at `addr`
pub fn read_i32(module: &dyn WasmModule, addr: u32) -> BridgeResult<i32> {
    let mut buf = [0u8; 4];
    module.read(addr, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}
