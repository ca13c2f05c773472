//! Return-buffer accessors
//!
//! A native call that returns a `Result`-shaped value writes it into a
//! scratch region: a flag byte (success/failure discriminant) at a known
//! offset, optionally followed by a 4-byte signed enum discriminant and/or a
//! 4-byte pointer whose value is itself an address into linear memory.
//!
//! The three accessors here are stateless building blocks; the caller
//! composes them according to the specific function's declared layout. Each
//! one re-reads through the module on every call, so a reallocation between
//! two calls (a fresh native allocation growing the region) can never leave
//! a stale view behind.

use crate::error::{BridgeResult, MemoryError};
use crate::memory;
use crate::module::WasmModule;

/// Read the 4-byte unsigned value at `addr`, interpreted as a pointer
pub fn ptr_read(module: &dyn WasmModule, addr: u32) -> BridgeResult<u32> {
    memory::read_u32(module, addr)
}

/// Read the flag byte at `addr + offset`; nonzero means success
pub fn result_flag(module: &dyn WasmModule, addr: u32, offset: u32) -> BridgeResult<bool> {
    let at = addr.checked_add(offset).ok_or(MemoryError::OutOfBounds {
        addr,
        len: 1,
        size: module.memory_size(),
    })?;
    Ok(memory::read_u8(module, at)? != 0)
}

/// Read the 4-byte signed value at `addr`, interpreted as an enum tag
pub fn enum_discriminant(module: &dyn WasmModule, addr: u32) -> BridgeResult<i32> {
    memory::read_i32(module, addr)
}
