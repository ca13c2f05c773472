//! The native-module boundary
//!
//! [`WasmModule`] is the seam between the bridge and the sandboxed module:
//! an allocator, raw linear-memory access, and the writeable (growable
//! output buffer) protocol. The bridge never touches guest memory except
//! through these methods, which means every access goes against the
//! *current* memory — there is no view object that could go stale when an
//! allocation grows or relocates the region.
//!
//! [`MemModule`] is an in-process reference implementation backed by a plain
//! byte arena. It exists to document the ABI contract and to let tests drive
//! the full marshal/call/decode cycle without a compiled module; its
//! instrumentation counters record every allocator and writeable call.
//!
//! All methods take `&self`: execution is single-threaded and cooperative,
//! and implementations use interior mutability.

use crate::error::MemoryError;
use log::trace;
use std::cell::RefCell;
use std::collections::HashMap;

/// Boundary trait for a loaded native module instance
pub trait WasmModule {
    /// Allocate `size` bytes at `align` in linear memory, returning the address
    fn alloc(&self, size: u32, align: u32) -> Result<u32, MemoryError>;

    /// Release an allocation previously returned by [`WasmModule::alloc`]
    ///
    /// The caller supplies the same (addr, size, align) triple the
    /// allocation was made with.
    fn dealloc(&self, addr: u32, size: u32, align: u32);

    /// Copy `buf.len()` bytes out of linear memory starting at `addr`
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `bytes` into linear memory starting at `addr`
    fn write(&self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError>;

    /// Create a native-owned growable output buffer
    fn writeable_create(&self, capacity_hint: u32) -> Result<u32, MemoryError>;

    /// Address of the writeable's current byte storage
    ///
    /// Only valid until the next append; callers must re-query after any
    /// native call that may have written to the handle.
    fn writeable_ptr(&self, handle: u32) -> Result<u32, MemoryError>;

    /// Current byte length of the writeable's contents
    fn writeable_len(&self, handle: u32) -> Result<u32, MemoryError>;

    /// Destroy a writeable handle, releasing its native storage
    fn writeable_destroy(&self, handle: u32);

    /// Current size of linear memory in bytes
    fn memory_size(&self) -> u32;
}

/// A writeable's backing storage inside the arena
#[derive(Debug, Clone, Copy)]
struct WriteableBuf {
    addr: u32,
    len: u32,
    cap: u32,
}

#[derive(Debug, Default)]
struct Instrumentation {
    alloc_calls: u32,
    dealloc_calls: u32,
    destroy_calls: u32,
    /// Every (addr, size, align) triple passed to `dealloc`
    deallocs: Vec<(u32, u32, u32)>,
}

#[derive(Debug)]
struct MemInner {
    memory: Vec<u8>,
    /// Bump pointer; the arena never reclaims, which keeps addresses stable
    /// and lets tests observe exactly what was written where.
    next: u32,
    writeables: HashMap<u32, WriteableBuf>,
    next_handle: u32,
    stats: Instrumentation,
}

/// In-process reference module backed by a byte arena
///
/// Behaves like a loaded wasm module from the bridge's point of view:
/// allocations can grow the memory (so previously derived addresses stay
/// valid but any cached view of the region would not), and writeables
/// relocate their storage when appends outgrow capacity.
///
/// # Example
///
/// ```
/// use glossa_bridge::module::{MemModule, WasmModule};
///
/// let module = MemModule::new();
/// let addr = module.alloc(4, 4).unwrap();
/// module.write(addr, &[0, 1, 2, 3]).unwrap();
///
/// let mut buf = [0u8; 4];
/// module.read(addr, &mut buf).unwrap();
/// assert_eq!(buf, [0, 1, 2, 3]);
/// ```
#[derive(Debug)]
pub struct MemModule {
    inner: RefCell<MemInner>,
}

/// Addresses below this are never handed out, so 0 stays unused (null-like)
const ARENA_BASE: u32 = 8;

const INITIAL_MEMORY: usize = 1024;

impl MemModule {
    /// Create a module with a small initial memory
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(MemInner {
                memory: vec![0; INITIAL_MEMORY],
                next: ARENA_BASE,
                writeables: HashMap::new(),
                next_handle: 1,
                stats: Instrumentation::default(),
            }),
        }
    }

    /// Grow linear memory by `extra` zero bytes
    ///
    /// Lets tests simulate the region growth a native allocation can trigger
    /// between two bridge reads.
    pub fn grow(&self, extra: u32) {
        let mut inner = self.inner.borrow_mut();
        let new_len = inner.memory.len() + extra as usize;
        inner.memory.resize(new_len, 0);
    }

    /// Append bytes to a writeable, standing in for the native side's output
    ///
    /// Relocates (and may grow memory for) the writeable's storage when the
    /// append outgrows its capacity, exactly the situation that invalidates
    /// a previously queried `writeable_ptr`.
    pub fn writeable_append(&self, handle: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let mut inner = self.inner.borrow_mut();
        let mut buf = match inner.writeables.get(&handle) {
            Some(buf) => *buf,
            None => return Err(MemoryError::BadWriteable(handle)),
        };

        let needed = buf.len + bytes.len() as u32;
        if needed > buf.cap {
            let new_cap = needed.max(buf.cap * 2).max(16);
            let new_addr = inner.bump_alloc(new_cap, 1);
            let (old, len) = (buf.addr as usize, buf.len as usize);
            inner.memory.copy_within(old..old + len, new_addr as usize);
            buf.addr = new_addr;
            buf.cap = new_cap;
        }

        let at = (buf.addr + buf.len) as usize;
        inner.memory[at..at + bytes.len()].copy_from_slice(bytes);
        buf.len = needed;
        inner.writeables.insert(handle, buf);
        Ok(())
    }

    /// Number of `alloc` calls so far
    pub fn alloc_count(&self) -> u32 {
        self.inner.borrow().stats.alloc_calls
    }

    /// Number of `dealloc` calls so far
    pub fn dealloc_count(&self) -> u32 {
        self.inner.borrow().stats.dealloc_calls
    }

    /// Number of `writeable_destroy` calls so far
    pub fn destroy_count(&self) -> u32 {
        self.inner.borrow().stats.destroy_calls
    }

    /// Every (addr, size, align) triple passed to `dealloc`, in call order
    pub fn deallocs(&self) -> Vec<(u32, u32, u32)> {
        self.inner.borrow().stats.deallocs.clone()
    }

    /// Number of live writeable handles
    pub fn writeable_count(&self) -> usize {
        self.inner.borrow().writeables.len()
    }
}

impl MemInner {
    /// Bump-allocate, growing memory as needed (never fails in the arena)
    fn bump_alloc(&mut self, size: u32, align: u32) -> u32 {
        let align = align.max(1);
        let addr = (self.next + align - 1) / align * align;
        self.next = addr + size;
        if self.next as usize > self.memory.len() {
            // Round up to the next KiB, mimicking page-granular wasm growth.
            let target = (self.next as usize + 1023) / 1024 * 1024;
            self.memory.resize(target, 0);
        }
        addr
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<(), MemoryError> {
        let end = addr as usize + len;
        if end > self.memory.len() {
            return Err(MemoryError::OutOfBounds {
                addr,
                len: len as u32,
                size: self.memory.len() as u32,
            });
        }
        Ok(())
    }
}

impl WasmModule for MemModule {
    fn alloc(&self, size: u32, align: u32) -> Result<u32, MemoryError> {
        let mut inner = self.inner.borrow_mut();
        inner.stats.alloc_calls += 1;
        let addr = inner.bump_alloc(size, align);
        trace!("alloc size={} align={} -> addr={}", size, align, addr);
        Ok(addr)
    }

    fn dealloc(&self, addr: u32, size: u32, align: u32) {
        let mut inner = self.inner.borrow_mut();
        inner.stats.dealloc_calls += 1;
        inner.stats.deallocs.push((addr, size, align));
        trace!("dealloc addr={} size={} align={}", addr, size, align);
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let inner = self.inner.borrow();
        inner.check_range(addr, buf.len())?;
        let at = addr as usize;
        buf.copy_from_slice(&inner.memory[at..at + buf.len()]);
        Ok(())
    }

    fn write(&self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_range(addr, bytes.len())?;
        let at = addr as usize;
        inner.memory[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn writeable_create(&self, capacity_hint: u32) -> Result<u32, MemoryError> {
        let mut inner = self.inner.borrow_mut();
        let addr = if capacity_hint > 0 {
            inner.bump_alloc(capacity_hint, 1)
        } else {
            0
        };
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.writeables.insert(
            handle,
            WriteableBuf {
                addr,
                len: 0,
                cap: capacity_hint,
            },
        );
        trace!("writeable_create hint={} -> handle={}", capacity_hint, handle);
        Ok(handle)
    }

    fn writeable_ptr(&self, handle: u32) -> Result<u32, MemoryError> {
        let inner = self.inner.borrow();
        inner
            .writeables
            .get(&handle)
            .map(|buf| buf.addr)
            .ok_or(MemoryError::BadWriteable(handle))
    }

    fn writeable_len(&self, handle: u32) -> Result<u32, MemoryError> {
        let inner = self.inner.borrow();
        inner
            .writeables
            .get(&handle)
            .map(|buf| buf.len)
            .ok_or(MemoryError::BadWriteable(handle))
    }

    fn writeable_destroy(&self, handle: u32) {
        let mut inner = self.inner.borrow_mut();
        if inner.writeables.remove(&handle).is_some() {
            inner.stats.destroy_calls += 1;
            trace!("writeable_destroy handle={}", handle);
        }
    }

    fn memory_size(&self) -> u32 {
        self.inner.borrow().memory.len() as u32
    }
}

impl Default for MemModule {
    fn default() -> Self {
        Self::new()
    }
}
