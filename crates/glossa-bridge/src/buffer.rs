//! Host-owned buffers in native memory
//!
//! An [`OwnedBuffer`] is an allocation in the module's linear memory holding
//! bytes copied from the host (a string's UTF-8 bytes, or a raw slice at a
//! required alignment). Its release is tracked by a [`BufferRegistry`]:
//!
//! - Explicit release: `free()` unregisters the buffer and deallocates.
//! - Automatic release: dropping an un-freed `OwnedBuffer` deallocates.
//! - Deferred release: a native object may keep a borrow into the buffer for
//!   its own lifetime instead of copying. The caller records that as a
//!   borrow edge (`add_borrow`/`release_borrow`); while edges are live,
//!   neither `free()` nor `Drop` deallocates — the single deallocation runs
//!   when the owner is gone *and* the last edge is released.
//!
//! Exactly one deallocation ever runs per buffer, with the originally
//! captured (addr, size, align) triple. A second explicit `free()` is a
//! usage bug: it is logged and suppressed, never propagated, so it cannot
//! mask the already-successful first release.

use crate::config::BridgeConfig;
use crate::error::{BridgeResult, MemoryError};
use crate::module::WasmModule;
use log::{debug, error, trace, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Identity of a registered buffer, unique per registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Entry {
    addr: u32,
    size: u32,
    align: u32,
    borrows: u32,
    owner_live: bool,
}

/// Tracks every live buffer for one module instance
///
/// Holds the module handle so it can perform the deallocation itself when a
/// deferred release fires after the owning [`OwnedBuffer`] is gone.
pub struct BufferRegistry {
    module: Rc<dyn WasmModule>,
    entries: RefCell<HashMap<BufferId, Entry>>,
    next_id: Cell<u64>,
    max_alloc_bytes: Option<u32>,
}

enum OwnerRelease {
    Freed,
    Deferred,
    AlreadyReleased,
}

impl BufferRegistry {
    /// Create a registry for one module instance
    pub fn new(module: Rc<dyn WasmModule>) -> Self {
        Self {
            module,
            entries: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            max_alloc_bytes: None,
        }
    }

    /// Create a registry honoring the configured allocation guard
    pub fn with_config(module: Rc<dyn WasmModule>, config: &BridgeConfig) -> Self {
        let mut registry = Self::new(module);
        registry.max_alloc_bytes = config.max_alloc_bytes;
        registry
    }

    /// The module this registry allocates against
    pub fn module(&self) -> &dyn WasmModule {
        self.module.as_ref()
    }

    /// Number of buffers not yet fully released
    pub fn live_count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Record a liveness edge from a borrowing native object to `id`
    ///
    /// Returns `false` (and logs) if the buffer is already fully released —
    /// that is a caller bug, a borrow cannot outlive its source.
    pub fn add_borrow(&self, id: BufferId) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.borrows += 1;
                trace!("buffer {} borrow added ({} live)", id, entry.borrows);
                true
            }
            None => {
                error!("borrow recorded against released buffer {}", id);
                false
            }
        }
    }

    /// Release a liveness edge; deallocates if this was the last reference
    pub fn release_borrow(&self, id: BufferId) {
        let freed = {
            let mut entries = self.entries.borrow_mut();
            match entries.get_mut(&id) {
                Some(entry) if entry.borrows > 0 => {
                    entry.borrows -= 1;
                    if entry.borrows == 0 && !entry.owner_live {
                        entries.remove(&id)
                    } else {
                        None
                    }
                }
                Some(_) => {
                    error!("borrow released against buffer {} with no live borrows", id);
                    None
                }
                None => {
                    error!("borrow released against released buffer {}", id);
                    None
                }
            }
        };
        if let Some(entry) = freed {
            debug!("buffer {} released after last borrow", id);
            self.module.dealloc(entry.addr, entry.size, entry.align);
        }
    }

    #[cfg(test)]
    fn borrows(&self, id: BufferId) -> Option<u32> {
        self.entries.borrow().get(&id).map(|e| e.borrows)
    }

    fn register(&self, addr: u32, size: u32, align: u32) -> BufferId {
        let id = BufferId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().insert(
            id,
            Entry {
                addr,
                size,
                align,
                borrows: 0,
                owner_live: true,
            },
        );
        id
    }

    fn release_owner(&self, id: BufferId) -> OwnerRelease {
        let freed = {
            let mut entries = self.entries.borrow_mut();
            match entries.get_mut(&id) {
                None => return OwnerRelease::AlreadyReleased,
                Some(entry) if !entry.owner_live => return OwnerRelease::AlreadyReleased,
                Some(entry) => {
                    entry.owner_live = false;
                    if entry.borrows > 0 {
                        return OwnerRelease::Deferred;
                    }
                    entries.remove(&id)
                }
            }
        };
        match freed {
            Some(entry) => {
                self.module.dealloc(entry.addr, entry.size, entry.align);
                OwnerRelease::Freed
            }
            None => OwnerRelease::AlreadyReleased,
        }
    }
}

impl fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRegistry")
            .field("live", &self.live_count())
            .field("max_alloc_bytes", &self.max_alloc_bytes)
            .finish()
    }
}

impl Drop for BufferRegistry {
    fn drop(&mut self) {
        // Entries still present at teardown are buffers whose deferred
        // release never fired (a borrow edge was leaked). Release them so
        // the module's allocator stays balanced.
        let entries = self.entries.get_mut();
        for (id, entry) in entries.drain() {
            warn!("buffer {} still registered at teardown; releasing", id);
            self.module.dealloc(entry.addr, entry.size, entry.align);
        }
    }
}

/// A native-memory allocation owned by the host
///
/// # Example
///
/// ```
/// use glossa_bridge::buffer::{BufferRegistry, OwnedBuffer};
/// use glossa_bridge::module::MemModule;
/// use std::rc::Rc;
///
/// let module = Rc::new(MemModule::new());
/// let registry = Rc::new(BufferRegistry::new(module.clone()));
///
/// let mut buf = OwnedBuffer::from_str(&registry, "en-US").unwrap();
/// // ... pass (buf.addr(), buf.size()) to a native call ...
/// buf.free();
/// ```
#[derive(Debug)]
pub struct OwnedBuffer {
    id: BufferId,
    addr: u32,
    size: u32,
    align: u32,
    registry: Rc<BufferRegistry>,
}

impl OwnedBuffer {
    /// Copy a host string's UTF-8 bytes into native memory at alignment 1
    pub fn from_str(registry: &Rc<BufferRegistry>, s: &str) -> BridgeResult<Self> {
        Self::from_bytes(registry, s.as_bytes(), 1)
    }

    /// Copy a byte slice into native memory at the given alignment
    pub fn from_bytes(registry: &Rc<BufferRegistry>, bytes: &[u8], align: u32) -> BridgeResult<Self> {
        let size = u32::try_from(bytes.len())
            .map_err(|_| MemoryError::AllocFailed { size: u32::MAX, align })?;
        Self::new_with(registry, size, align, |module, addr| {
            module.write(addr, bytes)?;
            Ok(())
        })
    }

    /// Allocate `size` bytes at `align` and let `fill` populate the region
    ///
    /// The fill indirection exists so callers that already hold bytes in
    /// native-reachable form can skip an intermediate host-side copy. If
    /// `fill` fails the allocation is released before the error propagates.
    pub fn new_with(
        registry: &Rc<BufferRegistry>,
        size: u32,
        align: u32,
        fill: impl FnOnce(&dyn WasmModule, u32) -> BridgeResult<()>,
    ) -> BridgeResult<Self> {
        if let Some(max) = registry.max_alloc_bytes {
            if size > max {
                return Err(MemoryError::AllocFailed { size, align }.into());
            }
        }

        let addr = registry.module.alloc(size, align)?;
        if let Err(e) = fill(registry.module.as_ref(), addr) {
            registry.module.dealloc(addr, size, align);
            return Err(e);
        }

        let id = registry.register(addr, size, align);
        trace!("buffer {} allocated: addr={} size={} align={}", id, addr, size, align);
        Ok(Self {
            id,
            addr,
            size,
            align,
            registry: Rc::clone(registry),
        })
    }

    /// Registry identity of this buffer
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Address of the allocation in linear memory
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Size of the allocation in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Alignment the allocation was made with
    pub fn align(&self) -> u32 {
        self.align
    }

    /// Explicitly release the buffer
    ///
    /// Deallocates immediately unless live borrow edges defer the release.
    /// Calling `free()` again (or after the release already ran) logs a
    /// diagnostic and does nothing — the second deallocation is suppressed.
    pub fn free(&mut self) {
        match self.registry.release_owner(self.id) {
            OwnerRelease::Freed => trace!("buffer {} freed", self.id),
            OwnerRelease::Deferred => {
                debug!("buffer {} freed while borrowed; release deferred", self.id)
            }
            OwnerRelease::AlreadyReleased => {
                error!(
                    "double free of buffer {} suppressed; this is a usage bug",
                    self.id
                );
            }
        }
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        match self.registry.release_owner(self.id) {
            OwnerRelease::Freed => trace!("buffer {} released on drop", self.id),
            OwnerRelease::Deferred => {
                debug!("buffer {} dropped while borrowed; release deferred", self.id)
            }
            // Explicit free() already ran; nothing to do.
            OwnerRelease::AlreadyReleased => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, FfiError};
    use crate::module::MemModule;

    fn setup() -> (Rc<MemModule>, Rc<BufferRegistry>) {
        let module = Rc::new(MemModule::new());
        let registry = Rc::new(BufferRegistry::new(module.clone()));
        (module, registry)
    }

    #[test]
    fn test_from_bytes_copies_at_alignment() {
        let (module, registry) = setup();
        let buf = OwnedBuffer::from_bytes(&registry, &[0, 1, 2, 3], 4).unwrap();

        assert_eq!(buf.size(), 4);
        assert_eq!(buf.align(), 4);
        assert_eq!(buf.addr() % 4, 0);
        assert_eq!(module.alloc_count(), 1);

        let mut out = [0u8; 4];
        module.read(buf.addr(), &mut out).unwrap();
        assert_eq!(out, [0, 1, 2, 3]);
    }

    #[test]
    fn test_from_str_uses_utf8_bytes_align_one() {
        let (module, registry) = setup();
        let text = "ja-JP-u-ca-japanese";
        let buf = OwnedBuffer::from_str(&registry, text).unwrap();

        assert_eq!(buf.size() as usize, text.len());
        assert_eq!(buf.align(), 1);

        let mut out = vec![0u8; text.len()];
        module.read(buf.addr(), &mut out).unwrap();
        assert_eq!(out, text.as_bytes());
    }

    #[test]
    fn test_free_deallocates_with_captured_triple() {
        let (module, registry) = setup();
        let mut buf = OwnedBuffer::from_bytes(&registry, &[9, 9], 2).unwrap();
        let expected = (buf.addr(), buf.size(), buf.align());

        buf.free();
        assert_eq!(module.deallocs(), vec![expected]);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_double_free_deallocates_at_most_once() {
        let (module, registry) = setup();
        let mut buf = OwnedBuffer::from_str(&registry, "nb-NO").unwrap();

        buf.free();
        buf.free();
        assert_eq!(module.dealloc_count(), 1);
    }

    #[test]
    fn test_drop_after_free_does_not_dealloc_again() {
        let (module, registry) = setup();
        {
            let mut buf = OwnedBuffer::from_str(&registry, "da").unwrap();
            buf.free();
        }
        assert_eq!(module.dealloc_count(), 1);
    }

    #[test]
    fn test_drop_without_free_deallocates_once() {
        let (module, registry) = setup();
        let expected;
        {
            let buf = OwnedBuffer::from_str(&registry, "es-419").unwrap();
            expected = (buf.addr(), buf.size(), buf.align());
        }
        assert_eq!(module.deallocs(), vec![expected]);
    }

    #[test]
    fn test_borrow_defers_release_until_edge_dropped() {
        let (module, registry) = setup();
        let id;
        {
            let buf = OwnedBuffer::from_str(&registry, "pt-BR").unwrap();
            id = buf.id();
            assert!(registry.add_borrow(id));
        }
        // Owner is gone, the borrowing native object is not.
        assert_eq!(module.dealloc_count(), 0);
        assert_eq!(registry.live_count(), 1);

        registry.release_borrow(id);
        assert_eq!(module.dealloc_count(), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_free_while_borrowed_defers() {
        let (module, registry) = setup();
        let mut buf = OwnedBuffer::from_str(&registry, "ko").unwrap();
        let id = buf.id();
        registry.add_borrow(id);

        buf.free();
        assert_eq!(module.dealloc_count(), 0);

        registry.release_borrow(id);
        assert_eq!(module.dealloc_count(), 1);
    }

    #[test]
    fn test_multiple_borrows_release_in_any_order() {
        let (module, registry) = setup();
        let id;
        {
            let buf = OwnedBuffer::from_str(&registry, "th").unwrap();
            id = buf.id();
            registry.add_borrow(id);
            registry.add_borrow(id);
        }
        assert_eq!(registry.borrows(id), Some(2));

        registry.release_borrow(id);
        assert_eq!(module.dealloc_count(), 0);
        registry.release_borrow(id);
        assert_eq!(module.dealloc_count(), 1);
    }

    #[test]
    fn test_borrow_against_released_buffer_is_refused() {
        let (_module, registry) = setup();
        let id;
        {
            let buf = OwnedBuffer::from_str(&registry, "fi").unwrap();
            id = buf.id();
        }
        assert!(!registry.add_borrow(id));
    }

    #[test]
    fn test_fill_failure_releases_allocation() {
        let (module, registry) = setup();
        let result = OwnedBuffer::new_with(&registry, 8, 1, |_, _| {
            Err(FfiError::discriminant(1).into())
        });
        assert!(result.is_err());
        assert_eq!(module.alloc_count(), 1);
        assert_eq!(module.dealloc_count(), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_alloc_guard_rejects_before_native_call() {
        let module = Rc::new(MemModule::new());
        let config = BridgeConfig {
            max_alloc_bytes: Some(4),
            ..BridgeConfig::default()
        };
        let registry = Rc::new(BufferRegistry::with_config(module.clone(), &config));

        let result = OwnedBuffer::from_bytes(&registry, &[0; 8], 1);
        assert!(matches!(
            result,
            Err(BridgeError::Memory(MemoryError::AllocFailed { size: 8, align: 1 }))
        ));
        assert_eq!(module.alloc_count(), 0);
    }

    #[test]
    fn test_registry_teardown_releases_leaked_entries() {
        let module = Rc::new(MemModule::new());
        {
            let registry = Rc::new(BufferRegistry::new(module.clone()));
            let buf = OwnedBuffer::from_str(&registry, "el").unwrap();
            registry.add_borrow(buf.id());
            // Borrow edge never released; entry survives the owner.
        }
        assert_eq!(module.dealloc_count(), 1);
    }

    #[test]
    fn test_empty_buffer_is_valid() {
        let (module, registry) = setup();
        let mut buf = OwnedBuffer::from_str(&registry, "").unwrap();
        assert_eq!(buf.size(), 0);
        buf.free();
        assert_eq!(module.dealloc_count(), 1);
    }
}
