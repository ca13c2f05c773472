//! Scoped use of the native writeable protocol
//!
//! Native functions that produce string output append into a module-owned
//! growable buffer (a "writeable"). [`with_writeable`] scopes the handle's
//! whole lifetime: create, hand to the caller's native call, read the result
//! out, destroy. Destruction is guaranteed on every exit path — normal
//! return, an error from the callback, or a panic — by an RAII guard.

use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::memory;
use crate::module::WasmModule;
use log::trace;

/// Destroys the writeable handle when dropped, exactly once
struct DestroyGuard<'a> {
    module: &'a dyn WasmModule,
    handle: u32,
}

impl Drop for DestroyGuard<'_> {
    fn drop(&mut self) {
        trace!("destroying writeable handle={}", self.handle);
        self.module.writeable_destroy(self.handle);
    }
}

/// Run a native call that appends string output to a fresh writeable
///
/// Creates a writeable with capacity hint 0, invokes `f` with the handle
/// (the callback is expected to pass it to the native call), then decodes
/// the writeable's current contents as UTF-8. The handle is destroyed before
/// this function returns, whether `f` succeeded, failed, or wrote nothing.
///
/// # Example
///
/// ```
/// use glossa_bridge::module::MemModule;
/// use glossa_bridge::writeable::with_writeable;
///
/// let module = MemModule::new();
/// let out = with_writeable(&module, |handle| {
///     // A real caller invokes the native function here; the reference
///     // module lets us append directly.
///     module.writeable_append(handle, "en-US".as_bytes())?;
///     Ok(())
/// })
/// .unwrap();
/// assert_eq!(out, "en-US");
/// ```
pub fn with_writeable(
    module: &dyn WasmModule,
    f: impl FnOnce(u32) -> BridgeResult<()>,
) -> BridgeResult<String> {
    with_writeable_hint(module, 0, f)
}

/// [`with_writeable`] with an explicit initial capacity hint
pub fn with_writeable_hint(
    module: &dyn WasmModule,
    capacity_hint: u32,
    f: impl FnOnce(u32) -> BridgeResult<()>,
) -> BridgeResult<String> {
    let handle = module.writeable_create(capacity_hint)?;
    let guard = DestroyGuard { module, handle };

    f(handle)?;

    // Ptr and len are queried only after the callback: appends may have
    // relocated the writeable's storage.
    let addr = module.writeable_ptr(handle)?;
    let len = module.writeable_len(handle)?;
    let out = memory::read_str(module, addr, len)?;

    drop(guard);
    Ok(out)
}

/// [`with_writeable`] honoring the configured capacity hint
pub fn with_writeable_cfg(
    module: &dyn WasmModule,
    config: &BridgeConfig,
    f: impl FnOnce(u32) -> BridgeResult<()>,
) -> BridgeResult<String> {
    with_writeable_hint(module, config.writeable_capacity_hint, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, FfiError};
    use crate::module::MemModule;

    #[test]
    fn test_writeable_returns_appended_string() {
        let module = MemModule::new();
        let out = with_writeable(&module, |handle| {
            module.writeable_append(handle, b"und-Latn")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, "und-Latn");
        assert_eq!(module.destroy_count(), 1);
    }

    #[test]
    fn test_writeable_empty_callback_returns_empty_string() {
        let module = MemModule::new();
        let out = with_writeable(&module, |_| Ok(())).unwrap();
        assert_eq!(out, "");
        assert_eq!(module.destroy_count(), 1);
    }

    #[test]
    fn test_writeable_destroyed_on_callback_error() {
        let module = MemModule::new();
        let result = with_writeable(&module, |handle| {
            module.writeable_append(handle, b"partial")?;
            Err(FfiError::discriminant(2).into())
        });
        assert!(matches!(result, Err(BridgeError::Ffi(_))));
        assert_eq!(module.destroy_count(), 1);
        assert_eq!(module.writeable_count(), 0);
    }

    #[test]
    fn test_writeable_destroyed_on_panic() {
        let module = MemModule::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = with_writeable(&module, |_| panic!("native trap"));
        }));
        assert!(outcome.is_err());
        assert_eq!(module.destroy_count(), 1);
    }

    #[test]
    fn test_writeable_destroyed_exactly_once_on_success() {
        let module = MemModule::new();
        for _ in 0..3 {
            with_writeable(&module, |handle| {
                module.writeable_append(handle, b"x")?;
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(module.destroy_count(), 3);
        assert_eq!(module.writeable_count(), 0);
    }

    #[test]
    fn test_writeable_survives_relocation() {
        let module = MemModule::new();
        // Hint small, append big: storage relocates mid-callback and the
        // bridge must still read from the final address.
        let out = with_writeable_hint(&module, 2, |handle| {
            module.writeable_append(handle, b"zh-Hant-")?;
            module.writeable_append(handle, b"TW")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, "zh-Hant-TW");
    }

    #[test]
    fn test_writeable_invalid_utf8_still_destroys() {
        let module = MemModule::new();
        let result = with_writeable(&module, |handle| {
            module.writeable_append(handle, &[0xc0, 0x80])?;
            Ok(())
        });
        assert!(matches!(result, Err(BridgeError::InvalidUtf8 { .. })));
        assert_eq!(module.destroy_count(), 1);
    }

    #[test]
    fn test_writeable_cfg_uses_configured_hint() {
        let module = MemModule::new();
        let config = BridgeConfig {
            writeable_capacity_hint: 32,
            ..BridgeConfig::default()
        };
        let out = with_writeable_cfg(&module, &config, |handle| {
            module.writeable_append(handle, b"fr-CA")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, "fr-CA");
    }
}
