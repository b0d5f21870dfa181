use crate::backend::{DeviceContextGuard, IpcBackend};
use crate::{CudaDevice, DevicePtr, HandleCacheError, IpcMemHandle};
use std::collections::HashMap;

/// One currently-open mapping: the memoized address and the device the
/// mapping was established on. The device never changes for the lifetime of
/// the entry; a handle cannot migrate devices without being released first.
#[derive(new, Clone, Copy, Debug)]
struct MappingEntry {
    ptr: DevicePtr,
    device: CudaDevice,
}

/// Per-process cache of opened IPC memory mappings.
///
/// The first [`resolve`](HandleCache::resolve) for a handle pays the driver
/// open call; every later resolve of the same handle returns the memoized
/// pointer without touching the driver. [`release`](HandleCache::release)
/// closes a mapping explicitly, and dropping the cache closes everything
/// still open.
///
/// The cache requires `&mut` access and is therefore single-owner; wrap it
/// in a [`MutexHandleCache`](crate::MutexHandleCache) to share it between
/// threads.
pub struct HandleCache<B: IpcBackend> {
    backend: B,
    entries: HashMap<IpcMemHandle, MappingEntry>,
}

impl<B: IpcBackend> HandleCache<B> {
    /// Creates an empty cache over the given driver backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            entries: HashMap::new(),
        }
    }

    /// Returns the process-local address for `handle`, opening the mapping
    /// on `device` if this is the first resolution.
    ///
    /// `device` must be the device the exporting process allocated on; the
    /// cache does not validate cross-device misuse. On a miss the open runs
    /// under a [`DeviceContextGuard`], so the previously current device is
    /// restored before this returns, including when the open fails. A failed
    /// open inserts nothing: the next resolve for the same handle attempts a
    /// fresh open.
    pub fn resolve(
        &mut self,
        handle: &IpcMemHandle,
        device: CudaDevice,
    ) -> Result<DevicePtr, HandleCacheError> {
        if let Some(entry) = self.entries.get(handle) {
            log::trace!("ipc mapping hit for {handle:?} on {:?}", entry.device);
            return Ok(entry.ptr);
        }

        log::trace!("ipc mapping miss for {handle:?}, opening on {device:?}");
        let ptr = {
            let mut guard = DeviceContextGuard::activate(&mut self.backend, device)?;
            guard.open(handle)?
        };
        self.entries.insert(*handle, MappingEntry::new(ptr, device));
        Ok(ptr)
    }

    /// Closes the mapping for `handle`, if one is open.
    ///
    /// Returns `Ok(false)` without side effects when the handle was never
    /// resolved or was already released; that is a defined no-op, not an
    /// error. On `Ok(true)` the memoized pointer is invalid from here on,
    /// and the handle may be resolved again later as a fresh miss.
    ///
    /// The entry is removed before the driver close is attempted: when the
    /// close fails the error propagates, but the cache never keeps a
    /// possibly-unmapped pointer around as if it were still valid.
    pub fn release(&mut self, handle: &IpcMemHandle) -> Result<bool, HandleCacheError> {
        let Some(entry) = self.entries.remove(handle) else {
            return Ok(false);
        };

        log::trace!("closing ipc mapping for {handle:?} on {:?}", entry.device);
        let mut guard = DeviceContextGuard::activate(&mut self.backend, entry.device)?;
        guard.close(entry.ptr)?;
        Ok(true)
    }

    /// Closes every remaining mapping, continuing past individual failures.
    ///
    /// Failures indicate leaked mappings and are logged, not propagated.
    /// Called on drop; also available for explicit teardown.
    pub fn clear(&mut self) {
        for (handle, entry) in std::mem::take(&mut self.entries) {
            let closed = DeviceContextGuard::activate(&mut self.backend, entry.device)
                .and_then(|mut guard| guard.close(entry.ptr));
            if let Err(err) = closed {
                log::error!("leaked ipc mapping for {handle:?}: {err}");
            }
        }
    }

    /// Number of currently-open mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no mapping is currently open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a mapping is currently open for `handle`.
    pub fn contains(&self, handle: &IpcMemHandle) -> bool {
        self.entries.contains_key(handle)
    }

    /// The underlying driver backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: IpcBackend> Drop for HandleCache<B> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<B: IpcBackend> core::fmt::Debug for HandleCache<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandleCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IPC_HANDLE_SIZE;
    use crate::backend::mock::MockBackend;
    use pretty_assertions::assert_eq;

    fn handle(fill: u8) -> IpcMemHandle {
        IpcMemHandle::from_bytes([fill; IPC_HANDLE_SIZE])
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut cache = HandleCache::new(MockBackend::default());
        let h = handle(1);

        let first = cache.resolve(&h, CudaDevice::new(0)).unwrap();
        let second = cache.resolve(&h, CudaDevice::new(0)).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.backend().opens.len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_handles_get_distinct_mappings() {
        let mut cache = HandleCache::new(MockBackend::default());

        let p1 = cache.resolve(&handle(1), CudaDevice::new(0)).unwrap();
        let p2 = cache.resolve(&handle(2), CudaDevice::new(1)).unwrap();

        assert_ne!(p1, p2);
        assert_eq!(cache.backend().opens.len(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn open_runs_with_target_device_current() {
        let mut cache = HandleCache::new(MockBackend::default());
        let h = handle(3);

        cache.resolve(&h, CudaDevice::new(2)).unwrap();

        assert_eq!(cache.backend().opens, vec![(h, CudaDevice::new(2))]);
        // Prior device restored once the open is done.
        assert_eq!(cache.backend().current_device(), CudaDevice::new(0));
    }

    #[test]
    fn close_runs_with_entry_device_current() {
        let mut cache = HandleCache::new(MockBackend::default());
        let h = handle(4);

        let ptr = cache.resolve(&h, CudaDevice::new(3)).unwrap();
        cache.release(&h).unwrap();

        assert_eq!(cache.backend().closes, vec![(ptr, CudaDevice::new(3))]);
        assert_eq!(cache.backend().current_device(), CudaDevice::new(0));
    }

    #[test]
    fn release_invalidates_and_allows_fresh_open() {
        let mut cache = HandleCache::new(MockBackend::default());
        let h = handle(5);

        let first = cache.resolve(&h, CudaDevice::new(0)).unwrap();
        assert!(cache.release(&h).unwrap());
        assert_eq!(cache.len(), 0);

        let second = cache.resolve(&h, CudaDevice::new(0)).unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.backend().opens.len(), 2);
    }

    #[test]
    fn release_unknown_handle_is_noop() {
        let mut cache = HandleCache::new(MockBackend::default());
        cache.resolve(&handle(6), CudaDevice::new(0)).unwrap();

        assert!(!cache.release(&handle(7)).unwrap());

        assert_eq!(cache.len(), 1);
        assert!(cache.backend().closes.is_empty());
    }

    #[test]
    fn failed_open_leaves_no_partial_entry() {
        let mut backend = MockBackend::default();
        backend.fail_next_open = true;
        let mut cache = HandleCache::new(backend);
        let h = handle(8);

        let err = cache.resolve(&h, CudaDevice::new(1)).unwrap_err();
        assert!(matches!(err, HandleCacheError::Mapping { .. }));
        assert_eq!(cache.len(), 0);
        assert!(!cache.contains(&h));

        // The next resolve attempts a fresh open and succeeds.
        cache.resolve(&h, CudaDevice::new(1)).unwrap();
        assert_eq!(cache.backend().opens.len(), 1);
    }

    #[test]
    fn failed_close_still_drops_the_entry() {
        let mut cache = HandleCache::new(MockBackend::default());
        let h = handle(9);
        cache.resolve(&h, CudaDevice::new(0)).unwrap();

        cache.backend.fail_close = true;
        let err = cache.release(&h).unwrap_err();
        assert!(matches!(err, HandleCacheError::Unmapping { .. }));

        // No dangling entry: the pointer is gone for good.
        assert!(!cache.contains(&h));
        cache.backend.fail_close = false;

        let fresh = cache.resolve(&h, CudaDevice::new(0)).unwrap();
        assert_eq!(cache.resolve(&h, CudaDevice::new(0)).unwrap(), fresh);
    }

    #[test]
    fn teardown_closes_every_entry() {
        let mut cache = HandleCache::new(MockBackend::default());
        for fill in 0..4u8 {
            cache
                .resolve(&handle(fill), CudaDevice::new(fill as usize))
                .unwrap();
        }

        cache.clear();

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.backend().closes.len(), 4);
        assert_eq!(cache.backend().current_device(), CudaDevice::new(0));
    }

    #[test]
    fn teardown_continues_past_close_failures() {
        let mut cache = HandleCache::new(MockBackend::default());
        for fill in 0..3u8 {
            cache.resolve(&handle(fill), CudaDevice::new(0)).unwrap();
        }

        cache.backend.fail_close = true;
        cache.clear();

        // One close attempt per entry, failures notwithstanding.
        assert_eq!(cache.backend().closes.len(), 3);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn resolve_release_resolve_scenario() {
        let mut cache = HandleCache::new(MockBackend::default());
        let h = handle(10);
        let dev = CudaDevice::new(0);

        let p1 = cache.resolve(&h, dev).unwrap();
        assert_eq!(cache.backend().opens.len(), 1);

        assert_eq!(cache.resolve(&h, dev).unwrap(), p1);
        assert_eq!(cache.backend().opens.len(), 1);

        assert!(cache.release(&h).unwrap());
        assert_eq!(cache.backend().closes.len(), 1);

        let p2 = cache.resolve(&h, dev).unwrap();
        assert_ne!(p1, p2);
        assert_eq!(cache.backend().opens.len(), 2);
    }
}
