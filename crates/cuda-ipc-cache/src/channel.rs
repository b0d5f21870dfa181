use crate::backend::IpcBackend;
use crate::{CudaDevice, DevicePtr, HandleCache, HandleCacheError, IpcMemHandle};
use spin::Mutex;
use std::sync::Arc;

/// Shares a [`HandleCache`] between threads by locking it on every
/// operation.
///
/// Holding the lock across the whole operation serializes resolve and
/// release for the same handle (no resolve can observe a half-removed
/// entry) and protects the process-global current-device state that the
/// backend mutates.
pub struct MutexHandleCache<B: IpcBackend> {
    cache: Arc<Mutex<HandleCache<B>>>,
}

impl<B: IpcBackend> Clone for MutexHandleCache<B> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<B: IpcBackend> MutexHandleCache<B> {
    /// Wraps a cache for shared use.
    pub fn new(cache: HandleCache<B>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    /// Locked [`HandleCache::resolve`].
    pub fn resolve(
        &self,
        handle: &IpcMemHandle,
        device: CudaDevice,
    ) -> Result<DevicePtr, HandleCacheError> {
        self.cache.lock().resolve(handle, device)
    }

    /// Locked [`HandleCache::release`].
    pub fn release(&self, handle: &IpcMemHandle) -> Result<bool, HandleCacheError> {
        self.cache.lock().release(handle)
    }

    /// Locked [`HandleCache::clear`].
    pub fn clear(&self) {
        self.cache.lock().clear()
    }

    /// Number of currently-open mappings.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether no mapping is currently open.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Whether a mapping is currently open for `handle`.
    pub fn contains(&self, handle: &IpcMemHandle) -> bool {
        self.cache.lock().contains(handle)
    }
}

impl<B: IpcBackend> core::fmt::Debug for MutexHandleCache<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MutexHandleCache").finish()
    }
}
