#[cfg(feature = "cuda")]
mod cuda;
#[cfg(feature = "cuda")]
pub use cuda::*;

#[cfg(test)]
pub(crate) mod mock;

use crate::{CudaDevice, DevicePtr, HandleCacheError, IpcMemHandle};

/// Driver-side capability consumed by the cache.
///
/// The backend owns the process-global "current device" state and the IPC
/// open/close primitives. [`open`](IpcBackend::open) and
/// [`close`](IpcBackend::close) must only be invoked while the device owning
/// the mapping is current; the cache enforces this with a
/// [`DeviceContextGuard`] around every call.
pub trait IpcBackend {
    /// The device currently targeted by driver calls.
    fn current_device(&self) -> CudaDevice;

    /// Makes `device` current for subsequent driver calls.
    fn set_device(&mut self, device: CudaDevice) -> Result<(), HandleCacheError>;

    /// Opens the mapping behind `handle`, returning a process-local address.
    fn open(&mut self, handle: &IpcMemHandle) -> Result<DevicePtr, HandleCacheError>;

    /// Invalidates a previously opened mapping.
    fn close(&mut self, ptr: DevicePtr) -> Result<(), HandleCacheError>;
}

/// Scoped device-context switch.
///
/// Makes a device current on construction and restores the previously
/// current device on drop, on success and error paths alike. Driver calls
/// issued through the guard therefore always target the requested device,
/// and code relying on the current device being stable observes no change
/// once the guard is gone.
#[derive(Debug)]
pub struct DeviceContextGuard<'a, B: IpcBackend> {
    backend: &'a mut B,
    restore: CudaDevice,
}

impl<'a, B: IpcBackend> DeviceContextGuard<'a, B> {
    /// Switches the backend to `device`, remembering the device that was
    /// current before.
    pub fn activate(backend: &'a mut B, device: CudaDevice) -> Result<Self, HandleCacheError> {
        let restore = backend.current_device();
        backend.set_device(device)?;
        Ok(Self { backend, restore })
    }
}

impl<B: IpcBackend> core::ops::Deref for DeviceContextGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        self.backend
    }
}

impl<B: IpcBackend> core::ops::DerefMut for DeviceContextGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.backend
    }
}

impl<B: IpcBackend> Drop for DeviceContextGuard<'_, B> {
    fn drop(&mut self) {
        // Drop can't propagate; a failed restore leaves the process on the
        // wrong device, which is worth shouting about.
        if let Err(err) = self.backend.set_device(self.restore) {
            log::error!("failed to restore device context to {:?}: {err}", self.restore);
        }
    }
}
