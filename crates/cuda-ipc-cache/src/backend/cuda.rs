use super::IpcBackend;
use crate::{CudaDevice, DevicePtr, HandleCache, HandleCacheError, IpcMemHandle};
use cudarc::driver::DriverError;
use cudarc::driver::sys;
use std::collections::HashMap;
use std::os::raw::c_char;

/// Options configuring how IPC mappings are opened.
#[derive(Debug, Clone)]
pub struct CudaIpcOptions {
    /// Open mappings with `CU_IPC_MEM_LAZY_ENABLE_PEER_ACCESS`, deferring
    /// peer-access setup until a mapping is first touched from another
    /// device.
    pub lazy_peer_access: bool,
}

impl Default for CudaIpcOptions {
    fn default() -> Self {
        Self {
            lazy_peer_access: true,
        }
    }
}

/// [`IpcBackend`] talking to the CUDA driver through `cudarc`.
///
/// Primary contexts are retained lazily, one per device touched, and kept
/// for the lifetime of the backend so repeated context switches stay cheap.
pub struct CudaIpcBackend {
    contexts: HashMap<usize, (sys::CUdevice, sys::CUcontext)>,
    current: CudaDevice,
    options: CudaIpcOptions,
}

// The retained CUcontext pointers are process-global driver state, valid
// from any thread as long as the primary context stays retained.
unsafe impl Send for CudaIpcBackend {}

impl CudaIpcBackend {
    /// Initializes the driver and makes device 0 current, matching the CUDA
    /// runtime's notion of the default device.
    pub fn new(options: CudaIpcOptions) -> Result<Self, HandleCacheError> {
        cudarc::driver::result::init().map_err(|err| switch_error(CudaDevice::new(0), err))?;

        let mut backend = Self {
            contexts: HashMap::new(),
            current: CudaDevice::new(0),
            options,
        };
        backend.set_device(CudaDevice::new(0))?;
        Ok(backend)
    }

    /// The open policy this backend was created with.
    pub fn options(&self) -> &CudaIpcOptions {
        &self.options
    }

    fn context(&mut self, device: CudaDevice) -> Result<sys::CUcontext, HandleCacheError> {
        if let Some((_, ctx)) = self.contexts.get(&device.index) {
            return Ok(*ctx);
        }

        let dev = cudarc::driver::result::device::get(device.index as i32)
            .map_err(|err| switch_error(device, err))?;
        let ctx = unsafe { cudarc::driver::result::primary_ctx::retain(dev) }
            .map_err(|err| switch_error(device, err))?;
        self.contexts.insert(device.index, (dev, ctx));
        Ok(ctx)
    }
}

impl IpcBackend for CudaIpcBackend {
    fn current_device(&self) -> CudaDevice {
        self.current
    }

    fn set_device(&mut self, device: CudaDevice) -> Result<(), HandleCacheError> {
        let ctx = self.context(device)?;
        unsafe { cudarc::driver::result::ctx::set_current(ctx) }
            .map_err(|err| switch_error(device, err))?;
        self.current = device;
        Ok(())
    }

    fn open(&mut self, handle: &IpcMemHandle) -> Result<DevicePtr, HandleCacheError> {
        let raw = sys::CUipcMemHandle {
            reserved: handle.as_bytes().map(|byte| byte as c_char),
        };
        let flags = if self.options.lazy_peer_access {
            sys::CUipcMem_flags::CU_IPC_MEM_LAZY_ENABLE_PEER_ACCESS as u32
        } else {
            0
        };

        let mut ptr: sys::CUdeviceptr = 0;
        let status = unsafe { sys::cuIpcOpenMemHandle_v2(&mut ptr, raw, flags) };
        match status {
            sys::CUresult::CUDA_SUCCESS => Ok(DevicePtr(ptr)),
            status => Err(HandleCacheError::Mapping {
                handle: *handle,
                device: self.current,
                reason: format!("{status:?}"),
            }),
        }
    }

    fn close(&mut self, ptr: DevicePtr) -> Result<(), HandleCacheError> {
        let status = unsafe { sys::cuIpcCloseMemHandle(ptr.as_raw()) };
        match status {
            sys::CUresult::CUDA_SUCCESS => Ok(()),
            status => Err(HandleCacheError::Unmapping {
                ptr,
                device: self.current,
                reason: format!("{status:?}"),
            }),
        }
    }
}

impl Drop for CudaIpcBackend {
    fn drop(&mut self) {
        for (_, (dev, _)) in self.contexts.drain() {
            if let Err(err) = unsafe { cudarc::driver::result::primary_ctx::release(dev) } {
                log::warn!("failed to release primary context: {err:?}");
            }
        }
    }
}

fn switch_error(device: CudaDevice, err: DriverError) -> HandleCacheError {
    HandleCacheError::DeviceSwitch {
        device,
        reason: format!("{err:?}"),
    }
}

/// Cache wired to the real driver.
pub type CudaHandleCache = HandleCache<CudaIpcBackend>;

impl CudaHandleCache {
    /// Builds a cache over a freshly initialized driver backend.
    pub fn with_options(options: CudaIpcOptions) -> Result<Self, HandleCacheError> {
        Ok(HandleCache::new(CudaIpcBackend::new(options)?))
    }
}
