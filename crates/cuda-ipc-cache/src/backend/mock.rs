use super::IpcBackend;
use crate::{CudaDevice, DevicePtr, HandleCacheError, IpcMemHandle};

/// Recording backend used by the unit tests.
///
/// Every open and close is logged together with the device that was current
/// at call time, and failures can be injected per primitive.
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    current: CudaDevice,
    next_ptr: u64,
    /// `(handle, device current at call time)` for every open, in order.
    pub opens: Vec<(IpcMemHandle, CudaDevice)>,
    /// `(ptr, device current at call time)` for every close, in order.
    pub closes: Vec<(DevicePtr, CudaDevice)>,
    pub fail_next_open: bool,
    pub fail_close: bool,
    pub fail_switch_to: Option<CudaDevice>,
}

impl IpcBackend for MockBackend {
    fn current_device(&self) -> CudaDevice {
        self.current
    }

    fn set_device(&mut self, device: CudaDevice) -> Result<(), HandleCacheError> {
        if self.fail_switch_to == Some(device) {
            return Err(HandleCacheError::DeviceSwitch {
                device,
                reason: "injected switch failure".into(),
            });
        }
        self.current = device;
        Ok(())
    }

    fn open(&mut self, handle: &IpcMemHandle) -> Result<DevicePtr, HandleCacheError> {
        if std::mem::take(&mut self.fail_next_open) {
            return Err(HandleCacheError::Mapping {
                handle: *handle,
                device: self.current,
                reason: "injected open failure".into(),
            });
        }
        self.opens.push((*handle, self.current));
        // Distinct, recognizable addresses per open.
        self.next_ptr += 0x1000;
        Ok(DevicePtr(self.next_ptr))
    }

    fn close(&mut self, ptr: DevicePtr) -> Result<(), HandleCacheError> {
        self.closes.push((ptr, self.current));
        if self.fail_close {
            return Err(HandleCacheError::Unmapping {
                ptr,
                device: self.current,
                reason: "injected close failure".into(),
            });
        }
        Ok(())
    }
}
