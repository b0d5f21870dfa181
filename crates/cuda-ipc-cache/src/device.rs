/// Identity of a logical CUDA device.
///
/// Open and close calls for an IPC mapping must run while the exporting
/// device is current, so every cache entry records the device it was
/// established on.
#[derive(new, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CudaDevice {
    pub index: usize,
}

impl core::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cuda({})", self.index)
    }
}

impl From<usize> for CudaDevice {
    fn from(index: usize) -> Self {
        Self { index }
    }
}

/// Process-local device address obtained from an IPC open call.
///
/// This is a capability token, not an owning handle: it remains valid exactly
/// as long as the cache entry it came from. Callers must not retain it past a
/// `release` of the corresponding handle or past teardown of the cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The raw device address.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// The address as an untyped pointer, for handing to driver calls.
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

impl core::fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DevicePtr({:#x})", self.0)
    }
}
