use crate::{CudaDevice, DevicePtr, IpcMemHandle};
use thiserror::Error;

/// Errors surfaced by [`HandleCache`](crate::HandleCache) operations.
///
/// All driver-level failures propagate immediately to the caller; the cache
/// never retries on its own. Releasing a handle that was never resolved is
/// not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleCacheError {
    /// The driver rejected the open call for a handle (invalid or stale
    /// handle, resource exhaustion, cross-device misuse).
    #[error("failed to map {handle:?} on {device:?}: {reason}")]
    Mapping {
        /// The handle the open was attempted for.
        handle: IpcMemHandle,
        /// The device that was current during the attempt.
        device: CudaDevice,
        /// Driver-reported failure.
        reason: String,
    },

    /// The driver failed to close an established mapping.
    #[error("failed to unmap {ptr:?} on {device:?}: {reason}")]
    Unmapping {
        /// The mapped address the close was attempted for.
        ptr: DevicePtr,
        /// The device that was current during the attempt.
        device: CudaDevice,
        /// Driver-reported failure.
        reason: String,
    },

    /// The device could not be made current before a driver call.
    #[error("failed to make {device:?} current: {reason}")]
    DeviceSwitch {
        /// The device that could not be activated.
        device: CudaDevice,
        /// Driver-reported failure.
        reason: String,
    },
}

/// A byte slice of the wrong length was offered as an IPC handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("ipc handle must be {} bytes, got {len}", crate::IPC_HANDLE_SIZE)]
pub struct InvalidHandleBytes {
    /// Length of the rejected slice.
    pub len: usize,
}
