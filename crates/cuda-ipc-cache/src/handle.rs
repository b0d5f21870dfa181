use crate::InvalidHandleBytes;

/// Size in bytes of a CUDA IPC memory handle (`CUipcMemHandle`).
pub const IPC_HANDLE_SIZE: usize = 64;

/// Opaque identity of a device buffer exported for inter-process sharing.
///
/// The driver fills these bytes when memory is exported; they are only ever
/// compared and hashed, never interpreted. Equality and hashing are byte-wise
/// over the raw blob, which makes the handle usable as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpcMemHandle([u8; IPC_HANDLE_SIZE]);

impl IpcMemHandle {
    /// Wraps raw handle bytes received from the exporting process.
    pub const fn from_bytes(bytes: [u8; IPC_HANDLE_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw handle bytes, for handing back to the driver or to transport.
    pub const fn as_bytes(&self) -> &[u8; IPC_HANDLE_SIZE] {
        &self.0
    }
}

impl From<[u8; IPC_HANDLE_SIZE]> for IpcMemHandle {
    fn from(bytes: [u8; IPC_HANDLE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for IpcMemHandle {
    type Error = InvalidHandleBytes;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; IPC_HANDLE_SIZE] = bytes
            .try_into()
            .map_err(|_| InvalidHandleBytes { len: bytes.len() })?;
        Ok(Self(bytes))
    }
}

impl core::fmt::Debug for IpcMemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The full 64 bytes are noise in logs; a short prefix identifies the
        // handle well enough.
        write!(f, "IpcMemHandle(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}
