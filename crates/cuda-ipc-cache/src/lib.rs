//! Per-process cache for CUDA IPC memory handle mappings.
//!
//! Opening an inter-process memory mapping (`cuIpcOpenMemHandle`) is an
//! expensive, limited-quantity driver operation, and opening the same handle
//! twice in one process is wasteful at best. [`HandleCache`] memoizes the
//! device pointer returned by the first open for each handle, so only the
//! first resolution pays the driver call; explicit release and cache teardown
//! close the mappings under the device context they were opened on.

#[macro_use]
extern crate derive_new;

pub mod backend;

mod cache;
mod channel;
mod device;
mod error;
mod handle;

pub use cache::*;
pub use channel::*;
pub use device::*;
pub use error::*;
pub use handle::*;

#[cfg(feature = "cuda")]
pub use backend::{CudaHandleCache, CudaIpcBackend, CudaIpcOptions};
