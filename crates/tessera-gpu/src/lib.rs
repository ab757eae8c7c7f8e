//! HIP/CUDA runtime abstraction for Tessera.
//!
//! This crate provides:
//! - The [`Runtime`] trait the sort engine drives devices through
//! - Device capability reporting
//! - Stream-ordered, typed device buffers
//! - A host emulation runtime for running kernels without a GPU

pub mod capabilities;
pub mod error;
pub mod host;
pub mod memory;
pub mod runtime;

pub use capabilities::{Api, DeviceProperties};
pub use error::{GpuError, Result};
pub use host::HostRuntime;
pub use memory::DeviceBuffer;
pub use runtime::{
    Device, DevicePtr, Function, FunctionAttributes, IncludeFile, KernelArg, Runtime, Stream,
};
