//! The unified HIP/CUDA runtime boundary.
//!
//! Everything the sort engine needs from a device goes through [`Runtime`]:
//! property queries, kernel acquisition, 1-D launches and stream-ordered
//! memory operations.

use crate::capabilities::{Api, DeviceProperties};
use crate::error::Result;
use std::fmt;
use std::path::Path;

/// Device ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Device(pub u32);

/// Execution stream handle. Operations on one stream execute in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stream(pub u64);

impl Stream {
    /// The null stream.
    pub const DEFAULT: Self = Self(0);
}

/// Raw device address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The null device address.
    pub const NULL: Self = Self(0);

    /// Whether this is the null address.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    #[must_use]
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:#x})", self.0)
    }
}

/// Opaque handle to a compiled, launchable kernel function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Function(pub u64);

/// A single kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    Ptr(DevicePtr),
    I32(i32),
    U32(u32),
}

impl From<DevicePtr> for KernelArg {
    fn from(ptr: DevicePtr) -> Self {
        Self::Ptr(ptr)
    }
}

impl From<i32> for KernelArg {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for KernelArg {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

/// Resource footprint of a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionAttributes {
    /// Registers per thread
    pub num_regs: u32,
    /// Static shared memory per block in bytes
    pub shared_size_bytes: u32,
    /// Constant memory in bytes
    pub const_size_bytes: u32,
}

/// A header made available to the JIT compiler by name rather than by path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeFile<'a> {
    /// Name as it appears in `#include <...>`
    pub name: &'a str,
    /// Header contents
    pub contents: &'a str,
}

/// Device runtime abstraction shared by the HIP and CUDA back-ends.
///
/// Asynchronous operations are enqueued on `stream` and may complete later;
/// `copy_dtoh` is the only call that waits for the stream.
pub trait Runtime: Send + Sync {
    /// Backend this runtime drives.
    fn api(&self) -> Api;

    /// Query properties of `device`.
    fn device_properties(&self, device: Device) -> Result<DeviceProperties>;

    /// JIT-compile `entry` from a kernel source file.
    fn function_from_file(
        &self,
        device: Device,
        path: &Path,
        entry: &str,
        options: &[String],
    ) -> Result<Function>;

    /// JIT-compile `entry` from in-memory source text.
    ///
    /// `name` identifies the source in diagnostics, `args` are extra compiler
    /// arguments baked alongside the source and `includes` supplies headers
    /// by name.
    #[allow(clippy::too_many_arguments)]
    fn function_from_string(
        &self,
        device: Device,
        source: &str,
        name: &str,
        entry: &str,
        options: &[String],
        args: &[&str],
        includes: &[IncludeFile<'_>],
    ) -> Result<Function>;

    /// Load `entry` from a precompiled module image on disk.
    fn function_from_binary_file(&self, path: &Path, entry: &str) -> Result<Function>;

    /// Load `entry` from a precompiled module image held in memory.
    fn function_from_binary(&self, image: &[u8], entry: &str) -> Result<Function>;

    /// Resource footprint of a loaded function.
    fn function_attributes(&self, function: Function) -> Result<FunctionAttributes>;

    /// Launch `function` over `total_threads` threads in blocks of `block_size`.
    fn launch_1d(
        &self,
        function: Function,
        total_threads: u32,
        block_size: u32,
        args: &[KernelArg],
        shared_bytes: u32,
        stream: Stream,
    ) -> Result<()>;

    /// Allocate `bytes` of device memory.
    fn malloc(&self, bytes: usize) -> Result<DevicePtr>;

    /// Free an allocation returned by [`Runtime::malloc`].
    fn free(&self, ptr: DevicePtr) -> Result<()>;

    /// Fill `bytes` bytes at `dst` with `value`.
    fn memset_async(&self, dst: DevicePtr, value: u8, bytes: usize, stream: Stream) -> Result<()>;

    /// Device-to-device copy.
    fn copy_dtod_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
        stream: Stream,
    ) -> Result<()>;

    /// Host-to-device copy.
    fn copy_htod_async(&self, dst: DevicePtr, src: &[u8], stream: Stream) -> Result<()>;

    /// Device-to-host copy. Waits for `stream` before returning.
    fn copy_dtoh(&self, dst: &mut [u8], src: DevicePtr, stream: Stream) -> Result<()>;

    /// Block until all work on `stream` has completed.
    fn stream_synchronize(&self, stream: Stream) -> Result<()>;
}
