//! Host emulation runtime.
//!
//! [`HostRuntime`] implements [`Runtime`] on the CPU so the sort engine can
//! be driven and verified without a device. Every enqueued operation
//! completes before the call returns, which trivially preserves stream order.

mod compiler;
pub mod image;
mod kernels;
mod memory;

use crate::capabilities::{Api, DeviceProperties};
use crate::error::{GpuError, Result};
use crate::runtime::{
    Device, DevicePtr, Function, FunctionAttributes, IncludeFile, KernelArg, Runtime, Stream,
};
use image::{HostModuleImage, KernelSymbol};
use kernels::{HostKernel, LaunchShape};
use memory::HostMemory;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// How a loaded function was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionOrigin {
    SourceFile,
    SourceString,
    BinaryFile,
    BinaryImage,
}

/// A kernel launch observed by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub entry: String,
    pub grid_size: u32,
    pub block_size: u32,
    pub stream: Stream,
}

struct LoadedFunction {
    entry: String,
    kernel: HostKernel,
    origin: FunctionOrigin,
    options: Vec<String>,
}

struct HostState {
    memory: HostMemory,
    functions: Vec<LoadedFunction>,
    launches: Vec<LaunchRecord>,
}

/// CPU implementation of the device runtime.
pub struct HostRuntime {
    api: Api,
    properties: DeviceProperties,
    state: Mutex<HostState>,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime {
    /// Create a HIP-flavoured runtime with default device properties.
    pub fn new() -> Self {
        Self::with_properties(Api::Hip, DeviceProperties::default())
    }

    /// Create a runtime reporting the given backend and device properties.
    pub fn with_properties(api: Api, properties: DeviceProperties) -> Self {
        tracing::debug!("Host runtime ({api:?}): {}", properties.summary());
        Self {
            api,
            properties,
            state: Mutex::new(HostState {
                memory: HostMemory::new(),
                functions: Vec::new(),
                launches: Vec::new(),
            }),
        }
    }

    /// Bake a module image exporting every entry point of `source`.
    pub fn compile_image(&self, source: &str, options: &[String]) -> Result<Vec<u8>> {
        let kernels = compiler::entry_points(source)
            .into_iter()
            .map(|name| KernelSymbol {
                name,
                options: options.to_vec(),
            })
            .collect();
        HostModuleImage::new(self.api, kernels).encode()
    }

    /// Number of live device allocations.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.live_allocations()
    }

    /// Every launch issued so far, in order.
    pub fn launch_log(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    /// Forget recorded launches.
    pub fn clear_launch_log(&self) {
        self.state.lock().launches.clear();
    }

    /// Entry point name of a loaded function.
    pub fn function_entry(&self, function: Function) -> Option<String> {
        let state = self.state.lock();
        state
            .functions
            .get(function.0 as usize)
            .map(|f| f.entry.clone())
    }

    /// How a loaded function was obtained.
    pub fn function_origin(&self, function: Function) -> Option<FunctionOrigin> {
        let state = self.state.lock();
        state.functions.get(function.0 as usize).map(|f| f.origin)
    }

    /// Compiler options a loaded function was built with.
    pub fn function_options(&self, function: Function) -> Option<Vec<String>> {
        let state = self.state.lock();
        state
            .functions
            .get(function.0 as usize)
            .map(|f| f.options.clone())
    }

    fn register(
        &self,
        entry: &str,
        origin: FunctionOrigin,
        options: Vec<String>,
    ) -> Result<Function> {
        let kernel = HostKernel::from_entry(entry).ok_or_else(|| {
            GpuError::Compilation(format!("no host emulation for kernel {entry}"))
        })?;
        let mut state = self.state.lock();
        let function = Function(state.functions.len() as u64);
        state.functions.push(LoadedFunction {
            entry: entry.to_string(),
            kernel,
            origin,
            options,
        });
        Ok(function)
    }

    fn load_from_image(
        &self,
        image: &[u8],
        entry: &str,
        origin: FunctionOrigin,
    ) -> Result<Function> {
        let image = HostModuleImage::decode(image)?;
        if image.api != self.api {
            return Err(GpuError::InvalidBinary(format!(
                "module built for {:?}, runtime is {:?}",
                image.api, self.api
            )));
        }
        let symbol = image
            .symbol(entry)
            .ok_or_else(|| GpuError::KernelNotFound(entry.to_string()))?;
        self.register(entry, origin, symbol.options.clone())
    }

    fn check_device(device: Device) -> Result<()> {
        if device == Device(0) {
            Ok(())
        } else {
            Err(GpuError::InvalidState(format!("no device {}", device.0)))
        }
    }
}

impl Runtime for HostRuntime {
    fn api(&self) -> Api {
        self.api
    }

    fn device_properties(&self, device: Device) -> Result<DeviceProperties> {
        Self::check_device(device)?;
        Ok(self.properties.clone())
    }

    fn function_from_file(
        &self,
        device: Device,
        path: &Path,
        entry: &str,
        options: &[String],
    ) -> Result<Function> {
        Self::check_device(device)?;
        let source = std::fs::read_to_string(path)?;
        let mut search_dirs: Vec<PathBuf> = compiler::include_dirs(options);
        search_dirs.extend(compiler::source_dir(path));
        compiler::compile(
            &source,
            &path.display().to_string(),
            entry,
            &search_dirs,
            &[],
        )?;
        self.register(entry, FunctionOrigin::SourceFile, options.to_vec())
    }

    fn function_from_string(
        &self,
        device: Device,
        source: &str,
        name: &str,
        entry: &str,
        options: &[String],
        args: &[&str],
        includes: &[IncludeFile<'_>],
    ) -> Result<Function> {
        Self::check_device(device)?;
        let search_dirs = compiler::include_dirs(options);
        compiler::compile(source, name, entry, &search_dirs, includes)?;
        let all_options = args
            .iter()
            .map(|arg| (*arg).to_string())
            .chain(options.iter().cloned())
            .collect();
        self.register(entry, FunctionOrigin::SourceString, all_options)
    }

    fn function_from_binary_file(&self, path: &Path, entry: &str) -> Result<Function> {
        let image = std::fs::read(path)?;
        self.load_from_image(&image, entry, FunctionOrigin::BinaryFile)
    }

    fn function_from_binary(&self, image: &[u8], entry: &str) -> Result<Function> {
        self.load_from_image(image, entry, FunctionOrigin::BinaryImage)
    }

    fn function_attributes(&self, function: Function) -> Result<FunctionAttributes> {
        let state = self.state.lock();
        state
            .functions
            .get(function.0 as usize)
            .map(|f| f.kernel.attributes())
            .ok_or_else(|| GpuError::InvalidLaunch(format!("unknown function {function:?}")))
    }

    fn launch_1d(
        &self,
        function: Function,
        total_threads: u32,
        block_size: u32,
        args: &[KernelArg],
        _shared_bytes: u32,
        stream: Stream,
    ) -> Result<()> {
        if block_size == 0 || total_threads == 0 {
            return Err(GpuError::InvalidLaunch(format!(
                "empty launch: {total_threads} threads in blocks of {block_size}"
            )));
        }
        if block_size > self.properties.max_threads_per_block
            && self.properties.max_threads_per_block > 0
        {
            return Err(GpuError::InvalidLaunch(format!(
                "block size {block_size} exceeds device limit {}",
                self.properties.max_threads_per_block
            )));
        }

        let mut state = self.state.lock();
        let (kernel, entry) = state
            .functions
            .get(function.0 as usize)
            .map(|f| (f.kernel, f.entry.clone()))
            .ok_or_else(|| GpuError::InvalidLaunch(format!("unknown function {function:?}")))?;
        let shape = LaunchShape {
            grid_size: total_threads.div_ceil(block_size),
            block_size,
        };
        tracing::trace!("launch {entry} grid={} block={block_size}", shape.grid_size);
        state.launches.push(LaunchRecord {
            entry,
            grid_size: shape.grid_size,
            block_size,
            stream,
        });
        kernel.execute(&mut state.memory, shape, args)
    }

    fn malloc(&self, bytes: usize) -> Result<DevicePtr> {
        Ok(self.state.lock().memory.allocate(bytes))
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.state.lock().memory.free(ptr)
    }

    fn memset_async(&self, dst: DevicePtr, value: u8, bytes: usize, _stream: Stream) -> Result<()> {
        self.state.lock().memory.fill(dst, value, bytes)
    }

    fn copy_dtod_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
        _stream: Stream,
    ) -> Result<()> {
        self.state.lock().memory.copy(dst, src, bytes)
    }

    fn copy_htod_async(&self, dst: DevicePtr, src: &[u8], _stream: Stream) -> Result<()> {
        self.state.lock().memory.write_bytes(dst, src)
    }

    fn copy_dtoh(&self, dst: &mut [u8], src: DevicePtr, _stream: Stream) -> Result<()> {
        self.state.lock().memory.read_bytes(src, dst)
    }

    fn stream_synchronize(&self, _stream: Stream) -> Result<()> {
        Ok(())
    }
}
