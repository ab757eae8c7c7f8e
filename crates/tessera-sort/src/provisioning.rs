//! Kernel provisioning.
//!
//! A [`KernelSource`] names exactly one way of obtaining the sort kernels:
//!
//! | Strategy | Needs | Tuning |
//! |---|---|---|
//! | [`KernelSource::EmbeddedPrecompiled`] | module images in memory | fixed defaults |
//! | [`KernelSource::PrecompiledFile`] | module image in an artifact directory | fixed defaults |
//! | [`KernelSource::EmbeddedSource`] | JIT compiler | derived from the device |
//! | [`KernelSource::SourceFile`] | JIT compiler, kernel source on disk | derived from the device |
//!
//! Precompiled images were built with the default block sizes baked in, so
//! only the JIT strategies may tune block sizes to the device.

use crate::error::{Result, SortError};
use crate::launch::{BlockSizes, LaunchParams};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ops::Index;
use std::path::{Path, PathBuf};
use tessera_gpu::{Api, Device, DeviceProperties, Function, IncludeFile, Runtime};

/// Kernel source file used when none is configured.
pub const DEFAULT_KERNEL_PATH: &str = tessera_kernels::RADIX_SORT_SOURCE_PATH;

/// Include directory used when none is configured.
pub const DEFAULT_INCLUDE_DIR: &str = tessera_kernels::KERNEL_DIR;

/// File name of the precompiled module image for a backend.
pub fn binary_file_name(api: Api) -> String {
    format!("radix_sort_kernels.{}", api.binary_extension())
}

/// Logical kernels of the sort engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelRole {
    Count,
    ScanSingleWorkgroup,
    ScanParallel,
    Sort,
    SortKv,
    SortSinglePass,
    SortSinglePassKv,
}

impl KernelRole {
    /// Every role, in table order.
    pub const ALL: [Self; 7] = [
        Self::Count,
        Self::ScanSingleWorkgroup,
        Self::ScanParallel,
        Self::Sort,
        Self::SortKv,
        Self::SortSinglePass,
        Self::SortSinglePassKv,
    ];

    /// Kernel entry point implementing this role.
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Count => "CountKernel",
            Self::ScanSingleWorkgroup => "ParallelExclusiveScanSingleWG",
            Self::ScanParallel => "ParallelExclusiveScanAllWG",
            Self::Sort => "SortKernel",
            Self::SortKv => "SortKVKernel",
            Self::SortSinglePass => "SortSinglePassKernel",
            Self::SortSinglePassKv => "SortSinglePassKVKernel",
        }
    }
}

/// Which strategy supplied a kernel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelSourceKind {
    EmbeddedPrecompiled,
    PrecompiledFile,
    EmbeddedSource,
    SourceFile,
}

impl KernelSourceKind {
    /// Whether kernels come as prebuilt images with baked-in block sizes.
    pub fn is_precompiled(self) -> bool {
        matches!(self, Self::EmbeddedPrecompiled | Self::PrecompiledFile)
    }
}

/// Precompiled module images for both backends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmbeddedBinaries {
    pub hip: Cow<'static, [u8]>,
    pub cuda: Cow<'static, [u8]>,
}

impl EmbeddedBinaries {
    /// Image for the given backend.
    pub fn for_api(&self, api: Api) -> &[u8] {
        match api {
            Api::Hip => &self.hip,
            Api::Cuda => &self.cuda,
        }
    }
}

impl From<tessera_kernels::PrecompiledImages> for EmbeddedBinaries {
    fn from(images: tessera_kernels::PrecompiledImages) -> Self {
        Self {
            hip: Cow::Borrowed(images.hip),
            cuda: Cow::Borrowed(images.cuda),
        }
    }
}

/// Kernel source text embedded in the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedSource {
    /// Name the source is compiled under
    pub name: &'static str,
    pub source: &'static str,
    /// Compiler arguments baked with the source
    pub args: &'static [&'static str],
    /// `(include name, contents)` pairs
    pub includes: &'static [(&'static str, &'static str)],
}

impl EmbeddedSource {
    /// The radix sort kernels shipped in `tessera-kernels`.
    pub fn radix_sort() -> Self {
        Self {
            name: tessera_kernels::RADIX_SORT_SOURCE_NAME,
            source: tessera_kernels::RADIX_SORT_SOURCE,
            args: tessera_kernels::RADIX_SORT_ARGS,
            includes: tessera_kernels::RADIX_SORT_INCLUDES,
        }
    }
}

/// The single strategy used to obtain the sort kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    /// Load functions from in-memory module images.
    EmbeddedPrecompiled(EmbeddedBinaries),
    /// Load functions from the backend's module image in `artifact_dir`.
    PrecompiledFile { artifact_dir: PathBuf },
    /// JIT-compile the embedded source text.
    EmbeddedSource(EmbeddedSource),
    /// JIT-compile a kernel source file.
    SourceFile {
        kernel_path: PathBuf,
        include_dir: PathBuf,
    },
}

impl Default for KernelSource {
    fn default() -> Self {
        Self::SourceFile {
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            include_dir: PathBuf::from(DEFAULT_INCLUDE_DIR),
        }
    }
}

impl KernelSource {
    /// Start selecting a strategy.
    pub fn builder() -> KernelSourceBuilder {
        KernelSourceBuilder::default()
    }

    /// The strategy chosen at build time by the `precompiled` and
    /// `load-from-string` cargo features.
    ///
    /// Both features select the embedded images, `precompiled` alone the image
    /// file in `artifact_dir`, `load-from-string` alone the embedded source
    /// and neither the source file.
    pub fn from_build_features(artifact_dir: impl Into<PathBuf>) -> Self {
        let precompiled = cfg!(feature = "precompiled");
        let from_string = cfg!(feature = "load-from-string");
        match (precompiled, from_string) {
            (true, true) => {
                Self::EmbeddedPrecompiled(tessera_kernels::precompiled_images().into())
            }
            (true, false) => Self::PrecompiledFile {
                artifact_dir: artifact_dir.into(),
            },
            (false, true) => Self::EmbeddedSource(EmbeddedSource::radix_sort()),
            (false, false) => Self::default(),
        }
    }

    pub fn kind(&self) -> KernelSourceKind {
        match self {
            Self::EmbeddedPrecompiled(_) => KernelSourceKind::EmbeddedPrecompiled,
            Self::PrecompiledFile { .. } => KernelSourceKind::PrecompiledFile,
            Self::EmbeddedSource(_) => KernelSourceKind::EmbeddedSource,
            Self::SourceFile { .. } => KernelSourceKind::SourceFile,
        }
    }

    /// Block sizes the kernels will run with on `props`.
    pub fn block_sizes(&self, props: &DeviceProperties) -> Result<BlockSizes> {
        if self.kind().is_precompiled() {
            Ok(BlockSizes::DEFAULT)
        } else {
            BlockSizes::from_device(props)
        }
    }
}

/// Builder accepting exactly one kernel strategy.
///
/// Selecting a second strategy is remembered and reported by
/// [`KernelSourceBuilder::build`], before any kernel is requested.
#[derive(Debug, Default)]
pub struct KernelSourceBuilder {
    selected: Option<KernelSource>,
    conflict: Option<(KernelSourceKind, KernelSourceKind)>,
}

impl KernelSourceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load kernels from in-memory module images.
    pub fn embedded_precompiled(self, binaries: EmbeddedBinaries) -> Self {
        self.select(KernelSource::EmbeddedPrecompiled(binaries))
    }

    /// Load kernels from the module image in `artifact_dir`.
    pub fn precompiled_file(self, artifact_dir: impl Into<PathBuf>) -> Self {
        self.select(KernelSource::PrecompiledFile {
            artifact_dir: artifact_dir.into(),
        })
    }

    /// JIT-compile embedded source text.
    pub fn embedded_source(self, source: EmbeddedSource) -> Self {
        self.select(KernelSource::EmbeddedSource(source))
    }

    /// JIT-compile a source file. Empty paths select the defaults.
    pub fn source_file(
        self,
        kernel_path: impl Into<PathBuf>,
        include_dir: impl Into<PathBuf>,
    ) -> Self {
        self.select(KernelSource::SourceFile {
            kernel_path: or_default(kernel_path.into(), DEFAULT_KERNEL_PATH),
            include_dir: or_default(include_dir.into(), DEFAULT_INCLUDE_DIR),
        })
    }

    /// Finish. With nothing selected the default source file is used.
    pub fn build(self) -> Result<KernelSource> {
        if let Some((first, second)) = self.conflict {
            return Err(SortError::Configuration(format!(
                "kernel strategies {first:?} and {second:?} cannot coexist"
            )));
        }
        Ok(self.selected.unwrap_or_default())
    }

    fn select(mut self, source: KernelSource) -> Self {
        match &self.selected {
            Some(existing) if self.conflict.is_none() => {
                self.conflict = Some((existing.kind(), source.kind()));
            }
            Some(_) => {}
            None => self.selected = Some(source),
        }
        self
    }
}

fn or_default(path: PathBuf, default: &str) -> PathBuf {
    if path.as_os_str().is_empty() {
        PathBuf::from(default)
    } else {
        path
    }
}

/// One launchable function per [`KernelRole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelTable {
    functions: [Function; 7],
    source: KernelSourceKind,
}

impl KernelTable {
    /// Function implementing `role`.
    pub fn get(&self, role: KernelRole) -> Function {
        self.functions[role as usize]
    }

    /// Strategy the table was populated with.
    pub fn source(&self) -> KernelSourceKind {
        self.source
    }

    /// `(role, function)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (KernelRole, Function)> + '_ {
        KernelRole::ALL.iter().map(|&role| (role, self.get(role)))
    }
}

impl Index<KernelRole> for KernelTable {
    type Output = Function;

    fn index(&self, role: KernelRole) -> &Function {
        &self.functions[role as usize]
    }
}

/// JIT compiler options for kernels tuned to `params`.
pub fn compile_options(
    props: &DeviceProperties,
    include_dir: &Path,
    params: &LaunchParams,
) -> Vec<String> {
    let fast_math = if props.is_nvidia() {
        "--use_fast_math"
    } else {
        "-ffast-math"
    };
    vec![
        fast_math.to_string(),
        format!("-I{}", include_dir.display()),
        "-DOVERWRITE".to_string(),
        format!("-DCOUNT_WG_SIZE_VAL={}", params.count_block_size),
        format!("-DSCAN_WG_SIZE_VAL={}", params.scan_block_size),
        format!("-DSORT_WG_SIZE_VAL={}", params.sort_block_size),
        format!(
            "-DSORT_NUM_WARPS_PER_BLOCK_VAL={}",
            params.sort_warps_per_block
        ),
    ]
}

/// Obtain every kernel of the table through `source`.
pub fn resolve_kernels(
    runtime: &dyn Runtime,
    device: Device,
    props: &DeviceProperties,
    source: &KernelSource,
    params: &LaunchParams,
    log_kernels: bool,
) -> Result<KernelTable> {
    let api = runtime.api();
    let mut functions = Vec::with_capacity(KernelRole::ALL.len());

    match source {
        KernelSource::EmbeddedPrecompiled(binaries) => {
            let image = binaries.for_api(api);
            if image.is_empty() {
                return Err(SortError::Configuration(format!(
                    "no embedded kernel image for {api:?}"
                )));
            }
            tracing::info!(
                "Loading embedded pre-compiled kernels ({} bytes)",
                image.len()
            );
            for role in KernelRole::ALL {
                functions.push(runtime.function_from_binary(image, role.entry_point())?);
            }
        }
        KernelSource::PrecompiledFile { artifact_dir } => {
            let path = artifact_dir.join(binary_file_name(api));
            tracing::info!("Loading pre-compiled kernels at path: {}", path.display());
            for role in KernelRole::ALL {
                let function = runtime.function_from_binary_file(&path, role.entry_point())?;
                functions.push(function);
            }
        }
        KernelSource::EmbeddedSource(embedded) => {
            tracing::info!("Compiling embedded kernels: {}", embedded.name);
            let options = compile_options(props, Path::new(DEFAULT_INCLUDE_DIR), params);
            let includes: Vec<IncludeFile<'_>> = embedded
                .includes
                .iter()
                .map(|&(name, contents)| IncludeFile { name, contents })
                .collect();
            for role in KernelRole::ALL {
                functions.push(runtime.function_from_string(
                    device,
                    embedded.source,
                    embedded.name,
                    role.entry_point(),
                    &options,
                    embedded.args,
                    &includes,
                )?);
            }
        }
        KernelSource::SourceFile {
            kernel_path,
            include_dir,
        } => {
            tracing::info!(
                "Compiling kernels at path: {} in: {}",
                kernel_path.display(),
                include_dir.display()
            );
            let options = compile_options(props, include_dir, params);
            for role in KernelRole::ALL {
                functions.push(runtime.function_from_file(
                    device,
                    kernel_path,
                    role.entry_point(),
                    &options,
                )?);
            }
        }
    }

    let functions: [Function; 7] = functions
        .try_into()
        .map_err(|_| SortError::Configuration("incomplete kernel table".to_string()))?;
    let table = KernelTable {
        functions,
        source: source.kind(),
    };

    if log_kernels {
        for (role, function) in table.iter() {
            let attrs = runtime.function_attributes(function)?;
            tracing::info!(
                "Function: {}, vgpr : shared : const = {} : {} : {}",
                role.entry_point(),
                attrs.num_regs,
                attrs.shared_size_bytes,
                attrs.const_size_bytes
            );
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::BIN_SIZE;
    use tessera_gpu::host::FunctionOrigin;
    use tessera_gpu::HostRuntime;

    fn params_for(
        runtime: &HostRuntime,
        source: &KernelSource,
    ) -> (DeviceProperties, LaunchParams) {
        let props = runtime.device_properties(Device(0)).unwrap();
        let sizes = source.block_sizes(&props).unwrap();
        (props.clone(), LaunchParams::compute(&props, sizes))
    }

    #[test]
    fn builder_defaults_to_source_file() {
        let source = KernelSource::builder().build().unwrap();
        assert_eq!(source, KernelSource::default());
        assert_eq!(source.kind(), KernelSourceKind::SourceFile);
    }

    #[test]
    fn builder_rejects_two_strategies() {
        let err = KernelSource::builder()
            .precompiled_file("/opt/tessera")
            .embedded_source(EmbeddedSource::radix_sort())
            .build()
            .unwrap_err();
        assert!(matches!(err, SortError::Configuration(_)));
        assert!(err.to_string().contains("PrecompiledFile"));
        assert!(err.to_string().contains("EmbeddedSource"));
    }

    #[test]
    fn empty_paths_select_defaults() {
        let source = KernelSource::builder().source_file("", "").build().unwrap();
        assert_eq!(source, KernelSource::default());
    }

    #[test]
    fn binary_names_per_backend() {
        assert_eq!(binary_file_name(Api::Hip), "radix_sort_kernels.hipfb");
        assert_eq!(binary_file_name(Api::Cuda), "radix_sort_kernels.fatbin");
    }

    #[test]
    fn precompiled_strategies_use_fixed_tuning() {
        let props = DeviceProperties {
            max_threads_per_block: 256,
            warp_size: 64,
            ..DeviceProperties::default()
        };
        let source = KernelSource::PrecompiledFile {
            artifact_dir: PathBuf::from("."),
        };
        assert_eq!(source.block_sizes(&props).unwrap(), BlockSizes::DEFAULT);
        let derived = KernelSource::default().block_sizes(&props).unwrap();
        assert_eq!(derived.count, 256);
        assert_eq!(derived.warp, 64);
    }

    #[test]
    fn options_follow_device_and_params() {
        let runtime = HostRuntime::new();
        let (props, params) = params_for(&runtime, &KernelSource::default());
        let options = compile_options(&props, Path::new("inc/"), &params);
        assert_eq!(options[0], "-ffast-math");
        assert_eq!(options[1], "-Iinc/");
        assert_eq!(options[2], "-DOVERWRITE");
        assert_eq!(options[3], "-DCOUNT_WG_SIZE_VAL=1024");
        assert_eq!(options[6], "-DSORT_NUM_WARPS_PER_BLOCK_VAL=32");

        let nvidia = DeviceProperties {
            name: "NVIDIA RTX A6000".to_string(),
            ..props
        };
        assert_eq!(
            compile_options(&nvidia, Path::new("inc/"), &params)[0],
            "--use_fast_math"
        );
    }

    #[test]
    fn source_file_populates_every_role() {
        let runtime = HostRuntime::new();
        let source = KernelSource::default();
        let (props, params) = params_for(&runtime, &source);
        let table = resolve_kernels(&runtime, Device(0), &props, &source, &params, true)
            .unwrap();

        assert_eq!(table.source(), KernelSourceKind::SourceFile);
        for (role, function) in table.iter() {
            assert_eq!(
                runtime.function_entry(function).as_deref(),
                Some(role.entry_point())
            );
            assert_eq!(
                runtime.function_origin(function),
                Some(FunctionOrigin::SourceFile)
            );
        }
        assert_eq!(table[KernelRole::Sort], table.get(KernelRole::Sort));
    }

    #[test]
    fn embedded_source_passes_baked_args() {
        let runtime = HostRuntime::new();
        let source = KernelSource::EmbeddedSource(EmbeddedSource::radix_sort());
        let (props, params) = params_for(&runtime, &source);
        let table = resolve_kernels(&runtime, Device(0), &props, &source, &params, false)
            .unwrap();

        let options = runtime
            .function_options(table.get(KernelRole::Count))
            .unwrap();
        assert_eq!(options[0], "-std=c++17");
        assert!(options.contains(&format!(
            "-DSCAN_WG_SIZE_VAL={}",
            params.scan_block_size
        )));
    }

    #[test]
    fn missing_entry_point_propagates() {
        static PARTIAL: &str = "extern \"C\" __global__ void CountKernel(int* a) {}";
        let runtime = HostRuntime::new();
        let source = KernelSource::EmbeddedSource(EmbeddedSource {
            name: "partial.hip",
            source: PARTIAL,
            args: &[],
            includes: &[],
        });
        let (props, params) = params_for(&runtime, &source);
        let err = resolve_kernels(&runtime, Device(0), &props, &source, &params, false)
            .unwrap_err();
        assert!(matches!(
            err,
            SortError::Gpu(tessera_gpu::GpuError::KernelNotFound(_))
        ));
    }

    #[test]
    fn embedded_images_pick_active_backend() {
        let runtime = HostRuntime::with_properties(Api::Cuda, DeviceProperties::default());
        let cuda_image = runtime
            .compile_image(tessera_kernels::RADIX_SORT_SOURCE, &[])
            .unwrap();
        let source = KernelSource::EmbeddedPrecompiled(EmbeddedBinaries {
            hip: Cow::Borrowed(&[]),
            cuda: Cow::Owned(cuda_image),
        });
        let (props, params) = params_for(&runtime, &source);
        assert_eq!(
            params.scan_block_size * params.scan_blocks,
            BIN_SIZE * params.count_blocks
        );

        let table = resolve_kernels(&runtime, Device(0), &props, &source, &params, false)
            .unwrap();
        assert_eq!(table.source(), KernelSourceKind::EmbeddedPrecompiled);
        assert_eq!(
            runtime.function_origin(table.get(KernelRole::SortSinglePassKv)),
            Some(FunctionOrigin::BinaryImage)
        );

        let hip_runtime = HostRuntime::new();
        let err = resolve_kernels(&hip_runtime, Device(0), &props, &source, &params, false)
            .unwrap_err();
        assert!(matches!(err, SortError::Configuration(_)));
    }
}
