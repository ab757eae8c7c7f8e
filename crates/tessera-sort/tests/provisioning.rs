//! Every kernel strategy drives the same sort.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_gpu::host::FunctionOrigin;
use tessera_gpu::{Api, Device, DeviceBuffer, DeviceProperties, GpuError, HostRuntime, Stream};
use tessera_sort::provisioning::binary_file_name;
use tessera_sort::{
    EmbeddedBinaries, EmbeddedSource, KernelRole, KernelSource, KernelSourceKind, LaunchParams,
    RadixSort, SortError,
};

/// Scratch directory removed on drop.
struct ArtifactDir(PathBuf);

impl ArtifactDir {
    fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "tessera-sort-{tag}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }
}

impl Drop for ArtifactDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn bake(runtime: &HostRuntime) -> Vec<u8> {
    runtime
        .compile_image(tessera_kernels::RADIX_SORT_SOURCE, &[])
        .unwrap()
}

fn sorts_correctly(host: &Arc<HostRuntime>, sorter: &mut RadixSort) {
    let keys: Vec<u32> = (0..10_000u32).map(|i| i.wrapping_mul(0x9e37_79b9)).collect();
    let src = DeviceBuffer::from_slice(host.clone(), &keys, Stream::DEFAULT).unwrap();
    let dst = DeviceBuffer::from_slice(host.clone(), &vec![0u32; keys.len()], Stream::DEFAULT)
        .unwrap();
    let len = keys.len();
    sorter
        .sort_keys(src.as_ptr(), dst.as_ptr(), len, 0, 32, Stream::DEFAULT)
        .unwrap();

    let mut expected = keys;
    expected.sort_unstable();
    assert_eq!(dst.to_vec().unwrap(), expected);
}

fn origins(host: &HostRuntime, sorter: &RadixSort) -> Vec<FunctionOrigin> {
    sorter
        .kernels()
        .iter()
        .map(|(_, function)| host.function_origin(function).unwrap())
        .collect()
}

#[test]
fn source_file_strategy() {
    let host = Arc::new(HostRuntime::new());
    let mut sorter = RadixSort::builder(host.clone(), Device(0))
        .kernel_source(KernelSource::default())
        .log_kernels(true)
        .build()
        .unwrap();

    assert_eq!(sorter.kernel_source_kind(), KernelSourceKind::SourceFile);
    assert!(origins(&host, &sorter)
        .iter()
        .all(|&o| o == FunctionOrigin::SourceFile));
    sorts_correctly(&host, &mut sorter);
}

#[test]
fn embedded_source_strategy() {
    let host = Arc::new(HostRuntime::new());
    let source = KernelSource::builder()
        .embedded_source(EmbeddedSource::radix_sort())
        .build()
        .unwrap();
    let mut sorter = RadixSort::builder(host.clone(), Device(0))
        .kernel_source(source)
        .build()
        .unwrap();

    assert_eq!(
        sorter.kernel_source_kind(),
        KernelSourceKind::EmbeddedSource
    );
    assert!(origins(&host, &sorter)
        .iter()
        .all(|&o| o == FunctionOrigin::SourceString));
    sorts_correctly(&host, &mut sorter);
}

#[test]
fn embedded_precompiled_strategy() {
    let host = Arc::new(HostRuntime::new());
    let binaries = EmbeddedBinaries {
        hip: Cow::Owned(bake(&host)),
        cuda: Cow::Borrowed(&[]),
    };
    let source = KernelSource::builder()
        .embedded_precompiled(binaries)
        .build()
        .unwrap();
    let mut sorter = RadixSort::builder(host.clone(), Device(0))
        .kernel_source(source)
        .build()
        .unwrap();

    assert_eq!(
        sorter.kernel_source_kind(),
        KernelSourceKind::EmbeddedPrecompiled
    );
    assert!(origins(&host, &sorter)
        .iter()
        .all(|&o| o == FunctionOrigin::BinaryImage));
    sorts_correctly(&host, &mut sorter);
}

#[test]
fn precompiled_file_strategy_picks_backend_binary() {
    let dir = ArtifactDir::new("file");
    let hip = Arc::new(HostRuntime::new());
    let cuda = Arc::new(HostRuntime::with_properties(
        Api::Cuda,
        DeviceProperties {
            name: "NVIDIA Host Emulator".to_string(),
            ..DeviceProperties::default()
        },
    ));
    std::fs::write(dir.0.join(binary_file_name(Api::Cuda)), bake(&cuda)).unwrap();

    let source = KernelSource::builder()
        .precompiled_file(&dir.0)
        .build()
        .unwrap();

    // Only the CUDA image exists so far.
    let err = RadixSort::builder(hip.clone(), Device(0))
        .kernel_source(source.clone())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SortError::Gpu(GpuError::Io(_))));

    let mut sorter = RadixSort::builder(cuda.clone(), Device(0))
        .kernel_source(source.clone())
        .build()
        .unwrap();
    assert_eq!(
        sorter.kernel_source_kind(),
        KernelSourceKind::PrecompiledFile
    );
    assert!(origins(&cuda, &sorter)
        .iter()
        .all(|&o| o == FunctionOrigin::BinaryFile));
    sorts_correctly(&cuda, &mut sorter);

    std::fs::write(dir.0.join(binary_file_name(Api::Hip)), bake(&hip)).unwrap();
    let mut sorter = RadixSort::builder(hip.clone(), Device(0))
        .kernel_source(source)
        .build()
        .unwrap();
    sorts_correctly(&hip, &mut sorter);
}

#[test]
fn precompiled_kernels_keep_default_tuning() {
    let props = DeviceProperties {
        max_threads_per_block: 2048,
        warp_size: 64,
        ..DeviceProperties::default()
    };
    let host = Arc::new(HostRuntime::with_properties(Api::Hip, props.clone()));
    let binaries = EmbeddedBinaries {
        hip: Cow::Owned(bake(&host)),
        cuda: Cow::Borrowed(&[]),
    };
    let sorter = RadixSort::builder(host.clone(), Device(0))
        .kernel_source(KernelSource::EmbeddedPrecompiled(binaries))
        .build()
        .unwrap();

    let params = sorter.launch_params();
    assert_eq!(params.count_block_size, 512);
    assert_eq!(params.scan_block_size, 1024);
    assert_eq!(params.sort_block_size, 512);
    assert_eq!(params.warp_size, 32);

    let jit = RadixSort::new(host, Device(0)).unwrap();
    assert_eq!(jit.launch_params().count_block_size, 2048);
    assert_eq!(jit.launch_params().warp_size, 64);
}

#[test]
fn jit_options_carry_launch_params() {
    let host = Arc::new(HostRuntime::new());
    let sorter = RadixSort::new(host.clone(), Device(0)).unwrap();
    let params: &LaunchParams = sorter.launch_params();

    let options = host
        .function_options(sorter.kernels().get(KernelRole::Sort))
        .unwrap();
    assert_eq!(options[0], "-ffast-math");
    assert!(options[1].starts_with("-I"));
    assert_eq!(options[2], "-DOVERWRITE");
    assert_eq!(
        &options[3..],
        [
            format!("-DCOUNT_WG_SIZE_VAL={}", params.count_block_size),
            format!("-DSCAN_WG_SIZE_VAL={}", params.scan_block_size),
            format!("-DSORT_WG_SIZE_VAL={}", params.sort_block_size),
            format!(
                "-DSORT_NUM_WARPS_PER_BLOCK_VAL={}",
                params.sort_warps_per_block
            ),
        ]
    );
}

#[test]
fn misaligned_device_block_size_fails_configuration() {
    let props = DeviceProperties {
        max_threads_per_block: 1000,
        warp_size: 64,
        ..DeviceProperties::default()
    };
    let host = Arc::new(HostRuntime::with_properties(Api::Hip, props));
    let err = RadixSort::new(host.clone(), Device(0)).err().unwrap();
    assert!(matches!(err, SortError::Configuration(_)));
    assert_eq!(host.live_allocations(), 0);
}

#[test]
fn conflicting_strategies_fail_before_any_kernel() {
    let host = Arc::new(HostRuntime::new());
    let err = KernelSource::builder()
        .precompiled_file("/nonexistent")
        .embedded_source(EmbeddedSource::radix_sort())
        .build()
        .unwrap_err();
    assert!(matches!(err, SortError::Configuration(_)));
    assert!(host.launch_log().is_empty());
}

#[test]
fn missing_kernel_source_file_is_reported() {
    let host = Arc::new(HostRuntime::new());
    let source = KernelSource::builder()
        .source_file("/nonexistent/radix_sort_kernels.hip", "")
        .build()
        .unwrap();
    let err = RadixSort::builder(host, Device(0))
        .kernel_source(source)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SortError::Gpu(GpuError::Io(_))));
}

#[cfg(not(any(feature = "precompiled", feature = "load-from-string")))]
#[test]
fn default_build_compiles_from_source_file() {
    let source = KernelSource::from_build_features("/opt/tessera/lib");
    assert_eq!(source, KernelSource::default());
}

#[cfg(all(not(feature = "precompiled"), feature = "load-from-string"))]
#[test]
fn load_from_string_build_uses_embedded_source() {
    let source = KernelSource::from_build_features("/opt/tessera/lib");
    assert_eq!(
        source,
        KernelSource::EmbeddedSource(EmbeddedSource::radix_sort())
    );
    assert_eq!(source.kind(), KernelSourceKind::EmbeddedSource);
}

#[cfg(all(feature = "precompiled", not(feature = "load-from-string")))]
#[test]
fn precompiled_build_reads_artifact_dir() {
    let source = KernelSource::from_build_features("/opt/tessera/lib");
    assert_eq!(
        source,
        KernelSource::PrecompiledFile {
            artifact_dir: PathBuf::from("/opt/tessera/lib"),
        }
    );
}

#[cfg(all(feature = "precompiled", feature = "load-from-string"))]
#[test]
fn precompiled_string_build_embeds_images() {
    let source = KernelSource::from_build_features("/opt/tessera/lib");
    assert_eq!(
        source,
        KernelSource::EmbeddedPrecompiled(tessera_kernels::precompiled_images().into())
    );
    assert_eq!(source.kind(), KernelSourceKind::EmbeddedPrecompiled);
}
