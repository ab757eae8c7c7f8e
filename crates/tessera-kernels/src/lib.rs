//! Radix sort kernel artifacts for Tessera.
//!
//! This crate carries the HIP kernel source of the sort engine, the compiler
//! arguments and header manifest needed to JIT-compile it from memory, and,
//! with the `precompiled` feature, module images embedded at build time.

/// Directory holding the kernel sources.
pub const KERNEL_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/");

/// Path of the kernel source file.
pub const RADIX_SORT_SOURCE_PATH: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/radix_sort_kernels.hip");

/// Name the embedded source is compiled under.
pub const RADIX_SORT_SOURCE_NAME: &str = "radix_sort_kernels.hip";

/// Kernel source text.
pub static RADIX_SORT_SOURCE: &str = include_str!("../kernels/radix_sort_kernels.hip");

/// Compiler arguments baked alongside the embedded source.
pub static RADIX_SORT_ARGS: &[&str] = &["-std=c++17", "-DTESSERA_EMBEDDED_SOURCE"];

/// Headers the source includes, as `(include name, contents)` pairs.
pub static RADIX_SORT_INCLUDES: &[(&str, &str)] = &[(
    "tessera/radix_sort_configs.h",
    include_str!("../kernels/tessera/radix_sort_configs.h"),
)];

/// Precompiled module images, one per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrecompiledImages {
    /// HIP fat binary
    pub hip: &'static [u8],
    /// CUDA fat binary
    pub cuda: &'static [u8],
}

#[cfg(feature = "precompiled")]
mod images {
    pub static HIP: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/radix_sort_kernels.hipfb"));
    pub static CUDA: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/radix_sort_kernels.fatbin"));
}

/// Module images embedded at build time. Both are empty without the
/// `precompiled` feature.
pub fn precompiled_images() -> PrecompiledImages {
    #[cfg(feature = "precompiled")]
    {
        PrecompiledImages {
            hip: images::HIP,
            cuda: images::CUDA,
        }
    }
    #[cfg(not(feature = "precompiled"))]
    {
        PrecompiledImages::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_declares_every_entry_point() {
        for entry in [
            "CountKernel",
            "ParallelExclusiveScanSingleWG",
            "ParallelExclusiveScanAllWG",
            "SortKernel",
            "SortKVKernel",
            "SortSinglePassKernel",
            "SortSinglePassKVKernel",
        ] {
            let decl = format!("__global__ void {entry}(");
            assert!(RADIX_SORT_SOURCE.contains(&decl), "missing {entry}");
        }
    }

    #[test]
    fn manifest_covers_source_includes() {
        for (name, contents) in RADIX_SORT_INCLUDES {
            assert!(RADIX_SORT_SOURCE.contains(&format!("#include <{name}>")));
            assert!(!contents.is_empty());
        }
    }

    #[test]
    fn source_path_exists() {
        assert!(std::path::Path::new(RADIX_SORT_SOURCE_PATH).is_file());
        assert!(std::path::Path::new(KERNEL_DIR)
            .join("tessera/radix_sort_configs.h")
            .is_file());
    }
}
