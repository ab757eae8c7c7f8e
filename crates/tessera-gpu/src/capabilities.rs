//! Device capability reporting.

use serde::{Deserialize, Serialize};

/// GPU runtime backend behind the unified abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Api {
    /// AMD HIP.
    Hip,
    /// NVIDIA CUDA.
    Cuda,
}

impl Api {
    /// File extension used for precompiled module images of this backend.
    pub fn binary_extension(self) -> &'static str {
        match self {
            Self::Hip => "hipfb",
            Self::Cuda => "fatbin",
        }
    }
}

/// Device properties as reported by the runtime.
///
/// Zero means "not reported" for every numeric limit; callers fall back to
/// their own defaults in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Device name
    pub name: String,
    /// Maximum threads per block
    pub max_threads_per_block: u32,
    /// Hardware warp (wavefront) size
    pub warp_size: u32,
    /// Number of multiprocessors (SMs / CUs)
    pub multiprocessor_count: u32,
    /// Maximum resident threads per multiprocessor
    pub max_threads_per_multiprocessor: u32,
}

impl DeviceProperties {
    /// Whether the device is driven by the NVIDIA toolchain.
    pub fn is_nvidia(&self) -> bool {
        self.name.contains("NVIDIA")
    }

    /// Get a human-readable summary of the properties.
    pub fn summary(&self) -> String {
        format!(
            "{} - {} threads/block, warp {}, {} MPs x {} threads",
            self.name,
            self.max_threads_per_block,
            self.warp_size,
            self.multiprocessor_count,
            self.max_threads_per_multiprocessor,
        )
    }
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self {
            name: "Tessera Host Emulator".to_string(),
            max_threads_per_block: 1024,
            warp_size: 32,
            multiprocessor_count: 8,
            max_threads_per_multiprocessor: 2048,
        }
    }
}
