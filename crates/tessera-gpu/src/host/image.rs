//! Precompiled module images for the host emulator.
//!
//! An image is the `bincode` encoding of [`HostModuleImage`]: a magic tag,
//! the backend it was built for and the entry points it exports together
//! with the options they were compiled with.

use crate::capabilities::Api;
use crate::error::{GpuError, Result};
use serde::{Deserialize, Serialize};

/// Tag at the start of every host module image.
pub const IMAGE_MAGIC: [u8; 8] = *b"TSRHMI01";

/// An exported kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSymbol {
    pub name: String,
    pub options: Vec<String>,
}

/// Decoded host module image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostModuleImage {
    pub magic: [u8; 8],
    pub api: Api,
    pub kernels: Vec<KernelSymbol>,
}

impl HostModuleImage {
    /// Create an image for `api` exporting `kernels`.
    pub fn new(api: Api, kernels: Vec<KernelSymbol>) -> Self {
        Self {
            magic: IMAGE_MAGIC,
            api,
            kernels,
        }
    }

    /// Serialize to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| GpuError::InvalidBinary(e.to_string()))
    }

    /// Parse an image, checking the magic tag.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(GpuError::InvalidBinary("empty module image".to_string()));
        }
        let image: Self =
            bincode::deserialize(bytes).map_err(|e| GpuError::InvalidBinary(e.to_string()))?;
        if image.magic != IMAGE_MAGIC {
            return Err(GpuError::InvalidBinary("bad magic".to_string()));
        }
        Ok(image)
    }

    /// Look up an exported entry point.
    pub fn symbol(&self, name: &str) -> Option<&KernelSymbol> {
        self.kernels.iter().find(|k| k.name == name)
    }
}
