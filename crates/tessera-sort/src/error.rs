//! Sort engine error types.

use tessera_gpu::GpuError;
use thiserror::Error;

/// Errors reported by the sort engine.
#[derive(Error, Debug)]
pub enum SortError {
    /// The engine cannot be configured for this build or device.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested key bit range is empty or exceeds 32 bits.
    #[error("Invalid bit range [{start}, {end})")]
    InvalidBitRange { start: u32, end: u32 },

    /// Source and destination of a multi-pass sort are the same buffer.
    #[error("Source and destination buffers alias")]
    AliasedBuffers,

    /// The element count does not fit the kernels' 32-bit signed indices.
    #[error("Input of {0} elements exceeds the kernel index range")]
    InputTooLarge(usize),

    /// Device runtime error.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, SortError>;
