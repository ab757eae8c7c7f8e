//! GPU runtime error types.

use thiserror::Error;

/// Errors reported by a [`Runtime`](crate::Runtime) implementation.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The requested entry point does not exist in the source or binary.
    #[error("Kernel entry point not found: {0}")]
    KernelNotFound(String),

    /// Kernel compilation failed.
    #[error("Kernel compilation failed: {0}")]
    Compilation(String),

    /// A precompiled module image could not be decoded or targets another backend.
    #[error("Invalid kernel binary: {0}")]
    InvalidBinary(String),

    /// I/O error while reading kernel sources or binaries.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// A device pointer does not refer to a live allocation.
    #[error("Invalid device pointer: {0}")]
    InvalidPointer(String),

    /// Kernel launch rejected (unknown function, bad arguments, bad grid).
    #[error("Invalid kernel launch: {0}")]
    InvalidLaunch(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
