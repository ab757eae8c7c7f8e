//! GPU radix sort for Tessera.
//!
//! This crate provides:
//! - Kernel provisioning from precompiled images or JIT-compiled source
//! - Occupancy-driven launch configuration
//! - Single-workgroup, multi-workgroup and host histogram scans
//! - A stable LSD radix sort for 32-bit keys and key/value pairs
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_gpu::{Device, DeviceBuffer, HostRuntime, Stream};
//! use tessera_sort::RadixSort;
//!
//! # fn main() -> tessera_sort::Result<()> {
//! let runtime = Arc::new(HostRuntime::new());
//! let mut sorter = RadixSort::new(runtime.clone(), Device(0))?;
//!
//! let keys = DeviceBuffer::from_slice(runtime.clone(), &[5u32, 1, 4], Stream::DEFAULT)?;
//! let sorted = DeviceBuffer::from_slice(runtime, &[0u32; 3], Stream::DEFAULT)?;
//! sorter.sort_keys(keys.as_ptr(), sorted.as_ptr(), 3, 0, 32, Stream::DEFAULT)?;
//! assert_eq!(sorted.to_vec()?, vec![1, 4, 5]);
//! # Ok(())
//! # }
//! ```

pub mod configs;
pub mod error;
pub mod launch;
pub mod provisioning;
pub mod radix_sort;
pub mod scan;

pub use error::{Result, SortError};
pub use launch::{BlockSizes, LaunchParams};
pub use provisioning::{
    EmbeddedBinaries, EmbeddedSource, KernelRole, KernelSource, KernelSourceBuilder,
    KernelSourceKind, KernelTable,
};
pub use radix_sort::{KeyValueSoA, RadixSort, RadixSortBuilder};
pub use scan::{exclusive_scan_in_place, ScanAlgorithm};
