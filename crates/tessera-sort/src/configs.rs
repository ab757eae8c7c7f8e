//! Compile-time sort constants.
//!
//! These must agree with `tessera/radix_sort_configs.h`: precompiled kernel
//! images are built with the default block sizes baked in.

/// Key bits processed per pass.
pub const N_RADIX: u32 = 8;

/// Buckets per digit.
pub const BIN_SIZE: u32 = 1 << N_RADIX;

/// Default threads per block of the count kernel.
pub const DEFAULT_COUNT_BLOCK_SIZE: u32 = 512;

/// Default threads per block of the scan kernels.
pub const DEFAULT_SCAN_BLOCK_SIZE: u32 = 1024;

/// Default threads per block of the scatter kernels.
pub const DEFAULT_SORT_BLOCK_SIZE: u32 = 512;

/// Default warp size.
pub const DEFAULT_WARP_SIZE: u32 = 32;

/// Threads in the single-pass sort block.
pub const SINGLE_SORT_WG_SIZE: u32 = 256;

/// Keys each single-pass thread holds.
pub const SINGLE_SORT_N_ITEMS_PER_WI: u32 = 12;

/// Inputs shorter than this are sorted by the single-pass kernel.
pub const SINGLE_PASS_THRESHOLD: u32 = SINGLE_SORT_WG_SIZE * SINGLE_SORT_N_ITEMS_PER_WI;

/// Count-pass grid size when the device does not report its multiprocessors.
pub const MIN_COUNT_BLOCKS: u32 = 16;

/// Highest key bit the engine sorts on.
pub const KEY_BITS: u32 = u32::BITS;
