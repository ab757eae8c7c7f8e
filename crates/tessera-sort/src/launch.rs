//! Occupancy-driven launch configuration.

use crate::configs::{
    BIN_SIZE, DEFAULT_COUNT_BLOCK_SIZE, DEFAULT_SCAN_BLOCK_SIZE, DEFAULT_SORT_BLOCK_SIZE,
    DEFAULT_WARP_SIZE, MIN_COUNT_BLOCKS,
};
use crate::error::{Result, SortError};
use serde::{Deserialize, Serialize};
use tessera_gpu::DeviceProperties;

/// Threads per block of each kernel family plus the warp size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSizes {
    pub count: u32,
    pub scan: u32,
    pub sort: u32,
    pub warp: u32,
}

impl BlockSizes {
    /// The sizes precompiled kernels are built with.
    pub const DEFAULT: Self = Self {
        count: DEFAULT_COUNT_BLOCK_SIZE,
        scan: DEFAULT_SCAN_BLOCK_SIZE,
        sort: DEFAULT_SORT_BLOCK_SIZE,
        warp: DEFAULT_WARP_SIZE,
    };

    /// Sizes for kernels JIT-compiled against `props`.
    ///
    /// Every block size is the device's maximum, falling back to the default
    /// when the device reports zero, and must be a whole number of warps.
    pub fn from_device(props: &DeviceProperties) -> Result<Self> {
        let or_default = |default: u32| {
            if props.max_threads_per_block > 0 {
                props.max_threads_per_block
            } else {
                default
            }
        };
        let sizes = Self {
            count: or_default(DEFAULT_COUNT_BLOCK_SIZE),
            scan: or_default(DEFAULT_SCAN_BLOCK_SIZE),
            sort: or_default(DEFAULT_SORT_BLOCK_SIZE),
            warp: if props.warp_size != 0 {
                props.warp_size
            } else {
                DEFAULT_WARP_SIZE
            },
        };

        for (kernel, size) in [
            ("count", sizes.count),
            ("scan", sizes.scan),
            ("sort", sizes.sort),
        ] {
            if size % sizes.warp != 0 {
                return Err(SortError::Configuration(format!(
                    "{kernel} block size {size} is not a multiple of warp size {}",
                    sizes.warp
                )));
            }
        }
        Ok(sizes)
    }
}

impl Default for BlockSizes {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Launch geometry shared by every sort call of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub count_block_size: u32,
    pub scan_block_size: u32,
    pub sort_block_size: u32,
    pub warp_size: u32,
    pub sort_warps_per_block: u32,
    /// Resident count blocks per multiprocessor
    pub occupancy: u32,
    /// Blocks of the count and scatter kernels
    pub count_blocks: u32,
    /// Blocks of the parallel scan kernel
    pub scan_blocks: u32,
}

impl LaunchParams {
    /// Derive the launch geometry for `sizes` on a device.
    pub fn compute(props: &DeviceProperties, sizes: BlockSizes) -> Self {
        let occupancy = occupancy(props, sizes);

        let mut count_blocks = if props.multiprocessor_count > 0 {
            props.multiprocessor_count.saturating_mul(occupancy)
        } else {
            MIN_COUNT_BLOCKS
        };

        // BIN_SIZE * count_blocks must be a whole number of scan blocks.
        let granularity = sizes.scan / gcd(sizes.scan, BIN_SIZE);
        if granularity > 1 {
            count_blocks = ((count_blocks / granularity) * granularity).max(granularity);
        }

        let scan_blocks = BIN_SIZE * count_blocks / sizes.scan;

        tracing::debug!(
            "Occupancy: {occupancy}, count blocks: {count_blocks}, scan blocks: {scan_blocks}"
        );

        Self {
            count_block_size: sizes.count,
            scan_block_size: sizes.scan,
            sort_block_size: sizes.sort,
            warp_size: sizes.warp,
            sort_warps_per_block: sizes.sort / sizes.warp,
            occupancy,
            count_blocks,
            scan_blocks,
        }
    }

    /// Length of the per-block, per-bucket histogram.
    pub fn histogram_len(&self) -> usize {
        BIN_SIZE as usize * self.count_blocks as usize
    }

    /// Keys owned by each count/scatter block for an input of `n` keys.
    pub fn items_per_block(&self, n: u32) -> u32 {
        n.div_ceil(self.count_blocks)
    }

    /// The block sizes these parameters were derived from.
    pub fn block_sizes(&self) -> BlockSizes {
        BlockSizes {
            count: self.count_block_size,
            scan: self.scan_block_size,
            sort: self.sort_block_size,
            warp: self.warp_size,
        }
    }
}

/// Count blocks that fit one multiprocessor by warp capacity, at least one.
fn occupancy(props: &DeviceProperties, sizes: BlockSizes) -> u32 {
    let warps_per_block = (sizes.count / sizes.warp).max(1);
    let warps_per_multiprocessor = props.max_threads_per_multiprocessor / sizes.warp;
    let occupancy = if warps_per_multiprocessor > 0 {
        warps_per_multiprocessor / warps_per_block
    } else {
        1
    };
    occupancy.max(1)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
