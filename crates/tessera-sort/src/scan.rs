//! Exclusive prefix scan of the count histogram.

use crate::error::Result;
use crate::launch::LaunchParams;
use crate::provisioning::{KernelRole, KernelTable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_gpu::{DeviceBuffer, DevicePtr, KernelArg, Runtime, Stream};

/// How the histogram is turned into scatter offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanAlgorithm {
    /// Download, scan on the host, upload.
    Host,
    /// One block walks the whole histogram.
    SingleWorkgroup,
    /// Every block scans its slice and chains totals through ready flags.
    #[default]
    Parallel,
}

/// Replace every element with the sum of the elements before it. Returns the
/// total.
pub fn exclusive_scan_in_place(values: &mut [i32]) -> i32 {
    let mut sum = 0i32;
    for v in values.iter_mut() {
        let count = *v;
        *v = sum;
        sum = sum.wrapping_add(count);
    }
    sum
}

/// Exclusive scan of `len` counts on the host, written to `offsets`.
///
/// `counts` and `offsets` may be the same buffer.
pub fn exclusive_scan_host(
    runtime: &dyn Runtime,
    counts: DevicePtr,
    offsets: DevicePtr,
    len: usize,
    stream: Stream,
) -> Result<()> {
    let mut host = vec![0i32; len];
    runtime.copy_dtoh(bytemuck::cast_slice_mut(&mut host), counts, stream)?;
    exclusive_scan_in_place(&mut host);
    runtime.copy_htod_async(offsets, bytemuck::cast_slice(&host), stream)?;
    runtime.stream_synchronize(stream)?;
    Ok(())
}

/// Scan state owned by a sort engine.
///
/// The parallel scan needs one partial total and one ready flag per scan
/// block; both live as long as the engine.
pub struct ScanEngine {
    algorithm: ScanAlgorithm,
    partial_sum: DeviceBuffer<i32>,
    is_ready: DeviceBuffer<i32>,
}

impl ScanEngine {
    /// Allocate scan state for `params`.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        algorithm: ScanAlgorithm,
        params: &LaunchParams,
        stream: Stream,
    ) -> Result<Self> {
        let mut partial_sum = DeviceBuffer::new(Arc::clone(&runtime));
        let mut is_ready = DeviceBuffer::new(runtime);
        if algorithm == ScanAlgorithm::Parallel {
            let blocks = params.scan_blocks as usize;
            partial_sum.resize_async(blocks, false, stream)?;
            is_ready.resize_async(blocks, false, stream)?;
            partial_sum.reset_async(stream)?;
            is_ready.reset_async(stream)?;
        }
        Ok(Self {
            algorithm,
            partial_sum,
            is_ready,
        })
    }

    pub fn algorithm(&self) -> ScanAlgorithm {
        self.algorithm
    }

    /// Scan `histogram` in place.
    pub fn run(
        &self,
        runtime: &dyn Runtime,
        kernels: &KernelTable,
        params: &LaunchParams,
        histogram: &DeviceBuffer<i32>,
        stream: Stream,
    ) -> Result<()> {
        let len = histogram.len();
        match self.algorithm {
            ScanAlgorithm::Host => {
                exclusive_scan_host(runtime, histogram.as_ptr(), histogram.as_ptr(), len, stream)
            }
            ScanAlgorithm::SingleWorkgroup => {
                let args = [
                    KernelArg::Ptr(histogram.as_ptr()),
                    KernelArg::Ptr(histogram.as_ptr()),
                    KernelArg::I32(len as i32),
                ];
                runtime.launch_1d(
                    kernels.get(KernelRole::ScanSingleWorkgroup),
                    params.scan_block_size,
                    params.scan_block_size,
                    &args,
                    0,
                    stream,
                )?;
                Ok(())
            }
            ScanAlgorithm::Parallel => {
                // Flags from the previous launch would let blocks read stale totals.
                self.is_ready.reset_async(stream)?;
                let args = [
                    KernelArg::Ptr(histogram.as_ptr()),
                    KernelArg::Ptr(histogram.as_ptr()),
                    KernelArg::Ptr(self.partial_sum.as_ptr()),
                    KernelArg::Ptr(self.is_ready.as_ptr()),
                ];
                runtime.launch_1d(
                    kernels.get(KernelRole::ScanParallel),
                    params.scan_blocks * params.scan_block_size,
                    params.scan_block_size,
                    &args,
                    0,
                    stream,
                )?;
                Ok(())
            }
        }
    }
}
