//! Host emulation of the radix sort kernels.
//!
//! Each emulated kernel follows the argument ABI and memory layout of the
//! device kernels in `tessera-kernels`: histograms are digit-major
//! (`histogram[digit * num_blocks + block]`) and block `b` owns keys
//! `[b * items_per_block, (b + 1) * items_per_block)`.

use super::memory::HostMemory;
use crate::error::{GpuError, Result};
use crate::runtime::{DevicePtr, FunctionAttributes, KernelArg};

/// Bits per digit the kernels are built with.
const DIGIT_BITS: u32 = 8;

/// Buckets per digit.
const BIN_SIZE: usize = 1 << DIGIT_BITS;

/// Kernels the host runtime can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostKernel {
    Count,
    ScanSingleWorkgroup,
    ScanParallel,
    Sort,
    SortKv,
    SortSinglePass,
    SortSinglePassKv,
}

/// Grid geometry of a launch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LaunchShape {
    pub grid_size: u32,
    pub block_size: u32,
}

impl HostKernel {
    pub(crate) fn from_entry(entry: &str) -> Option<Self> {
        Some(match entry {
            "CountKernel" => Self::Count,
            "ParallelExclusiveScanSingleWG" => Self::ScanSingleWorkgroup,
            "ParallelExclusiveScanAllWG" => Self::ScanParallel,
            "SortKernel" => Self::Sort,
            "SortKVKernel" => Self::SortKv,
            "SortSinglePassKernel" => Self::SortSinglePass,
            "SortSinglePassKVKernel" => Self::SortSinglePassKv,
            _ => return None,
        })
    }

    /// Footprint reported for the emulated kernel.
    pub(crate) fn attributes(self) -> FunctionAttributes {
        let (num_regs, shared_size_bytes) = match self {
            Self::Count => (24, (BIN_SIZE * 4) as u32),
            Self::ScanSingleWorkgroup | Self::ScanParallel => (16, 4 * 1024),
            Self::Sort => (40, (BIN_SIZE * 4 * 2) as u32),
            Self::SortKv => (48, (BIN_SIZE * 4 * 2) as u32),
            Self::SortSinglePass => (64, 12 * 1024 * 2),
            Self::SortSinglePassKv => (72, 12 * 1024 * 4),
        };
        FunctionAttributes {
            num_regs,
            shared_size_bytes,
            const_size_bytes: 0,
        }
    }

    pub(crate) fn execute(
        self,
        memory: &mut HostMemory,
        shape: LaunchShape,
        args: &[KernelArg],
    ) -> Result<()> {
        let args = Args::new(self, args);
        match self {
            Self::Count => count(memory, shape, &args),
            Self::ScanSingleWorkgroup => scan_single_workgroup(memory, shape, &args),
            Self::ScanParallel => scan_parallel(memory, shape, &args),
            Self::Sort => scatter(memory, shape, &args, false),
            Self::SortKv => scatter(memory, shape, &args, true),
            Self::SortSinglePass => sort_single_pass(memory, shape, &args, false),
            Self::SortSinglePassKv => sort_single_pass(memory, shape, &args, true),
        }
    }
}

/// Positional argument reader.
struct Args<'a> {
    kernel: HostKernel,
    args: &'a [KernelArg],
}

impl<'a> Args<'a> {
    fn new(kernel: HostKernel, args: &'a [KernelArg]) -> Self {
        Self { kernel, args }
    }

    fn expect_len(&self, len: usize) -> Result<()> {
        if self.args.len() == len {
            Ok(())
        } else {
            Err(GpuError::InvalidLaunch(format!(
                "{:?} takes {len} arguments, got {}",
                self.kernel,
                self.args.len()
            )))
        }
    }

    fn ptr(&self, index: usize) -> Result<DevicePtr> {
        match self.args.get(index) {
            Some(KernelArg::Ptr(ptr)) => Ok(*ptr),
            other => Err(self.mismatch(index, "pointer", other)),
        }
    }

    fn int(&self, index: usize) -> Result<usize> {
        match self.args.get(index) {
            Some(KernelArg::I32(v)) if *v >= 0 => Ok(*v as usize),
            Some(KernelArg::U32(v)) => Ok(*v as usize),
            other => Err(self.mismatch(index, "non-negative integer", other)),
        }
    }

    fn bits(&self, index: usize) -> Result<u32> {
        let v = self.int(index)?;
        if v > 32 {
            return Err(GpuError::InvalidLaunch(format!(
                "{:?}: bit index {v} out of range",
                self.kernel
            )));
        }
        Ok(v as u32)
    }

    fn mismatch(&self, index: usize, expected: &str, got: Option<&KernelArg>) -> GpuError {
        GpuError::InvalidLaunch(format!(
            "{:?}: argument {index} should be a {expected}, got {got:?}",
            self.kernel
        ))
    }
}

/// Extract the digit of `key` in bits `[start, start + width)`.
fn digit(key: u32, start: u32, width: u32) -> usize {
    ((u64::from(key) >> start) & ((1u64 << width) - 1)) as usize
}

fn expect_grid(kernel: &str, shape: LaunchShape, blocks: u32) -> Result<()> {
    if shape.grid_size == blocks {
        Ok(())
    } else {
        Err(GpuError::InvalidLaunch(format!(
            "{kernel} expects {blocks} blocks, launched with {}",
            shape.grid_size
        )))
    }
}

/// Checked digit width of a multi-pass slice.
fn slice_width(start: u32, end: u32) -> Result<u32> {
    if start < end && end - start <= DIGIT_BITS {
        Ok(end - start)
    } else {
        Err(GpuError::InvalidLaunch(format!(
            "bit slice [{start}, {end}) is not a single digit"
        )))
    }
}

/// `CountKernel(keys, histogram, n, items_per_block, start_bit, end_bit, num_blocks)`
fn count(memory: &mut HostMemory, shape: LaunchShape, args: &Args<'_>) -> Result<()> {
    args.expect_len(7)?;
    let keys_ptr = args.ptr(0)?;
    let histogram_ptr = args.ptr(1)?;
    let n = args.int(2)?;
    let items_per_block = args.int(3)?;
    let start = args.bits(4)?;
    let width = slice_width(start, args.bits(5)?)?;
    let num_blocks = args.int(6)?;
    expect_grid("CountKernel", shape, num_blocks as u32)?;

    let keys = memory.read_u32(keys_ptr, n)?;
    let mut histogram = vec![0i32; BIN_SIZE * num_blocks];
    for (block, chunk) in keys.chunks(items_per_block.max(1)).enumerate() {
        if block >= num_blocks {
            return Err(GpuError::InvalidLaunch(format!(
                "{n} keys do not fit {num_blocks} blocks of {items_per_block}"
            )));
        }
        for &key in chunk {
            histogram[digit(key, start, width) * num_blocks + block] += 1;
        }
    }
    memory.write_i32(histogram_ptr, &histogram)
}

/// `ParallelExclusiveScanSingleWG(input, output, len)`
fn scan_single_workgroup(
    memory: &mut HostMemory,
    shape: LaunchShape,
    args: &Args<'_>,
) -> Result<()> {
    args.expect_len(3)?;
    expect_grid("ParallelExclusiveScanSingleWG", shape, 1)?;
    let len = args.int(2)?;
    let mut values = memory.read_i32(args.ptr(0)?, len)?;
    let mut sum = 0i32;
    for v in &mut values {
        let count = *v;
        *v = sum;
        sum += count;
    }
    memory.write_i32(args.ptr(1)?, &values)
}

/// `ParallelExclusiveScanAllWG(input, output, partial_sum, is_ready)`
///
/// Blocks run one after another in index order. Each block publishes its
/// local total and raises its ready flag, then folds in the totals of all
/// preceding blocks. A flag that was already raised when the launch began
/// counts as published before the block behind it ran, so the stale total
/// left in `partial_sum` is consumed in its place.
fn scan_parallel(memory: &mut HostMemory, shape: LaunchShape, args: &Args<'_>) -> Result<()> {
    args.expect_len(4)?;
    let blocks = shape.grid_size as usize;
    let block_size = shape.block_size as usize;
    let total = blocks * block_size;

    let mut output = memory.read_i32(args.ptr(0)?, total)?;
    let stale = memory.read_i32(args.ptr(2)?, blocks)?;
    let raised: Vec<bool> = memory
        .read_i32(args.ptr(3)?, blocks)?
        .into_iter()
        .map(|flag| flag != 0)
        .collect();

    let mut partial = stale.clone();
    let mut prefix = 0i32;
    for (block, out) in output.chunks_mut(block_size.max(1)).enumerate() {
        let mut local = 0i32;
        for o in out.iter_mut() {
            let count = *o;
            *o = local;
            local = local.wrapping_add(count);
        }
        partial[block] = local;

        for o in out.iter_mut() {
            *o = o.wrapping_add(prefix);
        }
        let published = if raised[block] { stale[block] } else { local };
        prefix = prefix.wrapping_add(published);
    }

    memory.write_i32(args.ptr(1)?, &output)?;
    memory.write_i32(args.ptr(2)?, &partial)?;
    memory.write_i32(args.ptr(3)?, &vec![1; blocks])
}

/// `SortKernel(src, dst, histogram, n, items_per_block, start_bit, end_bit, num_blocks)`
/// and `SortKVKernel(src_key, src_value, dst_key, dst_value, histogram, ...)`.
fn scatter(
    memory: &mut HostMemory,
    shape: LaunchShape,
    args: &Args<'_>,
    with_values: bool,
) -> Result<()> {
    let (src_key, src_value, dst_key, dst_value, rest) = if with_values {
        args.expect_len(10)?;
        (
            args.ptr(0)?,
            Some(args.ptr(1)?),
            args.ptr(2)?,
            Some(args.ptr(3)?),
            4,
        )
    } else {
        args.expect_len(8)?;
        (args.ptr(0)?, None, args.ptr(1)?, None, 2)
    };
    let histogram_ptr = args.ptr(rest)?;
    let n = args.int(rest + 1)?;
    let items_per_block = args.int(rest + 2)?.max(1);
    let start = args.bits(rest + 3)?;
    let width = slice_width(start, args.bits(rest + 4)?)?;
    let num_blocks = args.int(rest + 5)?;
    expect_grid("SortKernel", shape, num_blocks as u32)?;

    let keys = memory.read_u32(src_key, n)?;
    let values = src_value.map(|ptr| memory.read_u32(ptr, n)).transpose()?;
    let mut offsets = memory.read_i32(histogram_ptr, BIN_SIZE * num_blocks)?;

    let mut out_keys = vec![0u32; n];
    let mut out_values = values.as_ref().map(|_| vec![0u32; n]);

    for (i, &key) in keys.iter().enumerate() {
        let block = i / items_per_block;
        let slot = digit(key, start, width) * num_blocks + block;
        let pos = offsets[slot] as usize;
        if pos >= n {
            return Err(GpuError::InvalidLaunch(format!(
                "scatter target {pos} out of range for {n} keys"
            )));
        }
        offsets[slot] += 1;
        out_keys[pos] = key;
        if let (Some(out), Some(values)) = (out_values.as_mut(), values.as_ref()) {
            out[pos] = values[i];
        }
    }

    memory.write_u32(dst_key, &out_keys)?;
    if let (Some(ptr), Some(out)) = (dst_value, out_values) {
        memory.write_u32(ptr, &out)?;
    }
    Ok(())
}

/// `SortSinglePassKernel(src, dst, n, start_bit, end_bit)` and the KV variant
/// `(src_key, src_value, dst_key, dst_value, n, start_bit, end_bit)`.
///
/// One block sorts everything with stable LSD counting passes in local memory.
fn sort_single_pass(
    memory: &mut HostMemory,
    shape: LaunchShape,
    args: &Args<'_>,
    with_values: bool,
) -> Result<()> {
    let (src_key, src_value, dst_key, dst_value, rest) = if with_values {
        args.expect_len(7)?;
        (
            args.ptr(0)?,
            Some(args.ptr(1)?),
            args.ptr(2)?,
            Some(args.ptr(3)?),
            4,
        )
    } else {
        args.expect_len(5)?;
        (args.ptr(0)?, None, args.ptr(1)?, None, 2)
    };
    expect_grid("SortSinglePassKernel", shape, 1)?;
    let n = args.int(rest)?;
    let start = args.bits(rest + 1)?;
    let end = args.bits(rest + 2)?;

    let mut keys = memory.read_u32(src_key, n)?;
    let mut values = src_value.map(|ptr| memory.read_u32(ptr, n)).transpose()?;

    let mut bit = start;
    while bit < end {
        let width = DIGIT_BITS.min(end - bit);
        let mut offsets = [0usize; BIN_SIZE];
        for &key in &keys {
            offsets[digit(key, bit, width)] += 1;
        }
        let mut sum = 0;
        for slot in &mut offsets {
            let count = *slot;
            *slot = sum;
            sum += count;
        }

        let mut next_keys = vec![0u32; n];
        let mut next_values = values.as_ref().map(|_| vec![0u32; n]);
        for (i, &key) in keys.iter().enumerate() {
            let d = digit(key, bit, width);
            let pos = offsets[d];
            offsets[d] += 1;
            next_keys[pos] = key;
            if let (Some(next), Some(values)) = (next_values.as_mut(), values.as_ref()) {
                next[pos] = values[i];
            }
        }
        keys = next_keys;
        values = next_values;
        bit += width;
    }

    memory.write_u32(dst_key, &keys)?;
    if let (Some(ptr), Some(values)) = (dst_value, values) {
        memory.write_u32(ptr, &values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_u32(memory: &mut HostMemory, data: &[u32]) -> DevicePtr {
        let ptr = memory.allocate(data.len() * 4);
        memory.write_u32(ptr, data).unwrap();
        ptr
    }

    fn upload_i32(memory: &mut HostMemory, data: &[i32]) -> DevicePtr {
        let ptr = memory.allocate(data.len() * 4);
        memory.write_i32(ptr, data).unwrap();
        ptr
    }

    #[test]
    fn digit_extraction() {
        assert_eq!(digit(0xABCD, 0, 8), 0xCD);
        assert_eq!(digit(0xABCD, 8, 8), 0xAB);
        assert_eq!(digit(0xABCD, 4, 3), 0x4);
        assert_eq!(digit(u32::MAX, 0, 32), u32::MAX as usize);
    }

    #[test]
    fn count_is_digit_major() {
        let mut memory = HostMemory::new();
        let keys = upload_u32(&mut memory, &[1, 2, 1, 1]);
        let histogram = memory.allocate(BIN_SIZE * 2 * 4);
        let args = [
            KernelArg::Ptr(keys),
            KernelArg::Ptr(histogram),
            KernelArg::I32(4),
            KernelArg::I32(2),
            KernelArg::I32(0),
            KernelArg::I32(8),
            KernelArg::I32(2),
        ];
        let shape = LaunchShape {
            grid_size: 2,
            block_size: 64,
        };
        HostKernel::Count.execute(&mut memory, shape, &args).unwrap();

        let counts = memory.read_i32(histogram, BIN_SIZE * 2).unwrap();
        assert_eq!(counts[2], 1); // digit 1, block 0
        assert_eq!(counts[3], 2); // digit 1, block 1
        assert_eq!(counts[4], 1); // digit 2, block 0
        assert_eq!(counts.iter().sum::<i32>(), 4);
    }

    #[test]
    fn parallel_scan_matches_sequential() {
        let mut memory = HostMemory::new();
        let data: Vec<i32> = (0..64).map(|i| (i * 7) % 5).collect();
        let input = upload_i32(&mut memory, &data);
        let partial = upload_i32(&mut memory, &[0; 8]);
        let ready = upload_i32(&mut memory, &[0; 8]);
        let args = [
            KernelArg::Ptr(input),
            KernelArg::Ptr(input),
            KernelArg::Ptr(partial),
            KernelArg::Ptr(ready),
        ];
        let shape = LaunchShape {
            grid_size: 8,
            block_size: 8,
        };
        HostKernel::ScanParallel
            .execute(&mut memory, shape, &args)
            .unwrap();

        let mut expected = Vec::with_capacity(data.len());
        let mut sum = 0;
        for v in &data {
            expected.push(sum);
            sum += v;
        }
        assert_eq!(memory.read_i32(input, 64).unwrap(), expected);
        assert_eq!(memory.read_i32(ready, 8).unwrap(), vec![1; 8]);
    }

    #[test]
    fn raised_flags_leak_stale_totals() {
        let mut memory = HostMemory::new();
        let input = upload_i32(&mut memory, &[1; 16]);
        let output = memory.allocate(16 * 4);
        let partial = upload_i32(&mut memory, &[0, 1000, 0, 0]);
        let ready = upload_i32(&mut memory, &[0, 1, 0, 0]);
        let args = [
            KernelArg::Ptr(input),
            KernelArg::Ptr(output),
            KernelArg::Ptr(partial),
            KernelArg::Ptr(ready),
        ];
        let shape = LaunchShape {
            grid_size: 4,
            block_size: 4,
        };
        HostKernel::ScanParallel
            .execute(&mut memory, shape, &args)
            .unwrap();

        let scanned = memory.read_i32(output, 16).unwrap();
        assert_eq!(&scanned[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        // Blocks 2 and 3 trusted block 1's leftover total.
        assert_eq!(scanned[8], 1004);
        assert_eq!(scanned[12], 1008);
        assert_eq!(memory.read_i32(partial, 4).unwrap(), vec![4; 4]);
    }

    #[test]
    fn parallel_scan_handles_wide_grids() {
        let blocks = 1 << 16;
        let mut memory = HostMemory::new();
        let input = upload_i32(&mut memory, &vec![1; blocks]);
        let partial = memory.allocate(blocks * 4);
        let ready = memory.allocate(blocks * 4);
        let args = [
            KernelArg::Ptr(input),
            KernelArg::Ptr(input),
            KernelArg::Ptr(partial),
            KernelArg::Ptr(ready),
        ];
        let shape = LaunchShape {
            grid_size: blocks as u32,
            block_size: 1,
        };
        HostKernel::ScanParallel
            .execute(&mut memory, shape, &args)
            .unwrap();

        let scanned = memory.read_i32(input, blocks).unwrap();
        assert!(scanned.iter().enumerate().all(|(i, &v)| v == i as i32));
    }

    #[test]
    fn single_pass_is_stable() {
        let mut memory = HostMemory::new();
        let keys = upload_u32(&mut memory, &[5, 1, 5, 2, 1, 5, 0, 3]);
        let values = upload_u32(&mut memory, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let out_keys = memory.allocate(32);
        let out_values = memory.allocate(32);
        let args = [
            KernelArg::Ptr(keys),
            KernelArg::Ptr(values),
            KernelArg::Ptr(out_keys),
            KernelArg::Ptr(out_values),
            KernelArg::I32(8),
            KernelArg::I32(0),
            KernelArg::I32(3),
        ];
        let shape = LaunchShape {
            grid_size: 1,
            block_size: 256,
        };
        HostKernel::SortSinglePassKv
            .execute(&mut memory, shape, &args)
            .unwrap();
        assert_eq!(
            memory.read_u32(out_keys, 8).unwrap(),
            vec![0, 1, 1, 2, 3, 5, 5, 5]
        );
        assert_eq!(
            memory.read_u32(out_values, 8).unwrap(),
            vec![6, 1, 4, 3, 7, 0, 2, 5]
        );
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let mut memory = HostMemory::new();
        let shape = LaunchShape {
            grid_size: 1,
            block_size: 1,
        };
        let err = HostKernel::Sort
            .execute(&mut memory, shape, &[KernelArg::I32(0)])
            .unwrap_err();
        assert!(matches!(err, GpuError::InvalidLaunch(_)));
    }

    #[test]
    fn wrong_grid_is_rejected() {
        let mut memory = HostMemory::new();
        let keys = upload_u32(&mut memory, &[1]);
        let histogram = memory.allocate(BIN_SIZE * 4);
        let args = [
            KernelArg::Ptr(keys),
            KernelArg::Ptr(histogram),
            KernelArg::I32(1),
            KernelArg::I32(1),
            KernelArg::I32(0),
            KernelArg::I32(8),
            KernelArg::I32(1),
        ];
        let shape = LaunchShape {
            grid_size: 3,
            block_size: 1,
        };
        assert!(HostKernel::Count
            .execute(&mut memory, shape, &args)
            .is_err());
    }
}
