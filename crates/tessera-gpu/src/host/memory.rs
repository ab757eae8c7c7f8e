//! Emulated device memory.

use crate::error::{GpuError, Result};
use crate::runtime::DevicePtr;
use std::collections::BTreeMap;

/// Allocation alignment in bytes.
const ALIGNMENT: u64 = 256;

/// First address handed out; keeps `DevicePtr::NULL` unused.
const BASE_ADDRESS: u64 = 0x1_0000;

struct Allocation {
    bytes: usize,
    // Word storage keeps every allocation 4-byte aligned for `bytemuck` casts.
    words: Vec<u32>,
}

/// Address space of the host emulator.
pub(crate) struct HostMemory {
    allocations: BTreeMap<u64, Allocation>,
    next_address: u64,
}

impl HostMemory {
    pub(crate) fn new() -> Self {
        Self {
            allocations: BTreeMap::new(),
            next_address: BASE_ADDRESS,
        }
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub(crate) fn allocate(&mut self, bytes: usize) -> DevicePtr {
        let address = self.next_address;
        let span = (bytes as u64).max(1).div_ceil(ALIGNMENT) * ALIGNMENT;
        self.next_address += span;
        self.allocations.insert(
            address,
            Allocation {
                bytes,
                words: vec![0; bytes.div_ceil(4)],
            },
        );
        DevicePtr(address)
    }

    pub(crate) fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        self.allocations
            .remove(&ptr.0)
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidPointer(format!("{ptr:?} is not an allocation base")))
    }

    /// Find the allocation containing `[ptr, ptr + bytes)`.
    fn locate(&self, ptr: DevicePtr, bytes: usize) -> Result<(u64, usize)> {
        let (&base, allocation) = self
            .allocations
            .range(..=ptr.0)
            .next_back()
            .ok_or_else(|| GpuError::InvalidPointer(format!("{ptr:?} is unmapped")))?;
        let offset = (ptr.0 - base) as usize;
        if offset + bytes > allocation.bytes {
            return Err(GpuError::InvalidPointer(format!(
                "{ptr:?} + {bytes} bytes exceeds allocation of {} bytes",
                allocation.bytes
            )));
        }
        Ok((base, offset))
    }

    fn bytes_mut(&mut self, ptr: DevicePtr, bytes: usize) -> Result<&mut [u8]> {
        let (base, offset) = self.locate(ptr, bytes)?;
        let allocation = self
            .allocations
            .get_mut(&base)
            .ok_or_else(|| GpuError::InvalidPointer(format!("{ptr:?} vanished")))?;
        let all: &mut [u8] = bytemuck::cast_slice_mut(&mut allocation.words);
        Ok(&mut all[offset..offset + bytes])
    }

    pub(crate) fn read_bytes(&self, ptr: DevicePtr, out: &mut [u8]) -> Result<()> {
        let (base, offset) = self.locate(ptr, out.len())?;
        let all: &[u8] = bytemuck::cast_slice(&self.allocations[&base].words);
        out.copy_from_slice(&all[offset..offset + out.len()]);
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, ptr: DevicePtr, data: &[u8]) -> Result<()> {
        self.bytes_mut(ptr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn fill(&mut self, ptr: DevicePtr, value: u8, bytes: usize) -> Result<()> {
        self.bytes_mut(ptr, bytes)?.fill(value);
        Ok(())
    }

    pub(crate) fn copy(&mut self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> Result<()> {
        let mut staging = vec![0u8; bytes];
        self.read_bytes(src, &mut staging)?;
        self.write_bytes(dst, &staging)
    }

    pub(crate) fn read_u32(&self, ptr: DevicePtr, count: usize) -> Result<Vec<u32>> {
        let mut out = vec![0u32; count];
        self.read_bytes(ptr, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }

    pub(crate) fn write_u32(&mut self, ptr: DevicePtr, data: &[u32]) -> Result<()> {
        self.write_bytes(ptr, bytemuck::cast_slice(data))
    }

    pub(crate) fn read_i32(&self, ptr: DevicePtr, count: usize) -> Result<Vec<i32>> {
        let mut out = vec![0i32; count];
        self.read_bytes(ptr, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }

    pub(crate) fn write_i32(&mut self, ptr: DevicePtr, data: &[i32]) -> Result<()> {
        self.write_bytes(ptr, bytemuck::cast_slice(data))
    }
}
