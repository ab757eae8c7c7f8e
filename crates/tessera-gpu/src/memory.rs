//! Device memory management.

use crate::error::{GpuError, Result};
use crate::runtime::{DevicePtr, Runtime, Stream};
use bytemuck::Pod;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

/// An owned, resizable device allocation of `T` elements.
///
/// All operations are ordered on a stream. The allocation is freed when the
/// buffer is dropped.
pub struct DeviceBuffer<T: Pod> {
    runtime: Arc<dyn Runtime>,
    ptr: DevicePtr,
    len: usize,
    capacity: usize,
    stream: Stream,
    _marker: PhantomData<T>,
}

impl<T: Pod> DeviceBuffer<T> {
    /// Create an empty buffer. Nothing is allocated until the first resize.
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            ptr: DevicePtr::NULL,
            len: 0,
            capacity: 0,
            stream: Stream::DEFAULT,
            _marker: PhantomData,
        }
    }

    /// Create a buffer holding a copy of `data`.
    pub fn from_slice(runtime: Arc<dyn Runtime>, data: &[T], stream: Stream) -> Result<Self> {
        let mut buffer = Self::new(runtime);
        buffer.resize_async(data.len(), false, stream)?;
        buffer.copy_from_host(data, stream)?;
        Ok(buffer)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated element capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the live elements in bytes.
    pub fn byte_len(&self) -> usize {
        self.len * size_of::<T>()
    }

    /// Device address of the first element.
    pub fn as_ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Stream the buffer was last resized on.
    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Resize to `len` elements.
    ///
    /// Shrinking keeps the allocation. Growing reallocates; with `copy` the
    /// previous contents are carried over, otherwise the new storage is
    /// uninitialized.
    pub fn resize_async(&mut self, len: usize, copy: bool, stream: Stream) -> Result<()> {
        self.stream = stream;
        if len <= self.capacity {
            self.len = len;
            return Ok(());
        }

        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| GpuError::AllocationFailed(format!("{len} elements overflow")))?;
        let new_ptr = self.runtime.malloc(bytes)?;

        if copy && self.len > 0 {
            let copied = self
                .runtime
                .copy_dtod_async(new_ptr, self.ptr, self.byte_len(), stream);
            if let Err(e) = copied {
                if let Err(free_err) = self.runtime.free(new_ptr) {
                    tracing::warn!("Failed to free device buffer {new_ptr:?}: {free_err}");
                }
                return Err(e);
            }
        }

        let old_ptr = std::mem::replace(&mut self.ptr, new_ptr);
        self.len = len;
        self.capacity = len;
        if !old_ptr.is_null() {
            self.runtime.free(old_ptr)?;
        }
        Ok(())
    }

    /// Zero every live element.
    pub fn reset_async(&self, stream: Stream) -> Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        self.runtime
            .memset_async(self.ptr, 0, self.byte_len(), stream)
    }

    /// Upload `data` into the front of the buffer.
    pub fn copy_from_host(&self, data: &[T], stream: Stream) -> Result<()> {
        if data.len() > self.len {
            return Err(GpuError::InvalidState(format!(
                "Upload of {} elements into buffer of {}",
                data.len(),
                self.len
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.runtime
            .copy_htod_async(self.ptr, bytemuck::cast_slice(data), stream)
    }

    /// Read the buffer back to the host. Waits for the stream.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); self.len];
        if self.len > 0 {
            self.runtime
                .copy_dtoh(bytemuck::cast_slice_mut(&mut out), self.ptr, self.stream)?;
        }
        Ok(out)
    }
}

impl<T: Pod> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Err(e) = self.runtime.free(self.ptr) {
            tracing::warn!("Failed to free device buffer {:?}: {e}", self.ptr);
        }
    }
}
