//! GPU buffer wrapper backed by gpu-allocator.
//!
//! Buffers never destroy their Vulkan objects directly. Dropping a
//! [`Buffer`] files the handle and its allocation with the
//! [`DeferredReclaimer`](crate::reclaim::DeferredReclaimer), so a mesh can
//! be dropped mid-frame while the GPU is still drawing from it.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{GfxError, GfxResult};
use crate::reclaim::{DeferredReclaimer, Garbage};

/// A Vulkan buffer with its backing memory allocation.
///
/// The allocation lives in an `Option` so `Drop` can move it out and hand
/// it to the reclaimer; it is `Some` for the buffer's whole usable life.
pub struct Buffer {
    reclaimer: Arc<DeferredReclaimer>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// `location` controls where the memory lives: `CpuToGpu` allocations
    /// are persistently mapped and writable via [`Buffer::write_bytes`],
    /// `GpuOnly` allocations are not host-visible.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero, or if buffer creation or
    /// allocation fails.
    pub fn new(
        device: Arc<Device>,
        reclaimer: Arc<DeferredReclaimer>,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        label: &str,
    ) -> GfxResult<Self> {
        if size == 0 {
            return Err(GfxError::InvalidArgument(format!(
                "buffer '{label}' requested with zero size"
            )));
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&create_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = device
                .allocator()
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            allocator.allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created buffer '{}' ({} bytes, {:?})", label, size, location);

        Ok(Self {
            reclaimer,
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Creates a host-visible buffer initialized with `data`.
    pub fn from_data(
        device: Arc<Device>,
        reclaimer: Arc<DeferredReclaimer>,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        label: &str,
    ) -> GfxResult<Self> {
        let mut buffer = Self::new(
            device,
            reclaimer,
            data.len() as u64,
            usage,
            MemoryLocation::CpuToGpu,
            label,
        )?;
        buffer.write_bytes(0, data)?;
        Ok(buffer)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Writes `data` into the mapped allocation at `offset` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not host-visible or the write
    /// would run past the end of the buffer.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> GfxResult<()> {
        if !write_in_bounds(offset, data.len() as u64, self.size) {
            return Err(GfxError::InvalidArgument(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.size
            )));
        }

        let allocation = self
            .allocation
            .as_mut()
            .ok_or_else(|| GfxError::InvalidArgument("buffer allocation already taken".into()))?;

        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            GfxError::InvalidArgument("buffer memory is not host-visible".into())
        })?;

        let offset = offset as usize;
        mapped[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.reclaimer.discard(Garbage::Buffer(self.buffer));
        if let Some(allocation) = self.allocation.take() {
            self.reclaimer.discard(Garbage::Allocation(allocation));
        }
    }
}

/// True when a write of `len` bytes at `offset` stays within `size`,
/// without overflowing the addition.
fn write_in_bounds(offset: u64, len: u64, size: u64) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Buffer>();
    }

    #[test]
    fn test_write_bounds_checking() {
        assert!(write_in_bounds(0, 4, 4));
        assert!(write_in_bounds(4, 0, 4));
        assert!(!write_in_bounds(1, 4, 4));

        // Offset + length wrapping around u64 must not pass the check
        assert!(!write_in_bounds(u64::MAX, 1, 8));
        assert!(!write_in_bounds(u64::MAX - 2, 4, u64::MAX));
    }
}
