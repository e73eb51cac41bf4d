//! GPU buffers backed by gpu-allocator.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use super::device::Device;
use crate::buffer::{BufferDesc, BufferUsage};
use crate::error::{RhiError, RhiResult};

/// Vulkan usage flags for a buffer usage.
pub(crate) fn usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Vertex => {
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Index => {
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Uniform => {
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Storage => {
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
    }
}

/// Preferred memory location for a buffer usage.
pub(crate) fn memory_location(usage: BufferUsage) -> MemoryLocation {
    if usage.is_host_visible() {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Vulkan buffer with its memory allocation.
pub struct VulkanBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    desc: BufferDesc,
}

impl VulkanBuffer {
    /// Creates a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for a zero-sized buffer, or the
    /// Vulkan/allocator error that stopped creation.
    pub fn new(device: Arc<Device>, desc: &BufferDesc) -> RhiResult<Self> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage_flags(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: desc.usage.name(),
            requirements,
            location: memory_location(desc.usage),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        let created = Self {
            device,
            buffer,
            allocation: Some(allocation),
            desc: *desc,
        };
        bound?;

        debug!("Created {} buffer: {} bytes", desc.usage.name(), desc.size);
        Ok(created)
    }

    /// Copies `data` into the mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if the write is out of bounds or
    /// the buffer lives in GPU-only memory.
    pub fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        if !self.desc.contains(offset, data.len()) {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.desc.size
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().free(allocation)
        {
            error!("Failed to free buffer allocation: {:?}", e);
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.desc.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        assert!(usage_flags(BufferUsage::Vertex).contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(usage_flags(BufferUsage::Index).contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(usage_flags(BufferUsage::Uniform).contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(usage_flags(BufferUsage::Storage).contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert_eq!(
            usage_flags(BufferUsage::Staging),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_memory_location() {
        assert_eq!(memory_location(BufferUsage::Uniform), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(BufferUsage::Vertex), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(BufferUsage::Storage), MemoryLocation::GpuOnly);
    }
}
