//! Allocated 2D images.
//!
//! [`Image`] pairs a `VkImage` in GPU-only memory with a view over its
//! single mip level. It backs both the depth attachment of an image chain
//! and sampled textures.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use super::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::types::{Extent2D, Format};

/// Depth format used when an image chain asks for a depth attachment.
pub const DEFAULT_DEPTH_FORMAT: Format = Format::Depth32Float;

pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: Format,
    extent: Extent2D,
}

impl Image {
    /// Creates an image with GPU-only memory and a view.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `extent` - Size in pixels; must be non-empty
    /// * `format` - Texel format; depth formats get a depth view
    /// * `usage` - Vulkan usage flags
    /// * `name` - Allocation name for allocator diagnostics
    pub fn new(
        device: Arc<Device>,
        extent: Extent2D,
        format: Format,
        usage: vk::ImageUsageFlags,
        name: &str,
    ) -> RhiResult<Self> {
        if extent.is_empty() {
            return Err(RhiError::InvalidHandle(
                "Image dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format.to_vk())
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        // From here on Drop cleans up whatever was created.
        let mut created = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            extent,
        };

        let allocation = created.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Image allocation is not available".to_string())
        })?;
        unsafe {
            created.device.handle().bind_image_memory(
                image,
                allocation.memory(),
                allocation.offset(),
            )?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format.to_vk())
            .subresource_range(subresource_range(format));
        created.view = unsafe { created.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {} image: {}x{} ({:?})",
            name, extent.width, extent.height, format
        );
        Ok(created)
    }

    /// Creates a depth attachment.
    pub fn depth(device: Arc<Device>, extent: Extent2D, format: Format) -> RhiResult<Self> {
        Self::new(
            device,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            "depth_buffer",
        )
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.extent
    }
}

/// Full single-level range of an image of `format`.
pub(crate) fn subresource_range(format: Format) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(format.aspect_mask())
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                error!("Failed to free image allocation: {:?}", e);
            }
        }

        debug!(
            "Destroyed image: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_depth_format_is_depth() {
        assert!(DEFAULT_DEPTH_FORMAT.is_depth());
        assert_eq!(DEFAULT_DEPTH_FORMAT.to_vk(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_subresource_range_aspect() {
        assert_eq!(
            subresource_range(Format::Depth32Float).aspect_mask,
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(subresource_range(Format::Rgba8Unorm).level_count, 1);
    }
}
