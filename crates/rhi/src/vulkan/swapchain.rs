//! Swapchain-backed image chain.
//!
//! [`VulkanImageChain`] owns a `VkSwapchainKHR`, one view per presentable
//! image and, when requested, a depth attachment of the same extent. The
//! chain is immutable: a resize builds a new chain, passing the old one as
//! `old_swapchain` so the driver can recycle its resources.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use super::device::Device;
use super::image::{Image, subresource_range};
use crate::backend::ImageChainOps;
use crate::error::{RhiError, RhiResult};
use crate::types::{
    ColorSpace, Extent2D, Format, ImageChainDesc, PresentMode, SurfaceCapabilities, SurfaceFormat,
    SurfaceSupport,
};

/// Queries what the device's surface supports.
///
/// Formats and present modes the renderer has no name for are skipped.
pub fn query_surface_support(device: &Device) -> RhiResult<SurfaceSupport> {
    let loader = device.instance().surface_loader();
    let physical_device = device.physical_device().device;
    let surface = device.surface();

    let capabilities = unsafe {
        loader
            .get_physical_device_surface_capabilities(physical_device, surface)
            .map_err(RhiError::from_vk)?
    };
    let raw_formats = unsafe {
        loader
            .get_physical_device_surface_formats(physical_device, surface)
            .map_err(RhiError::from_vk)?
    };
    let raw_modes = unsafe {
        loader
            .get_physical_device_surface_present_modes(physical_device, surface)
            .map_err(RhiError::from_vk)?
    };

    let formats: Vec<SurfaceFormat> = raw_formats
        .iter()
        .filter_map(|f| {
            Some(SurfaceFormat {
                format: Format::from_vk(f.format)?,
                color_space: ColorSpace::from_vk(f.color_space)?,
            })
        })
        .collect();
    if formats.len() < raw_formats.len() {
        debug!(
            "Skipped {} surface format(s) with no renderer equivalent",
            raw_formats.len() - formats.len()
        );
    }

    let present_modes: Vec<PresentMode> = raw_modes
        .iter()
        .filter_map(|&mode| PresentMode::from_vk(mode))
        .collect();

    debug!(
        "Surface support: {} formats, {} present modes",
        formats.len(),
        present_modes.len()
    );

    Ok(SurfaceSupport {
        capabilities: SurfaceCapabilities::from_vk(&capabilities),
        formats,
        present_modes,
    })
}

/// Presentable images of a swapchain plus the optional depth attachment.
pub struct VulkanImageChain {
    device: Arc<Device>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Option<Image>,
    desc: ImageChainDesc,
}

impl VulkanImageChain {
    /// Creates a swapchain for the device's surface.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error from swapchain, view or depth creation.
    /// `ERROR_OUT_OF_DATE_KHR` here means the surface changed again and the
    /// caller should retry with fresh capabilities.
    pub fn new(
        device: Arc<Device>,
        desc: &ImageChainDesc,
        old: Option<&VulkanImageChain>,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            device
                .instance()
                .surface_loader()
                .get_physical_device_surface_capabilities(
                    device.physical_device().device,
                    device.surface(),
                )
                .map_err(RhiError::from_vk)?
        };

        let (graphics_family, present_family) =
            device.queue_families().resolved().ok_or_else(|| {
                RhiError::SwapchainError("Queue families are not resolved".to_string())
            })?;
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, family_indices) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface())
            .min_image_count(desc.image_count)
            .image_format(desc.surface_format.format.to_vk())
            .image_color_space(desc.surface_format.color_space.to_vk())
            .image_extent(desc.extent.to_vk())
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode.to_vk())
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |chain| chain.swapchain));

        let loader = device.swapchain_loader();
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(RhiError::from_vk)?
        };

        // Everything after this point is released by Drop on failure.
        let mut chain = Self {
            device,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            depth: None,
            desc: *desc,
        };

        chain.images = unsafe {
            chain
                .device
                .swapchain_loader()
                .get_swapchain_images(swapchain)
                .map_err(RhiError::from_vk)?
        };
        // The driver may hand out more images than requested.
        chain.desc.image_count = chain.images.len() as u32;
        chain.create_image_views()?;

        if let Some(depth_format) = desc.depth_format {
            chain.depth = Some(Image::depth(
                Arc::clone(&chain.device),
                desc.extent,
                depth_format,
            )?);
        }

        info!(
            "Swapchain created: {}x{}, {:?}/{:?}, {:?}, {} images{}",
            desc.extent.width,
            desc.extent.height,
            desc.surface_format.format,
            desc.surface_format.color_space,
            desc.present_mode,
            chain.images.len(),
            if chain.depth.is_some() { " + depth" } else { "" }
        );
        if chain.images.len() as u32 != desc.image_count {
            warn!(
                "Requested {} swapchain images, driver created {}",
                desc.image_count,
                chain.images.len()
            );
        }

        Ok(chain)
    }

    fn create_image_views(&mut self) -> RhiResult<()> {
        let format = self.desc.surface_format.format;
        for (i, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.to_vk())
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(subresource_range(format));

            let view = unsafe {
                self.device
                    .handle()
                    .create_image_view(&create_info, None)
                    .map_err(|e| {
                        RhiError::SwapchainError(format!(
                            "Failed to create image view {}: {:?}",
                            i, e
                        ))
                    })?
            };
            self.image_views.push(view);
        }

        debug!("Created {} image views", self.image_views.len());
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Presentable image at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    /// View of the presentable image at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }

    #[inline]
    pub fn depth(&self) -> Option<&Image> {
        self.depth.as_ref()
    }
}

impl ImageChainOps for VulkanImageChain {
    fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    fn format(&self) -> SurfaceFormat {
        self.desc.surface_format
    }

    fn image_count(&self) -> u32 {
        self.desc.image_count
    }

    fn present_mode(&self) -> PresentMode {
        self.desc.present_mode
    }
}

impl Drop for VulkanImageChain {
    fn drop(&mut self) {
        self.depth = None;
        unsafe {
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.swapchain, None);
        }
        debug!(
            "Swapchain destroyed ({}x{})",
            self.desc.extent.width, self.desc.extent.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_chain_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanImageChain>();
    }
}
