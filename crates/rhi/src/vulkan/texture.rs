//! Textures: an allocated image, its view and a sampler.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::buffer::VulkanBuffer;
use super::command::{submit_one_time, transition_image_layout};
use super::device::Device;
use super::image::Image;
use crate::buffer::{BufferDesc, BufferUsage};
use crate::error::RhiResult;
use crate::texture::{TextureDesc, TextureUsage};
use crate::types::Extent2D;

/// Vulkan image usage flags for a texture usage.
pub(crate) fn image_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    match usage {
        TextureUsage::Sampled => vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        TextureUsage::ColorTarget => {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        }
        TextureUsage::DepthTarget => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    }
}

/// Vulkan texture.
pub struct VulkanTexture {
    device: Arc<Device>,
    image: Image,
    sampler: vk::Sampler,
    desc: TextureDesc,
}

impl VulkanTexture {
    /// Creates a texture, uploading `data` through a staging buffer.
    ///
    /// Sampled textures end up in `SHADER_READ_ONLY_OPTIMAL` whether or not
    /// initial data was given.
    pub fn new(device: Arc<Device>, desc: &TextureDesc, data: Option<&[u8]>) -> RhiResult<Self> {
        desc.validate(data)?;

        let extent = Extent2D::new(desc.width, desc.height);
        let image = Image::new(
            Arc::clone(&device),
            extent,
            desc.format,
            image_usage(desc.usage),
            "texture",
        )?;

        if desc.usage == TextureUsage::Sampled {
            upload(&device, &image, data)?;
        }

        let sampler = create_sampler(&device)?;

        debug!(
            "Created {:?} texture: {}x{} ({:?})",
            desc.usage, desc.width, desc.height, desc.format
        );

        Ok(Self {
            device,
            image,
            sampler,
            desc: *desc,
        })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

fn create_sampler(device: &Device) -> RhiResult<vk::Sampler> {
    let anisotropy = device.physical_device().features.sampler_anisotropy == vk::TRUE;
    let max_anisotropy = if anisotropy {
        device
            .physical_device()
            .properties
            .limits
            .max_sampler_anisotropy
            .min(16.0)
    } else {
        1.0
    };

    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(max_anisotropy)
        .compare_enable(false)
        .min_lod(0.0)
        .max_lod(0.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false);

    Ok(unsafe { device.handle().create_sampler(&create_info, None)? })
}

fn upload(device: &Arc<Device>, image: &Image, data: Option<&[u8]>) -> RhiResult<()> {
    let format = image.format();
    let Some(data) = data else {
        return submit_one_time(device, |dev, cmd| {
            transition_image_layout(
                dev,
                cmd,
                image.handle(),
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        });
    };

    let staging = VulkanBuffer::new(
        Arc::clone(device),
        &BufferDesc::new(BufferUsage::Staging, data.len() as u64),
    )?;
    staging.write(0, data)?;

    let extent = image.extent();
    submit_one_time(device, |dev, cmd| {
        transition_image_layout(
            dev,
            cmd,
            image.handle(),
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(format.aspect_mask())
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            dev.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        transition_image_layout(
            dev,
            cmd,
            image.handle(),
            format,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_usage() {
        assert!(image_usage(TextureUsage::Sampled).contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(
            image_usage(TextureUsage::ColorTarget).contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        );
        assert_eq!(
            image_usage(TextureUsage::DepthTarget),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );
    }
}
