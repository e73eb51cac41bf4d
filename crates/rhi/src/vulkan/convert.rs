//! Conversions between backend-neutral types and Vulkan enums.

use ash::vk;

use crate::pipeline::{CullMode, DescriptorKind, FrontFace, ShaderVisibility, VertexFormat};
use crate::types::{
    ColorSpace, Extent2D, Format, IndexType, PresentMode, PrimitiveType, SurfaceCapabilities,
};

impl Format {
    pub fn to_vk(self) -> vk::Format {
        match self {
            Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::Depth32Float => vk::Format::D32_SFLOAT,
            Format::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
        }
    }

    /// Maps a Vulkan format back, if it is one the renderer understands.
    pub fn from_vk(format: vk::Format) -> Option<Self> {
        Some(match format {
            vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
            vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
            vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
            vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
            vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
            vk::Format::D32_SFLOAT => Format::Depth32Float,
            vk::Format::D24_UNORM_S8_UINT => Format::Depth24Stencil8,
            _ => return None,
        })
    }

    /// Image aspect covered by views of this format.
    pub fn aspect_mask(self) -> vk::ImageAspectFlags {
        match self {
            Format::Depth32Float => vk::ImageAspectFlags::DEPTH,
            Format::Depth24Stencil8 => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

impl ColorSpace {
    pub fn to_vk(self) -> vk::ColorSpaceKHR {
        match self {
            ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
            ColorSpace::ExtendedSrgbLinear => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ColorSpace::Hdr10St2084 => vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        }
    }

    pub fn from_vk(color_space: vk::ColorSpaceKHR) -> Option<Self> {
        Some(match color_space {
            vk::ColorSpaceKHR::SRGB_NONLINEAR => ColorSpace::SrgbNonlinear,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => ColorSpace::ExtendedSrgbLinear,
            vk::ColorSpaceKHR::HDR10_ST2084_EXT => ColorSpace::Hdr10St2084,
            _ => return None,
        })
    }
}

impl PresentMode {
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }

    pub fn from_vk(mode: vk::PresentModeKHR) -> Option<Self> {
        Some(match mode {
            vk::PresentModeKHR::FIFO => PresentMode::Fifo,
            vk::PresentModeKHR::FIFO_RELAXED => PresentMode::FifoRelaxed,
            vk::PresentModeKHR::MAILBOX => PresentMode::Mailbox,
            vk::PresentModeKHR::IMMEDIATE => PresentMode::Immediate,
            _ => return None,
        })
    }
}

impl SurfaceCapabilities {
    pub fn from_vk(caps: &vk::SurfaceCapabilitiesKHR) -> Self {
        // u32::MAX means the surface size follows the swapchain extent.
        let current_extent = (caps.current_extent.width != u32::MAX).then(|| {
            Extent2D::new(caps.current_extent.width, caps.current_extent.height)
        });
        Self {
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent,
            min_extent: Extent2D::new(caps.min_image_extent.width, caps.min_image_extent.height),
            max_extent: Extent2D::new(caps.max_image_extent.width, caps.max_image_extent.height),
        }
    }
}

impl Extent2D {
    pub fn to_vk(self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

impl PrimitiveType {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveType::Points => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveType::Lines => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveType::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveType::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            PrimitiveType::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        }
    }
}

impl IndexType {
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
            CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
        }
    }
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

impl VertexFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            VertexFormat::Float32 => vk::Format::R32_SFLOAT,
            VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
            VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
            VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::DynamicUniformBuffer => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

impl ShaderVisibility {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderVisibility::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderVisibility::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderVisibility::VertexFragment => {
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for format in [
            Format::Bgra8Srgb,
            Format::Bgra8Unorm,
            Format::Rgba8Srgb,
            Format::Rgba8Unorm,
            Format::Rgba16Float,
            Format::Depth32Float,
            Format::Depth24Stencil8,
        ] {
            assert_eq!(Format::from_vk(format.to_vk()), Some(format));
        }
        assert_eq!(Format::from_vk(vk::Format::R5G6B5_UNORM_PACK16), None);
    }

    #[test]
    fn test_present_mode_mapping() {
        assert_eq!(PresentMode::Mailbox.to_vk(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            PresentMode::from_vk(vk::PresentModeKHR::SHARED_DEMAND_REFRESH),
            None
        );
    }

    #[test]
    fn test_surface_capabilities_undefined_extent() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2160,
            },
            ..Default::default()
        };
        let converted = SurfaceCapabilities::from_vk(&caps);
        assert_eq!(converted.current_extent, None);
        assert_eq!(converted.max_extent, Extent2D::new(4096, 2160));

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..caps
        };
        assert_eq!(
            SurfaceCapabilities::from_vk(&fixed).current_extent,
            Some(Extent2D::new(800, 600))
        );
    }

    #[test]
    fn test_dynamic_descriptor_kind() {
        assert_eq!(
            DescriptorKind::DynamicUniformBuffer.to_vk(),
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(
            Format::Depth32Float.aspect_mask(),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(Format::Bgra8Srgb.aspect_mask(), vk::ImageAspectFlags::COLOR);
    }
}
