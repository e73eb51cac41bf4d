//! Conversions from backend-neutral types to OpenGL enums.

use crate::buffer::BufferUsage;
use crate::pipeline::{CullMode, FrontFace, VertexFormat};
use crate::types::{Format, IndexType, PrimitiveType};

/// Internal format, pixel format and component type of a texture format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GlFormat {
    pub internal: i32,
    pub format: u32,
    pub ty: u32,
}

impl Format {
    pub(crate) fn to_gl(self) -> GlFormat {
        let (internal, format, ty) = match self {
            Format::Rgba8Unorm => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
            Format::Rgba8Srgb => (glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
            Format::Bgra8Unorm => (glow::RGBA8, glow::BGRA, glow::UNSIGNED_BYTE),
            Format::Bgra8Srgb => (glow::SRGB8_ALPHA8, glow::BGRA, glow::UNSIGNED_BYTE),
            Format::Rgba16Float => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
            Format::Depth32Float => (glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
            Format::Depth24Stencil8 => (
                glow::DEPTH24_STENCIL8,
                glow::DEPTH_STENCIL,
                glow::UNSIGNED_INT_24_8,
            ),
        };
        GlFormat {
            internal: internal as i32,
            format,
            ty,
        }
    }
}

impl PrimitiveType {
    pub(crate) fn to_gl(self) -> u32 {
        match self {
            PrimitiveType::Points => glow::POINTS,
            PrimitiveType::Lines => glow::LINES,
            PrimitiveType::LineStrip => glow::LINE_STRIP,
            PrimitiveType::Triangles => glow::TRIANGLES,
            PrimitiveType::TriangleStrip => glow::TRIANGLE_STRIP,
            PrimitiveType::TriangleFan => glow::TRIANGLE_FAN,
        }
    }
}

impl IndexType {
    pub(crate) fn to_gl(self) -> u32 {
        match self {
            IndexType::U16 => glow::UNSIGNED_SHORT,
            IndexType::U32 => glow::UNSIGNED_INT,
        }
    }
}

impl CullMode {
    /// Face to cull, or `None` if culling is disabled.
    pub(crate) fn to_gl(self) -> Option<u32> {
        match self {
            CullMode::None => None,
            CullMode::Front => Some(glow::FRONT),
            CullMode::Back => Some(glow::BACK),
            CullMode::FrontAndBack => Some(glow::FRONT_AND_BACK),
        }
    }
}

impl FrontFace {
    pub(crate) fn to_gl(self) -> u32 {
        match self {
            FrontFace::CounterClockwise => glow::CCW,
            FrontFace::Clockwise => glow::CW,
        }
    }
}

impl VertexFormat {
    /// Component type and normalization flag for `glVertexAttribPointer`.
    pub(crate) fn to_gl(self) -> (u32, bool) {
        match self {
            VertexFormat::Unorm8x4 => (glow::UNSIGNED_BYTE, true),
            _ => (glow::FLOAT, false),
        }
    }
}

impl BufferUsage {
    /// Bind target and usage hint.
    pub(crate) fn to_gl(self) -> (u32, u32) {
        match self {
            BufferUsage::Vertex => (glow::ARRAY_BUFFER, glow::STATIC_DRAW),
            BufferUsage::Index => (glow::ELEMENT_ARRAY_BUFFER, glow::STATIC_DRAW),
            BufferUsage::Uniform => (glow::UNIFORM_BUFFER, glow::DYNAMIC_DRAW),
            BufferUsage::Storage => (glow::SHADER_STORAGE_BUFFER, glow::DYNAMIC_DRAW),
            BufferUsage::Staging => (glow::COPY_READ_BUFFER, glow::STREAM_DRAW),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_formats() {
        let srgb = Format::Bgra8Srgb.to_gl();
        assert_eq!(srgb.internal, glow::SRGB8_ALPHA8 as i32);
        assert_eq!(srgb.format, glow::BGRA);

        let depth = Format::Depth32Float.to_gl();
        assert_eq!(depth.format, glow::DEPTH_COMPONENT);
        assert_eq!(depth.ty, glow::FLOAT);
    }

    #[test]
    fn test_cull_none_disables_culling() {
        assert_eq!(CullMode::None.to_gl(), None);
        assert_eq!(CullMode::Back.to_gl(), Some(glow::BACK));
    }

    #[test]
    fn test_index_and_vertex_types() {
        assert_eq!(IndexType::U16.to_gl(), glow::UNSIGNED_SHORT);
        assert_eq!(VertexFormat::Unorm8x4.to_gl(), (glow::UNSIGNED_BYTE, true));
        assert_eq!(VertexFormat::Float32x3.to_gl(), (glow::FLOAT, false));
    }

    #[test]
    fn test_buffer_targets() {
        assert_eq!(BufferUsage::Index.to_gl().0, glow::ELEMENT_ARRAY_BUFFER);
        assert_eq!(BufferUsage::Uniform.to_gl().0, glow::UNIFORM_BUFFER);
    }
}
