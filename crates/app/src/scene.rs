//! Demo scene: a ring of spinning triangles.
//!
//! Every triangle reads its transform from one shared uniform buffer through
//! a dynamic descriptor set, so each draw binds the same set with a
//! different dynamic offset.

use std::f32::consts::TAU;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use prism_renderer::{PipelineCache, Renderer};
use prism_rhi::buffer::{BufferDesc, BufferUsage};
use prism_rhi::descriptor::DescriptorWrite;
use prism_rhi::pipeline::{
    DescriptorBinding, DescriptorKind, DescriptorSetLayoutDesc, PipelineDesc, RenderTargetLayout,
    ShaderProgram, ShaderVisibility, VertexAttribute, VertexFormat, VertexLayout,
};
use prism_rhi::types::PrimitiveType;
use prism_rhi::{Backend, GraphicsDevice, RhiResult};

/// Distance between per-object uniforms; covers every device's
/// `minUniformBufferOffsetAlignment`.
const OBJECT_STRIDE: u64 = 256;

pub const TRIANGLE_VERT: &str = r#"#version 430 core
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec3 a_color;
layout(std140, binding = 0) uniform Object { mat4 transform; };
out vec3 v_color;
void main() {
    v_color = a_color;
    gl_Position = transform * vec4(a_position, 0.0, 1.0);
}
"#;

pub const TRIANGLE_FRAG: &str = r#"#version 430 core
in vec3 v_color;
out vec4 frag_color;
void main() {
    frag_color = vec4(v_color, 1.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Vertex {
    position: [f32; 2],
    color: [f32; 3],
}

const VERTICES: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5],
        color: [1.0, 0.2, 0.2],
    },
    Vertex {
        position: [0.5, 0.5],
        color: [0.2, 1.0, 0.2],
    },
    Vertex {
        position: [-0.5, 0.5],
        color: [0.2, 0.2, 1.0],
    },
];

/// Per-object uniform data (std140).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ObjectUniform {
    transform: [[f32; 4]; 4],
}

impl ObjectUniform {
    fn new(transform: Mat4) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
        }
    }
}

fn vertex_layout() -> VertexLayout {
    VertexLayout::new(
        std::mem::size_of::<Vertex>() as u32,
        vec![
            VertexAttribute::new(0, VertexFormat::Float32x2, 0),
            VertexAttribute::new(1, VertexFormat::Float32x3, 8),
        ],
    )
}

pub struct DemoScene<B: Backend> {
    // Sets must go before the pipeline that owns their pool.
    object_set: B::DescriptorSet,
    pipeline: Arc<B::Pipeline>,
    uniforms: B::Buffer,
    vertices: B::Buffer,
    target: RenderTargetLayout,
    shader: ShaderProgram,
    objects: u32,
}

impl<B: Backend> DemoScene<B> {
    /// Builds the scene's pipeline and buffers.
    ///
    /// The uniform buffer holds one block of `objects` transforms per frame
    /// slot, so a frame never overwrites data an in-flight frame reads.
    pub fn new(
        device: &B::Device,
        cache: &mut PipelineCache<B>,
        target: RenderTargetLayout,
        shader: ShaderProgram,
        objects: u32,
        frames_in_flight: usize,
    ) -> RhiResult<Self> {
        let desc = PipelineDesc::new("triangles", shader.clone(), target.clone())
            .with_vertex_layout(vertex_layout())
            .with_descriptor_layout(DescriptorSetLayoutDesc::new(vec![DescriptorBinding::new(
                0,
                DescriptorKind::DynamicUniformBuffer,
                ShaderVisibility::Vertex,
            )]))
            .with_max_descriptor_sets(1);
        let pipeline = cache.get_or_create(device, &desc)?;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&VERTICES[..]);
        let vertices =
            device.create_buffer(&BufferDesc::new(BufferUsage::Vertex, vertex_bytes.len() as u64))?;
        device.write_buffer(&vertices, 0, vertex_bytes)?;

        let uniform_size = OBJECT_STRIDE * u64::from(objects) * frames_in_flight as u64;
        let uniforms = device.create_buffer(&BufferDesc::new(BufferUsage::Uniform, uniform_size))?;

        let object_set = device.create_descriptor_set(
            &pipeline,
            0,
            &[DescriptorWrite::Buffer {
                binding: 0,
                buffer: &uniforms,
                offset: 0,
                range: std::mem::size_of::<ObjectUniform>() as u64,
            }],
        )?;

        tracing::info!(
            "Demo scene created: {} objects, {} bytes of uniforms",
            objects,
            uniform_size
        );

        Ok(Self {
            object_set,
            pipeline,
            uniforms,
            vertices,
            target,
            shader,
            objects,
        })
    }

    /// Render target layout the scene's pipeline was built for.
    pub fn target(&self) -> &RenderTargetLayout {
        &self.target
    }

    pub fn shader(&self) -> &ShaderProgram {
        &self.shader
    }

    /// Updates this frame's transforms and records one draw per object.
    pub fn record(
        &self,
        device: &B::Device,
        renderer: &mut Renderer<B>,
        time: f32,
    ) -> RhiResult<()> {
        let base = renderer.swapchain().current_slot() as u64 * u64::from(self.objects);
        let offsets: Vec<u64> = (0..u64::from(self.objects))
            .map(|i| (base + i) * OBJECT_STRIDE)
            .collect();

        for (i, &offset) in offsets.iter().enumerate() {
            let phase = i as f32 * TAU / self.objects as f32;
            let transform = Mat4::from_rotation_z(phase)
                * Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0))
                * Mat4::from_rotation_z(time * 2.0)
                * Mat4::from_scale(Vec3::splat(0.3));
            device.write_buffer(
                &self.uniforms,
                offset,
                bytemuck::bytes_of(&ObjectUniform::new(transform)),
            )?;
        }

        renderer.set_pipeline(&self.pipeline);
        renderer.bind_vertex_buffer(&self.vertices, 0);
        for offset in offsets {
            renderer.bind_descriptor_sets(&self.pipeline, offset as u32, &[&self.object_set]);
            renderer.draw(PrimitiveType::Triangles, VERTICES.len() as u32, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::RendererConfig;
    use prism_rhi::DrawStatistics;
    use prism_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, RecordedCommand};

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 64);
        assert!(std::mem::size_of::<ObjectUniform>() as u64 <= OBJECT_STRIDE);
        assert_eq!(vertex_layout().stride, 20);
    }

    #[test]
    fn test_scene_draws_every_object() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let config = RendererConfig {
            width: 320,
            height: 240,
            ..RendererConfig::default()
        };
        let mut renderer = Renderer::<Headless>::new(
            Arc::clone(&device),
            Arc::new(DrawStatistics::new()),
            &config,
        )
        .unwrap();
        let mut cache = PipelineCache::new();
        let scene = DemoScene::new(
            device.as_ref(),
            &mut cache,
            renderer.render_target_layout().unwrap(),
            ShaderProgram::glsl("triangles", TRIANGLE_VERT, TRIANGLE_FRAG),
            4,
            config.frames_in_flight,
        )
        .unwrap();

        for frame in 0..2 {
            assert!(renderer.begin().unwrap().is_recording());
            scene.record(device.as_ref(), &mut renderer, frame as f32).unwrap();
            renderer.present().unwrap();
        }

        assert_eq!(renderer.statistics().draw_calls(), 8);
        let offsets: Vec<u32> = device
            .controller()
            .submitted_commands()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCommand::BindDescriptorSets {
                    dynamic_offsets, ..
                } => Some(dynamic_offsets[0]),
                _ => None,
            })
            .collect();
        // Second frame uses the second slot's block of uniforms.
        assert_eq!(offsets, vec![0, 256, 512, 768, 1024, 1280, 1536, 1792]);
    }
}
