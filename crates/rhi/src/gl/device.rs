//! OpenGL device.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use glow::HasContext;
use tracing::{debug, info, trace, warn};

use super::command::{GlCommandBuffer, GlCommandPool, replay};
use super::resources::{
    DescriptorRegistry, GlBinding, GlBuffer, GlBufferObject, GlDescriptorSet, GlFence,
    GlImageChain, GlPipeline, GlProgram, GlSemaphore, GlSetEntry, GlTexture, GlTextureObject,
    reserve_set,
};
use super::{GlSurface, OpenGl};
use crate::backend::{GraphicsDevice, ImageChainOps};
use crate::buffer::BufferDesc;
use crate::descriptor::{DescriptorWrite, validate_writes};
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{DescriptorKind, LayoutId, PipelineDesc, ShaderSource};
use crate::texture::TextureDesc;
use crate::types::{
    AcquireOutcome, ColorSpace, Extent2D, FenceStatus, Format, ImageChainDesc, PresentMode,
    PresentOutcome, SurfaceCapabilities, SurfaceFormat, SurfaceSupport,
};

/// [`GraphicsDevice`] over a current GL context and its window surface.
pub struct GlDevice {
    gl: Rc<glow::Context>,
    surface: Box<dyn GlSurface>,
    registry: Rc<DescriptorRegistry>,
    max_extent: Extent2D,
}

impl GlDevice {
    /// Wraps a context that is current on the calling thread.
    pub fn new(gl: glow::Context, surface: Box<dyn GlSurface>) -> RhiResult<Self> {
        let mut dims = [0i32; 2];
        let (version, renderer) = unsafe {
            gl.get_parameter_i32_slice(glow::MAX_VIEWPORT_DIMS, &mut dims);
            (
                gl.get_parameter_string(glow::VERSION),
                gl.get_parameter_string(glow::RENDERER),
            )
        };
        if dims[0] <= 0 || dims[1] <= 0 {
            return Err(RhiError::GlError(
                "context reports no usable viewport size".to_string(),
            ));
        }

        info!("OpenGL device ready: {} ({})", renderer, version);
        Ok(Self {
            gl: Rc::new(gl),
            surface,
            registry: Rc::new(DescriptorRegistry::default()),
            max_extent: Extent2D::new(dims[0] as u32, dims[1] as u32),
        })
    }

    #[inline]
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    fn chain_is_stale(&self, chain: &GlImageChain) -> bool {
        self.surface.drawable_size() != chain.extent()
    }

    fn check_error(&self, what: &str) {
        let error = unsafe { self.gl.get_error() };
        if error != glow::NO_ERROR {
            warn!("OpenGL error 0x{:04x} after {}", error, what);
        }
    }
}

/// Surface support of the default framebuffer.
///
/// The window system sizes the default framebuffer, so the drawable size is
/// always the current extent, including an empty one while minimized.
fn default_framebuffer_support(drawable: Extent2D, max_extent: Extent2D) -> SurfaceSupport {
    SurfaceSupport {
        capabilities: SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: Some(drawable),
            min_extent: Extent2D::new(1, 1),
            max_extent,
        },
        formats: vec![SurfaceFormat {
            format: Format::Rgba8Unorm,
            color_space: ColorSpace::SrgbNonlinear,
        }],
        present_modes: vec![PresentMode::Fifo, PresentMode::Immediate],
    }
}

impl GraphicsDevice<OpenGl> for GlDevice {
    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        Ok(default_framebuffer_support(self.surface.drawable_size(), self.max_extent))
    }

    fn create_image_chain(
        &self,
        desc: &ImageChainDesc,
        _old: Option<&GlImageChain>,
    ) -> RhiResult<GlImageChain> {
        let vsync = matches!(desc.present_mode, PresentMode::Fifo | PresentMode::FifoRelaxed);
        self.surface
            .set_swap_interval(vsync)
            .map_err(RhiError::SurfaceError)?;

        debug!(
            "GL image chain: {}x{}, {} images, vsync {}",
            desc.extent.width, desc.extent.height, desc.image_count, vsync
        );
        Ok(GlImageChain::new(*desc))
    }

    fn acquire_next_image(
        &self,
        chain: &GlImageChain,
        _signal: &GlSemaphore,
        _timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        if self.chain_is_stale(chain) {
            return Ok(AcquireOutcome::OutOfDate);
        }
        Ok(AcquireOutcome::Ready(chain.acquire()))
    }

    fn present(
        &self,
        chain: &GlImageChain,
        image_index: u32,
        _wait: &GlSemaphore,
    ) -> RhiResult<PresentOutcome> {
        if !chain.release(image_index) {
            return Err(RhiError::SyncError(format!(
                "image {} presented without being acquired",
                image_index
            )));
        }
        self.surface.swap_buffers().map_err(RhiError::GlError)?;
        trace!("Swapped buffers for image {}", image_index);

        // The frame was shown; a size change only affects the next one.
        if self.chain_is_stale(chain) {
            Ok(PresentOutcome::SubOptimal)
        } else {
            Ok(PresentOutcome::Presented)
        }
    }

    fn create_semaphore(&self) -> RhiResult<GlSemaphore> {
        Ok(GlSemaphore)
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<GlFence> {
        Ok(GlFence::new(Rc::clone(&self.gl), signaled))
    }

    fn wait_for_fence(&self, fence: &GlFence, timeout: Option<Duration>) -> RhiResult<FenceStatus> {
        fence.wait(timeout)
    }

    fn reset_fence(&self, fence: &GlFence) -> RhiResult<()> {
        fence.reset()
    }

    fn create_command_pool(&self) -> RhiResult<GlCommandPool> {
        Ok(GlCommandPool::default())
    }

    fn reset_command_pool(&self, pool: &mut GlCommandPool) -> RhiResult<()> {
        pool.resets += 1;
        Ok(())
    }

    fn allocate_command_buffer(&self, _pool: &mut GlCommandPool) -> RhiResult<GlCommandBuffer> {
        Ok(GlCommandBuffer::default())
    }

    fn submit(
        &self,
        cmd: &GlCommandBuffer,
        _wait: Option<&GlSemaphore>,
        _signal: Option<&GlSemaphore>,
        fence: &GlFence,
    ) -> RhiResult<()> {
        if fence.is_pending() || fence.is_signaled() {
            return Err(RhiError::SyncError(
                "submission fence must be unsignaled".to_string(),
            ));
        }

        replay(&self.gl, &self.registry, cmd.commands());
        let sync = unsafe {
            let sync = self
                .gl
                .fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0)
                .map_err(RhiError::GlError)?;
            self.gl.flush();
            sync
        };
        fence.arm(sync);
        self.check_error("submission");
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.gl.finish() };
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<GlBuffer> {
        if desc.size == 0 || desc.size > i32::MAX as u64 {
            return Err(RhiError::InvalidHandle(format!(
                "Buffer size {} is out of range",
                desc.size
            )));
        }

        let (_, usage) = desc.usage.to_gl();
        let buffer = unsafe {
            let buffer = self.gl.create_buffer().map_err(RhiError::GlError)?;
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer));
            self.gl
                .buffer_data_size(glow::COPY_WRITE_BUFFER, desc.size as i32, usage);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            buffer
        };

        debug!(
            "Created GL {} buffer ({} bytes)",
            desc.usage.name(),
            desc.size
        );
        Ok(GlBuffer {
            object: Rc::new(GlBufferObject::new(Rc::clone(&self.gl), buffer, *desc)),
        })
    }

    fn write_buffer(&self, buffer: &GlBuffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        let desc = buffer.desc();
        if !desc.contains(offset, data.len()) {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                desc.size
            )));
        }
        unsafe {
            self.gl
                .bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer.object.buffer));
            self.gl
                .buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, offset as i32, data);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc, data: Option<&[u8]>) -> RhiResult<GlTexture> {
        desc.validate(data)?;

        let format = desc.format.to_gl();
        let texture = unsafe {
            let texture = self.gl.create_texture().map_err(RhiError::GlError)?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                format.internal,
                desc.width as i32,
                desc.height as i32,
                0,
                format.format,
                format.ty,
                glow::PixelUnpackData::Slice(data),
            );
            for (parameter, value) in [
                (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
                (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
                (glow::TEXTURE_WRAP_S, glow::REPEAT),
                (glow::TEXTURE_WRAP_T, glow::REPEAT),
            ] {
                self.gl
                    .tex_parameter_i32(glow::TEXTURE_2D, parameter, value as i32);
            }
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            texture
        };
        self.check_error("texture upload");

        debug!(
            "Created GL {:?} texture: {}x{} ({:?})",
            desc.usage, desc.width, desc.height, desc.format
        );
        Ok(GlTexture {
            object: Rc::new(GlTextureObject::new(Rc::clone(&self.gl), texture, *desc)),
        })
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<GlPipeline> {
        if desc.target.color_formats.is_empty() {
            return Err(RhiError::PipelineError(format!(
                "pipeline '{}' has no color attachment",
                desc.name
            )));
        }
        if desc.max_descriptor_sets == 0 && !desc.descriptor_layouts.is_empty() {
            return Err(RhiError::PipelineError(format!(
                "pipeline '{}' declares descriptor layouts but allows no sets",
                desc.name
            )));
        }
        let ShaderSource::Glsl { vertex, fragment } = &desc.shader.source else {
            return Err(RhiError::ShaderError(format!(
                "program '{}' is SPIR-V; the OpenGL backend consumes GLSL",
                desc.shader.name
            )));
        };

        let program = link_program(&self.gl, &desc.shader.name, vertex, fragment)?;
        let vao = match unsafe { self.gl.create_vertex_array() } {
            Ok(vao) => vao,
            Err(e) => {
                unsafe { self.gl.delete_program(program) };
                return Err(RhiError::GlError(e));
            }
        };

        let layout_id = LayoutId::next();
        debug!("Created GL pipeline '{}' ({:?})", desc.name, layout_id);
        Ok(GlPipeline {
            program: Rc::new(GlProgram::new(
                Rc::clone(&self.gl),
                program,
                vao,
                desc.state,
                desc.vertex_layout.clone(),
            )),
            key: desc.key(),
            layout_id,
            name: desc.name.clone(),
            layouts: desc.descriptor_layouts.clone(),
            max_sets: desc.max_descriptor_sets,
            live_sets: Rc::new(Cell::new(0)),
        })
    }

    fn create_descriptor_set(
        &self,
        pipeline: &GlPipeline,
        set_index: u32,
        writes: &[DescriptorWrite<'_, OpenGl>],
    ) -> RhiResult<GlDescriptorSet> {
        let layout = pipeline.layouts.get(set_index as usize).ok_or_else(|| {
            RhiError::DescriptorError(format!(
                "pipeline '{}' has no descriptor set {}",
                pipeline.name, set_index
            ))
        })?;
        validate_writes(layout, writes)?;

        if !reserve_set(&pipeline.live_sets, pipeline.max_sets) {
            return Err(RhiError::DescriptorError(format!(
                "descriptor pool of pipeline '{}' is exhausted",
                pipeline.name
            )));
        }

        let bindings = writes
            .iter()
            .filter_map(|write| {
                let kind = layout.binding(write.binding())?.kind;
                Some(match write {
                    DescriptorWrite::Buffer {
                        binding,
                        buffer,
                        offset,
                        range,
                    } => GlBinding::Buffer {
                        target: if kind == DescriptorKind::StorageBuffer {
                            glow::SHADER_STORAGE_BUFFER
                        } else {
                            glow::UNIFORM_BUFFER
                        },
                        binding: *binding,
                        buffer: Rc::clone(&buffer.object),
                        offset: *offset,
                        range: *range,
                        dynamic: kind.is_dynamic(),
                    },
                    DescriptorWrite::Texture { binding, texture } => GlBinding::Texture {
                        binding: *binding,
                        texture: Rc::clone(&texture.object),
                    },
                })
            })
            .collect();

        let dynamic = layout.is_dynamic();
        let id = self.registry.insert(GlSetEntry { dynamic, bindings });
        trace!("Registered GL descriptor set {} for slot {}", id, set_index);

        Ok(GlDescriptorSet {
            id,
            registry: Rc::clone(&self.registry),
            layout_id: pipeline.layout_id,
            set_index,
            dynamic,
            live: Rc::clone(&pipeline.live_sets),
        })
    }
}

fn compile_shader(
    gl: &glow::Context,
    stage: u32,
    name: &str,
    source: &str,
) -> RhiResult<glow::NativeShader> {
    let stage_name = if stage == glow::VERTEX_SHADER {
        "vertex"
    } else {
        "fragment"
    };

    unsafe {
        let shader = gl.create_shader(stage).map_err(RhiError::ShaderError)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(RhiError::ShaderError(format!(
                "{} shader of '{}' failed to compile: {}",
                stage_name, name, log
            )));
        }
        Ok(shader)
    }
}

fn link_program(
    gl: &glow::Context,
    name: &str,
    vertex: &str,
    fragment: &str,
) -> RhiResult<glow::NativeProgram> {
    let vs = compile_shader(gl, glow::VERTEX_SHADER, name, vertex)?;
    let fs = match compile_shader(gl, glow::FRAGMENT_SHADER, name, fragment) {
        Ok(fs) => fs,
        Err(e) => {
            unsafe { gl.delete_shader(vs) };
            return Err(e);
        }
    };

    unsafe {
        let program = match gl.create_program() {
            Ok(program) => program,
            Err(e) => {
                gl.delete_shader(vs);
                gl.delete_shader(fs);
                return Err(RhiError::ShaderError(e));
            }
        };
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(RhiError::ShaderError(format!(
                "program '{}' failed to link: {}",
                name, log
            )));
        }
        debug!("Linked GL program '{}'", name);
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: Extent2D = Extent2D {
        width: 4096,
        height: 4096,
    };

    #[test]
    fn test_drawable_is_current_extent() {
        let support = default_framebuffer_support(Extent2D::new(800, 600), MAX);
        assert!(support.is_adequate());
        assert_eq!(
            support.capabilities.choose_extent(Extent2D::new(1280, 720)),
            Extent2D::new(800, 600)
        );
    }

    #[test]
    fn test_minimized_drawable_has_no_area() {
        let support = default_framebuffer_support(Extent2D::new(0, 0), MAX);
        let extent = support.capabilities.choose_extent(Extent2D::new(1280, 720));
        assert!(extent.is_empty());
    }
}
