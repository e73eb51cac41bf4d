//! Deferred command recording and replay.
//!
//! GL has no command buffers, so recording appends to a [`GlCommand`] list
//! that the device replays against the context at submission.

use std::rc::Rc;

use glow::HasContext;
use tracing::warn;

use super::OpenGl;
use super::resources::{
    DescriptorRegistry, GlBinding, GlBuffer, GlBufferObject, GlImageChain, GlPipeline, GlProgram,
    binding_point,
};
use crate::backend::{CommandEncoder, ImageChainOps};
use crate::error::RhiResult;
use crate::pipeline::FixedFunctionState;
use crate::types::{ClearColor, Extent2D, IndexType, PrimitiveType};

/// One recorded command.
pub(crate) enum GlCommand {
    BeginRenderTarget {
        extent: Extent2D,
        clear: ClearColor,
        depth: bool,
    },
    BindPipeline(Rc<GlProgram>),
    BindDescriptorSets {
        first_set: u32,
        sets: Vec<u32>,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffer {
        buffer: Rc<GlBufferObject>,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: Rc<GlBufferObject>,
        offset: u64,
        index_type: IndexType,
    },
    SetViewport(Extent2D),
    SetScissor(Extent2D),
    Draw {
        primitive: PrimitiveType,
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        primitive: PrimitiveType,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

/// Command pool; GL command lists need no backing allocation.
#[derive(Debug, Default)]
pub struct GlCommandPool {
    pub(crate) resets: u64,
}

impl GlCommandPool {
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

/// Command list replayed at submission.
#[derive(Default)]
pub struct GlCommandBuffer {
    commands: Vec<GlCommand>,
    rendering: bool,
}

impl GlCommandBuffer {
    pub(crate) fn commands(&self) -> &[GlCommand] {
        &self.commands
    }

    /// Number of commands recorded since the last begin.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl CommandEncoder<OpenGl> for GlCommandBuffer {
    fn begin(&mut self) -> RhiResult<()> {
        self.commands.clear();
        self.rendering = false;
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        if self.rendering {
            self.end_render_target();
        }
        Ok(())
    }

    fn reset(&mut self) -> RhiResult<()> {
        self.commands.clear();
        self.rendering = false;
        Ok(())
    }

    fn begin_render_target(&mut self, chain: &GlImageChain, _image_index: u32, clear: ClearColor) {
        self.rendering = true;
        self.commands.push(GlCommand::BeginRenderTarget {
            extent: chain.extent(),
            clear,
            depth: chain.has_depth(),
        });
    }

    fn end_render_target(&mut self) {
        self.rendering = false;
    }

    fn transition_to_present(&mut self, _chain: &GlImageChain, _image_index: u32) {
        // The default framebuffer needs no layout transition.
        self.end_render_target();
    }

    fn bind_pipeline(&mut self, pipeline: &GlPipeline) {
        self.commands
            .push(GlCommand::BindPipeline(Rc::clone(&pipeline.program)));
    }

    fn bind_descriptor_sets(
        &mut self,
        _pipeline: &GlPipeline,
        first_set: u32,
        sets: &[u32],
        dynamic_offsets: &[u32],
    ) {
        self.commands.push(GlCommand::BindDescriptorSets {
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: &GlBuffer, offset: u64) {
        self.commands.push(GlCommand::BindVertexBuffer {
            buffer: Rc::clone(&buffer.object),
            offset,
        });
    }

    fn bind_index_buffer(&mut self, buffer: &GlBuffer, offset: u64, index_type: IndexType) {
        self.commands.push(GlCommand::BindIndexBuffer {
            buffer: Rc::clone(&buffer.object),
            offset,
            index_type,
        });
    }

    fn set_viewport(&mut self, extent: Extent2D) {
        self.commands.push(GlCommand::SetViewport(extent));
    }

    fn set_scissor(&mut self, extent: Extent2D) {
        self.commands.push(GlCommand::SetScissor(extent));
    }

    fn draw(&mut self, primitive: PrimitiveType, vertex_count: u32, first_vertex: u32) {
        self.commands.push(GlCommand::Draw {
            primitive,
            vertex_count,
            first_vertex,
        });
    }

    fn draw_indexed(
        &mut self,
        primitive: PrimitiveType,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        self.commands.push(GlCommand::DrawIndexed {
            primitive,
            index_count,
            first_index,
            vertex_offset,
        });
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Vertex input bound since the last draw; applied lazily because VAO state
/// depends on both the program and the buffers.
#[derive(Default)]
struct InputState<'a> {
    program: Option<&'a GlProgram>,
    vertex: Option<(&'a GlBufferObject, u64)>,
    index: Option<(&'a GlBufferObject, u64, IndexType)>,
    dirty: bool,
}

impl InputState<'_> {
    unsafe fn flush(&mut self, gl: &glow::Context) -> bool {
        let Some(program) = self.program else {
            return false;
        };
        if !self.dirty {
            return true;
        }

        unsafe {
            gl.bind_vertex_array(Some(program.vao));
            if let Some((buffer, offset)) = self.vertex {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer.buffer));
                let layout = &program.vertex_layout;
                for attribute in &layout.attributes {
                    let (data_type, normalized) = attribute.format.to_gl();
                    gl.enable_vertex_attrib_array(attribute.location);
                    gl.vertex_attrib_pointer_f32(
                        attribute.location,
                        attribute.format.components() as i32,
                        data_type,
                        normalized,
                        layout.stride as i32,
                        (offset + u64::from(attribute.offset)) as i32,
                    );
                }
            }
            if let Some((buffer, _, _)) = self.index {
                gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer.buffer));
            }
        }
        self.dirty = false;
        true
    }
}

unsafe fn apply_state(gl: &glow::Context, state: &FixedFunctionState) {
    unsafe {
        match state.cull_mode.to_gl() {
            Some(face) => {
                gl.enable(glow::CULL_FACE);
                gl.cull_face(face);
            }
            None => gl.disable(glow::CULL_FACE),
        }
        gl.front_face(state.front_face.to_gl());
        gl.polygon_mode(
            glow::FRONT_AND_BACK,
            if state.wireframe { glow::LINE } else { glow::FILL },
        );

        match state.depth_bias {
            Some(bias) => {
                gl.enable(glow::POLYGON_OFFSET_FILL);
                gl.polygon_offset(bias.slope_factor, bias.constant_factor);
            }
            None => gl.disable(glow::POLYGON_OFFSET_FILL),
        }

        if state.transparency {
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        } else {
            gl.disable(glow::BLEND);
        }

        if state.depth_test {
            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(glow::LESS);
        } else {
            gl.disable(glow::DEPTH_TEST);
        }
        gl.depth_mask(state.depth_write);
    }
}

unsafe fn bind_sets(
    gl: &glow::Context,
    registry: &DescriptorRegistry,
    first_set: u32,
    sets: &[u32],
    dynamic_offsets: &[u32],
) {
    let entries = registry.sets();
    let mut offsets = dynamic_offsets.iter().copied();

    for (slot, raw) in (first_set..).zip(sets) {
        let Some(entry) = entries.get(raw) else {
            warn!("Descriptor set {} was released before replay", raw);
            continue;
        };
        let dynamic_offset = if entry.dynamic {
            u64::from(offsets.next().unwrap_or(0))
        } else {
            0
        };

        for binding in &entry.bindings {
            match binding {
                GlBinding::Buffer {
                    target,
                    binding,
                    buffer,
                    offset,
                    range,
                    dynamic,
                } => {
                    let offset = if *dynamic {
                        offset + dynamic_offset
                    } else {
                        *offset
                    };
                    unsafe {
                        gl.bind_buffer_range(
                            *target,
                            binding_point(slot, *binding),
                            Some(buffer.buffer),
                            offset as i32,
                            *range as i32,
                        );
                    }
                }
                GlBinding::Texture { binding, texture } => unsafe {
                    gl.active_texture(glow::TEXTURE0 + binding_point(slot, *binding));
                    gl.bind_texture(glow::TEXTURE_2D, Some(texture.texture));
                },
            }
        }
    }
}

/// Executes `commands` against the current context.
pub(crate) fn replay(gl: &glow::Context, registry: &DescriptorRegistry, commands: &[GlCommand]) {
    let mut input = InputState::default();

    for command in commands {
        match command {
            GlCommand::BeginRenderTarget {
                extent,
                clear,
                depth,
            } => unsafe {
                let [r, g, b, a] = clear.0;
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                gl.disable(glow::SCISSOR_TEST);
                gl.viewport(0, 0, extent.width as i32, extent.height as i32);
                gl.clear_color(r, g, b, a);
                let mut mask = glow::COLOR_BUFFER_BIT;
                if *depth {
                    gl.depth_mask(true);
                    mask |= glow::DEPTH_BUFFER_BIT;
                }
                gl.clear(mask);
            },
            GlCommand::BindPipeline(program) => unsafe {
                gl.use_program(Some(program.program));
                apply_state(gl, &program.state);
                input.program = Some(program.as_ref());
                input.dirty = true;
            },
            GlCommand::BindDescriptorSets {
                first_set,
                sets,
                dynamic_offsets,
            } => unsafe {
                bind_sets(gl, registry, *first_set, sets, dynamic_offsets);
            },
            GlCommand::BindVertexBuffer { buffer, offset } => {
                input.vertex = Some((buffer.as_ref(), *offset));
                input.dirty = true;
            }
            GlCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                input.index = Some((buffer.as_ref(), *offset, *index_type));
                input.dirty = true;
            }
            GlCommand::SetViewport(extent) => unsafe {
                gl.viewport(0, 0, extent.width as i32, extent.height as i32);
            },
            GlCommand::SetScissor(extent) => unsafe {
                gl.enable(glow::SCISSOR_TEST);
                gl.scissor(0, 0, extent.width as i32, extent.height as i32);
            },
            GlCommand::Draw {
                primitive,
                vertex_count,
                first_vertex,
            } => unsafe {
                if !input.flush(gl) {
                    warn!("Draw replayed without a bound pipeline; skipped");
                    continue;
                }
                gl.draw_arrays(
                    primitive.to_gl(),
                    *first_vertex as i32,
                    *vertex_count as i32,
                );
            },
            GlCommand::DrawIndexed {
                primitive,
                index_count,
                first_index,
                vertex_offset,
            } => unsafe {
                if !input.flush(gl) {
                    warn!("Indexed draw replayed without a bound pipeline; skipped");
                    continue;
                }
                let Some((_, offset, index_type)) = input.index else {
                    warn!("Indexed draw replayed without an index buffer; skipped");
                    continue;
                };
                let byte_offset = offset + u64::from(*first_index) * u64::from(index_type.size());
                gl.draw_elements_base_vertex(
                    primitive.to_gl(),
                    *index_count as i32,
                    index_type.to_gl(),
                    byte_offset as i32,
                    *vertex_offset,
                );
            },
        }
    }

    unsafe { gl.bind_vertex_array(None) };
}
