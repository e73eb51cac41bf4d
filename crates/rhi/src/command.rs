//! Command buffer lifecycle tracking.
//!
//! [`CommandBuffer`] wraps a backend encoder and enforces the lifecycle
//! `Initial -> Recording -> Executable -> Submitted`, with reset returning
//! any state to `Initial`. Recording into a buffer that is not in the
//! `Recording` state is a programmer error and panics.

use tracing::trace;

use crate::backend::{Backend, CommandEncoder};
use crate::error::RhiResult;
use crate::types::{ClearColor, Extent2D, IndexType, PrimitiveType};

/// Lifecycle state of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    /// Handed to the GPU; must not be touched until its fence signals.
    Submitted,
    /// References resources that no longer exist.
    Invalid,
}

/// Backend command buffer with lifecycle checks.
pub struct CommandBuffer<B: Backend> {
    raw: B::CommandBuffer,
    state: CommandBufferState,
}

impl<B: Backend> CommandBuffer<B> {
    /// Wraps a freshly allocated backend command buffer.
    pub fn new(raw: B::CommandBuffer) -> Self {
        Self {
            raw,
            state: CommandBufferState::Initial,
        }
    }

    #[inline]
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.state == CommandBufferState::Recording
    }

    /// Backend handle, for submission.
    #[inline]
    pub fn raw(&self) -> &B::CommandBuffer {
        &self.raw
    }

    /// Starts recording.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `Initial` or `Executable`.
    pub fn begin_recording(&mut self) -> RhiResult<()> {
        assert!(
            matches!(
                self.state,
                CommandBufferState::Initial | CommandBufferState::Executable
            ),
            "begin_recording on a command buffer in state {:?}",
            self.state
        );
        if self.state == CommandBufferState::Executable {
            self.raw.reset()?;
        }
        self.raw.begin()?;
        self.state = CommandBufferState::Recording;
        trace!("Command buffer recording");
        Ok(())
    }

    /// Finishes recording.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `Recording`.
    pub fn end_recording(&mut self) -> RhiResult<()> {
        self.expect_recording("end_recording");
        self.raw.end()?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Records that the buffer was handed to the GPU.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `Executable`.
    pub fn mark_submitted(&mut self) {
        assert_eq!(
            self.state,
            CommandBufferState::Executable,
            "submitting a command buffer that is not executable"
        );
        self.state = CommandBufferState::Submitted;
    }

    /// Resets this buffer individually.
    pub fn reset(&mut self) -> RhiResult<()> {
        self.raw.reset()?;
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    /// Notes that the owning pool was reset, which resets every buffer in it.
    pub fn on_pool_reset(&mut self) {
        self.state = CommandBufferState::Initial;
    }

    /// Marks a pending recording as unusable (its image chain was replaced).
    pub fn invalidate(&mut self) {
        if matches!(
            self.state,
            CommandBufferState::Recording | CommandBufferState::Executable
        ) {
            self.state = CommandBufferState::Invalid;
        }
    }

    /// Ends a recording that will never be submitted.
    ///
    /// The buffer ends up `Invalid` and must be reset before reuse.
    pub fn abandon(&mut self) -> RhiResult<()> {
        if self.state == CommandBufferState::Recording {
            self.raw.end()?;
        }
        self.state = CommandBufferState::Invalid;
        Ok(())
    }

    fn expect_recording(&self, what: &str) {
        assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "{} on a command buffer that is not recording",
            what
        );
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn begin_render_target(
        &mut self,
        chain: &B::ImageChain,
        image_index: u32,
        clear: ClearColor,
    ) {
        self.expect_recording("begin_render_target");
        self.raw.begin_render_target(chain, image_index, clear);
    }

    pub fn end_render_target(&mut self) {
        self.expect_recording("end_render_target");
        self.raw.end_render_target();
    }

    pub fn transition_to_present(&mut self, chain: &B::ImageChain, image_index: u32) {
        self.expect_recording("transition_to_present");
        self.raw.transition_to_present(chain, image_index);
    }

    pub fn bind_pipeline(&mut self, pipeline: &B::Pipeline) {
        self.expect_recording("bind_pipeline");
        self.raw.bind_pipeline(pipeline);
    }

    pub fn bind_descriptor_sets(
        &mut self,
        pipeline: &B::Pipeline,
        first_set: u32,
        sets: &[B::RawDescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.expect_recording("bind_descriptor_sets");
        self.raw
            .bind_descriptor_sets(pipeline, first_set, sets, dynamic_offsets);
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &B::Buffer, offset: u64) {
        self.expect_recording("bind_vertex_buffer");
        self.raw.bind_vertex_buffer(buffer, offset);
    }

    pub fn bind_index_buffer(&mut self, buffer: &B::Buffer, offset: u64, index_type: IndexType) {
        self.expect_recording("bind_index_buffer");
        self.raw.bind_index_buffer(buffer, offset, index_type);
    }

    pub fn set_viewport(&mut self, extent: Extent2D) {
        self.expect_recording("set_viewport");
        self.raw.set_viewport(extent);
    }

    pub fn set_scissor(&mut self, extent: Extent2D) {
        self.expect_recording("set_scissor");
        self.raw.set_scissor(extent);
    }

    pub fn draw(&mut self, primitive: PrimitiveType, vertex_count: u32, first_vertex: u32) {
        self.expect_recording("draw");
        self.raw.draw(primitive, vertex_count, first_vertex);
    }

    pub fn draw_indexed(
        &mut self,
        primitive: PrimitiveType,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        self.expect_recording("draw_indexed");
        self.raw
            .draw_indexed(primitive, index_count, first_index, vertex_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{Headless, HeadlessCommandBuffer};

    fn buffer() -> CommandBuffer<Headless> {
        CommandBuffer::new(HeadlessCommandBuffer::default())
    }

    #[test]
    fn test_lifecycle() {
        let mut cmd = buffer();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        cmd.begin_recording().unwrap();
        assert!(cmd.is_recording());
        cmd.set_viewport(Extent2D::new(4, 4));
        cmd.end_recording().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);

        cmd.mark_submitted();
        assert_eq!(cmd.state(), CommandBufferState::Submitted);

        cmd.on_pool_reset();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
    }

    #[test]
    fn test_rerecord_from_executable() {
        let mut cmd = buffer();
        cmd.begin_recording().unwrap();
        cmd.draw(PrimitiveType::Triangles, 3, 0);
        cmd.end_recording().unwrap();

        cmd.begin_recording().unwrap();
        assert!(cmd.raw().commands().is_empty());
    }

    #[test]
    #[should_panic(expected = "begin_recording on a command buffer in state Submitted")]
    fn test_begin_while_submitted_panics() {
        let mut cmd = buffer();
        cmd.begin_recording().unwrap();
        cmd.end_recording().unwrap();
        cmd.mark_submitted();
        let _ = cmd.begin_recording();
    }

    #[test]
    #[should_panic(expected = "begin_recording on a command buffer in state Recording")]
    fn test_double_begin_panics() {
        let mut cmd = buffer();
        cmd.begin_recording().unwrap();
        let _ = cmd.begin_recording();
    }

    #[test]
    #[should_panic(expected = "draw on a command buffer that is not recording")]
    fn test_draw_outside_recording_panics() {
        let mut cmd = buffer();
        cmd.draw(PrimitiveType::Triangles, 3, 0);
    }

    #[test]
    fn test_invalidate_and_abandon() {
        let mut cmd = buffer();
        cmd.invalidate();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        cmd.begin_recording().unwrap();
        cmd.invalidate();
        assert_eq!(cmd.state(), CommandBufferState::Invalid);

        cmd.reset().unwrap();
        cmd.begin_recording().unwrap();
        cmd.abandon().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Invalid);
    }
}
