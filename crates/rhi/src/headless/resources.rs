//! Simulated resources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::Headless;
use super::device::Shared;
use crate::backend::{CommandEncoder, DescriptorSetOps, ImageChainOps, PipelineOps};
use crate::buffer::BufferDesc;
use crate::error::RhiResult;
use crate::pipeline::{DescriptorSetLayoutDesc, LayoutId, PipelineKey};
use crate::texture::TextureDesc;
use crate::types::{
    ClearColor, Extent2D, ImageChainDesc, IndexType, PresentMode, PrimitiveType, SurfaceFormat,
};

/// A command as recorded into a headless command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BeginRenderTarget { image_index: u32, clear: ClearColor },
    EndRenderTarget,
    TransitionToPresent { image_index: u32 },
    BindPipeline { layout: LayoutId },
    BindDescriptorSets {
        first_set: u32,
        sets: Vec<u64>,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffer { buffer: u64, offset: u64 },
    BindIndexBuffer {
        buffer: u64,
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

/// Presentable image chain of the simulated surface.
pub struct HeadlessImageChain {
    pub(crate) id: u64,
    pub(crate) desc: ImageChainDesc,
    pub(crate) cursor: Mutex<ChainCursor>,
    pub(crate) shared: Arc<Shared>,
}

/// Round-robin image hand-out with tracking of images held by the application.
#[derive(Debug, Default)]
pub(crate) struct ChainCursor {
    next: u32,
    held: Vec<u32>,
}

impl ChainCursor {
    pub(crate) fn acquire(&mut self, image_count: u32) -> Option<u32> {
        for _ in 0..image_count {
            let candidate = self.next;
            self.next = (self.next + 1) % image_count;
            if !self.held.contains(&candidate) {
                self.held.push(candidate);
                return Some(candidate);
            }
        }
        None
    }

    pub(crate) fn release(&mut self, index: u32) -> bool {
        match self.held.iter().position(|&i| i == index) {
            Some(pos) => {
                self.held.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}

impl HeadlessImageChain {
    /// Depth format the chain was created with.
    pub fn depth_format(&self) -> Option<crate::types::Format> {
        self.desc.depth_format
    }
}

impl ImageChainOps for HeadlessImageChain {
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

impl Drop for HeadlessImageChain {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if state.current_chain == Some(self.id) {
            state.current_chain = None;
        }
    }
}

pub struct HeadlessSemaphore {
    pub(crate) id: u64,
    pub(crate) shared: Arc<Shared>,
}

impl Drop for HeadlessSemaphore {
    fn drop(&mut self) {
        self.shared.lock().semaphores.remove(&self.id);
    }
}

pub struct HeadlessFence {
    pub(crate) id: u64,
    pub(crate) shared: Arc<Shared>,
}

impl Drop for HeadlessFence {
    fn drop(&mut self) {
        self.shared.lock().fences.remove(&self.id);
    }
}

/// Simulated command pool; counts its resets and allocations.
#[derive(Debug, Default)]
pub struct HeadlessCommandPool {
    pub(crate) resets: u64,
    pub(crate) allocated: u32,
}

impl HeadlessCommandPool {
    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}

/// Command buffer that records into a plain list.
#[derive(Debug, Default)]
pub struct HeadlessCommandBuffer {
    commands: Vec<RecordedCommand>,
    rendering: bool,
}

impl HeadlessCommandBuffer {
    /// Commands recorded since the last begin.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }
}

impl CommandEncoder<Headless> for HeadlessCommandBuffer {
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

    fn begin_render_target(
        &mut self,
        _chain: &HeadlessImageChain,
        image_index: u32,
        clear: ClearColor,
    ) {
        self.rendering = true;
        self.commands
            .push(RecordedCommand::BeginRenderTarget { image_index, clear });
    }

    fn end_render_target(&mut self) {
        self.rendering = false;
        self.commands.push(RecordedCommand::EndRenderTarget);
    }

    fn transition_to_present(&mut self, _chain: &HeadlessImageChain, image_index: u32) {
        if self.rendering {
            self.end_render_target();
        }
        self.commands
            .push(RecordedCommand::TransitionToPresent { image_index });
    }

    fn bind_pipeline(&mut self, pipeline: &HeadlessPipeline) {
        self.commands.push(RecordedCommand::BindPipeline {
            layout: pipeline.layout_id,
        });
    }

    fn bind_descriptor_sets(
        &mut self,
        _pipeline: &HeadlessPipeline,
        first_set: u32,
        sets: &[u64],
        dynamic_offsets: &[u32],
    ) {
        self.commands.push(RecordedCommand::BindDescriptorSets {
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64) {
        self.commands.push(RecordedCommand::BindVertexBuffer {
            buffer: buffer.id,
            offset,
        });
    }

    fn bind_index_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64, index_type: IndexType) {
        self.commands.push(RecordedCommand::BindIndexBuffer {
            buffer: buffer.id,
            offset,
            index_type,
        });
    }

    fn set_viewport(&mut self, extent: Extent2D) {
        self.commands.push(RecordedCommand::SetViewport(extent));
    }

    fn set_scissor(&mut self, extent: Extent2D) {
        self.commands.push(RecordedCommand::SetScissor(extent));
    }

    fn draw(&mut self, primitive: PrimitiveType, vertex_count: u32, first_vertex: u32) {
        self.commands.push(RecordedCommand::Draw {
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
        self.commands.push(RecordedCommand::DrawIndexed {
            primitive,
            index_count,
            first_index,
            vertex_offset,
        });
    }
}

/// Buffer backed by host memory.
pub struct HeadlessBuffer {
    pub(crate) id: u64,
    pub(crate) desc: BufferDesc,
    pub(crate) data: Mutex<Vec<u8>>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct HeadlessTexture {
    pub(crate) id: u64,
    pub(crate) desc: TextureDesc,
}

impl HeadlessTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

pub struct HeadlessPipeline {
    pub(crate) key: PipelineKey,
    pub(crate) layout_id: LayoutId,
    pub(crate) name: String,
    pub(crate) layouts: Vec<DescriptorSetLayoutDesc>,
    pub(crate) max_sets: u32,
    pub(crate) live_sets: Arc<AtomicU32>,
}

impl PipelineOps for HeadlessPipeline {
    fn key(&self) -> &PipelineKey {
        &self.key
    }

    fn layout_id(&self) -> LayoutId {
        self.layout_id
    }

    fn descriptor_set_count(&self) -> usize {
        self.layouts.len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct HeadlessDescriptorSet {
    pub(crate) id: u64,
    pub(crate) layout_id: LayoutId,
    pub(crate) set_index: u32,
    pub(crate) dynamic: bool,
    pub(crate) live: Arc<AtomicU32>,
}

impl HeadlessDescriptorSet {
    /// Takes one slot from a pipeline's set budget.
    pub(crate) fn reserve(live: &AtomicU32, max_sets: u32) -> Option<()> {
        live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < max_sets).then_some(n + 1)
        })
        .ok()
        .map(|_| ())
    }
}

impl DescriptorSetOps<Headless> for HeadlessDescriptorSet {
    fn raw(&self) -> u64 {
        self.id
    }

    fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    fn layout_id(&self) -> LayoutId {
        self.layout_id
    }

    fn set_index(&self) -> u32 {
        self.set_index
    }
}

impl Drop for HeadlessDescriptorSet {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_robin_skips_held_images() {
        let mut cursor = ChainCursor::default();
        assert_eq!(cursor.acquire(3), Some(0));
        assert_eq!(cursor.acquire(3), Some(1));
        assert!(cursor.release(0));
        assert_eq!(cursor.acquire(3), Some(2));
        assert_eq!(cursor.acquire(3), Some(0));
        assert_eq!(cursor.acquire(3), None);
        assert!(!cursor.release(7));
    }

    #[test]
    fn test_set_budget() {
        let live = AtomicU32::new(0);
        assert!(HeadlessDescriptorSet::reserve(&live, 2).is_some());
        assert!(HeadlessDescriptorSet::reserve(&live, 2).is_some());
        assert!(HeadlessDescriptorSet::reserve(&live, 2).is_none());
    }
}
