//! OpenGL resource objects.
//!
//! GL objects belong to the context that created them and must be used on
//! its thread, so resources share the context through an `Rc` rather than
//! an `Arc`. Buffers, textures and programs are reference counted so that
//! recorded commands and descriptor sets can keep them alive until replay.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use glow::HasContext;
use tracing::{debug, trace};

use super::OpenGl;
use crate::backend::{DescriptorSetOps, ImageChainOps, PipelineOps};
use crate::buffer::BufferDesc;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{
    DescriptorSetLayoutDesc, FixedFunctionState, LayoutId, PipelineKey, VertexLayout,
};
use crate::texture::TextureDesc;
use crate::types::{Extent2D, FenceStatus, ImageChainDesc, PresentMode, SurfaceFormat};

/// Binding points reserved for each descriptor set.
///
/// Set `s`, binding `b` maps to uniform/storage block binding and texture
/// unit `s * BINDINGS_PER_SET + b`; GLSL sources declare that number with
/// `layout(binding = N)`.
pub const BINDINGS_PER_SET: u32 = 16;

/// GL binding point of `binding` in descriptor set `set_index`.
#[inline]
pub fn binding_point(set_index: u32, binding: u32) -> u32 {
    set_index * BINDINGS_PER_SET + binding
}

// ============================================================================
// Image chain
// ============================================================================

/// Virtual image chain over the default framebuffer.
///
/// The window system owns the real buffers; the chain only cycles image
/// indices so the frame protocol is identical to the explicit backends.
pub struct GlImageChain {
    desc: ImageChainDesc,
    next: Cell<u32>,
    acquired: Cell<Option<u32>>,
}

impl GlImageChain {
    pub(crate) fn new(desc: ImageChainDesc) -> Self {
        Self {
            desc,
            next: Cell::new(0),
            acquired: Cell::new(None),
        }
    }

    /// Hands out the next image index.
    pub(crate) fn acquire(&self) -> u32 {
        let index = self.next.get();
        self.next.set((index + 1) % self.desc.image_count.max(1));
        self.acquired.set(Some(index));
        index
    }

    /// Returns false if `index` was not the acquired image.
    pub(crate) fn release(&self, index: u32) -> bool {
        if self.acquired.get() == Some(index) {
            self.acquired.set(None);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.desc.depth_format.is_some()
    }
}

impl ImageChainOps for GlImageChain {
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

// ============================================================================
// Synchronization
// ============================================================================

/// GL executes commands in submission order, so semaphores carry no state.
#[derive(Debug, Default)]
pub struct GlSemaphore;

/// Longest single `glClientWaitSync` timeout.
const MAX_WAIT_SLICE_NS: i32 = i32::MAX;

/// Fence backed by a GL sync object.
pub struct GlFence {
    gl: Rc<glow::Context>,
    sync: Cell<Option<glow::NativeFence>>,
    signaled: Cell<bool>,
}

impl GlFence {
    pub(crate) fn new(gl: Rc<glow::Context>, signaled: bool) -> Self {
        Self {
            gl,
            sync: Cell::new(None),
            signaled: Cell::new(signaled),
        }
    }

    /// True while a submission may still signal the fence.
    pub(crate) fn is_pending(&self) -> bool {
        let sync = self.sync.take();
        let pending = sync.is_some();
        self.sync.set(sync);
        pending
    }

    #[inline]
    pub(crate) fn is_signaled(&self) -> bool {
        self.signaled.get()
    }

    /// Attaches the sync object inserted after a submission.
    pub(crate) fn arm(&self, sync: glow::NativeFence) {
        self.signaled.set(false);
        self.sync.set(Some(sync));
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> RhiResult<FenceStatus> {
        if self.signaled.get() {
            return Ok(FenceStatus::Signaled);
        }
        let Some(sync) = self.sync.take() else {
            return Err(RhiError::SyncError(
                "waiting on an unsignaled fence with no pending submission".to_string(),
            ));
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let slice = match deadline {
                None => MAX_WAIT_SLICE_NS,
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .as_nanos()
                    .min(MAX_WAIT_SLICE_NS as u128) as i32,
            };

            let status =
                unsafe { self.gl.client_wait_sync(sync, glow::SYNC_FLUSH_COMMANDS_BIT, slice) };
            match status {
                glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => {
                    unsafe { self.gl.delete_sync(sync) };
                    self.signaled.set(true);
                    return Ok(FenceStatus::Signaled);
                }
                glow::TIMEOUT_EXPIRED => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        self.sync.set(Some(sync));
                        return Ok(FenceStatus::TimedOut);
                    }
                }
                other => {
                    self.sync.set(Some(sync));
                    return Err(RhiError::GlError(format!(
                        "glClientWaitSync returned 0x{:04x}",
                        other
                    )));
                }
            }
        }
    }

    pub(crate) fn reset(&self) -> RhiResult<()> {
        if self.is_pending() {
            return Err(RhiError::SyncError(
                "reset of a fence with pending work".to_string(),
            ));
        }
        self.signaled.set(false);
        Ok(())
    }
}

impl Drop for GlFence {
    fn drop(&mut self) {
        if let Some(sync) = self.sync.take() {
            unsafe { self.gl.delete_sync(sync) };
        }
    }
}

// ============================================================================
// Buffers and textures
// ============================================================================

pub(crate) struct GlBufferObject {
    gl: Rc<glow::Context>,
    pub(crate) buffer: glow::NativeBuffer,
    pub(crate) desc: BufferDesc,
}

impl GlBufferObject {
    pub(crate) fn new(
        gl: Rc<glow::Context>,
        buffer: glow::NativeBuffer,
        desc: BufferDesc,
    ) -> Self {
        Self { gl, buffer, desc }
    }
}

impl Drop for GlBufferObject {
    fn drop(&mut self) {
        unsafe { self.gl.delete_buffer(self.buffer) };
        debug!(
            "Destroyed GL {} buffer ({} bytes)",
            self.desc.usage.name(),
            self.desc.size
        );
    }
}

/// OpenGL buffer object.
pub struct GlBuffer {
    pub(crate) object: Rc<GlBufferObject>,
}

impl GlBuffer {
    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.object.desc
    }
}

pub(crate) struct GlTextureObject {
    gl: Rc<glow::Context>,
    pub(crate) texture: glow::NativeTexture,
    pub(crate) desc: TextureDesc,
}

impl GlTextureObject {
    pub(crate) fn new(
        gl: Rc<glow::Context>,
        texture: glow::NativeTexture,
        desc: TextureDesc,
    ) -> Self {
        Self { gl, texture, desc }
    }
}

impl Drop for GlTextureObject {
    fn drop(&mut self) {
        unsafe { self.gl.delete_texture(self.texture) };
        debug!(
            "Destroyed GL texture {}x{}",
            self.desc.width, self.desc.height
        );
    }
}

/// OpenGL 2D texture.
pub struct GlTexture {
    pub(crate) object: Rc<GlTextureObject>,
}

impl GlTexture {
    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.object.desc
    }
}

// ============================================================================
// Pipelines
// ============================================================================

/// Linked program, its vertex array object and the state applied at bind.
pub(crate) struct GlProgram {
    gl: Rc<glow::Context>,
    pub(crate) program: glow::NativeProgram,
    pub(crate) vao: glow::NativeVertexArray,
    pub(crate) state: FixedFunctionState,
    pub(crate) vertex_layout: VertexLayout,
}

impl GlProgram {
    pub(crate) fn new(
        gl: Rc<glow::Context>,
        program: glow::NativeProgram,
        vao: glow::NativeVertexArray,
        state: FixedFunctionState,
        vertex_layout: VertexLayout,
    ) -> Self {
        Self {
            gl,
            program,
            vao,
            state,
            vertex_layout,
        }
    }
}

impl Drop for GlProgram {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_vertex_array(self.vao);
            self.gl.delete_program(self.program);
        }
    }
}

/// OpenGL pipeline: a program plus fixed-function state.
pub struct GlPipeline {
    pub(crate) program: Rc<GlProgram>,
    pub(crate) key: PipelineKey,
    pub(crate) layout_id: LayoutId,
    pub(crate) name: String,
    pub(crate) layouts: Vec<DescriptorSetLayoutDesc>,
    pub(crate) max_sets: u32,
    pub(crate) live_sets: Rc<Cell<u32>>,
}

impl PipelineOps for GlPipeline {
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

impl Drop for GlPipeline {
    fn drop(&mut self) {
        debug!("Destroyed GL pipeline '{}'", self.name);
    }
}

// ============================================================================
// Descriptor sets
// ============================================================================

/// One resource bound by a descriptor set.
pub(crate) enum GlBinding {
    Buffer {
        target: u32,
        binding: u32,
        buffer: Rc<GlBufferObject>,
        offset: u64,
        range: u64,
        dynamic: bool,
    },
    Texture {
        binding: u32,
        texture: Rc<GlTextureObject>,
    },
}

pub(crate) struct GlSetEntry {
    pub(crate) dynamic: bool,
    pub(crate) bindings: Vec<GlBinding>,
}

/// Contents of every live descriptor set, keyed by the raw set id that
/// recorded bind commands carry.
#[derive(Default)]
pub(crate) struct DescriptorRegistry {
    next_id: Cell<u32>,
    sets: RefCell<HashMap<u32, GlSetEntry>>,
}

impl DescriptorRegistry {
    pub(crate) fn insert(&self, entry: GlSetEntry) -> u32 {
        // Id 0 is the default raw handle and never names a set.
        let id = self.next_id.get().wrapping_add(1).max(1);
        self.next_id.set(id);
        self.sets.borrow_mut().insert(id, entry);
        id
    }

    pub(crate) fn remove(&self, id: u32) {
        self.sets.borrow_mut().remove(&id);
    }

    pub(crate) fn sets(&self) -> std::cell::Ref<'_, HashMap<u32, GlSetEntry>> {
        self.sets.borrow()
    }
}

/// Descriptor set registered with the device.
pub struct GlDescriptorSet {
    pub(crate) id: u32,
    pub(crate) registry: Rc<DescriptorRegistry>,
    pub(crate) layout_id: LayoutId,
    pub(crate) set_index: u32,
    pub(crate) dynamic: bool,
    pub(crate) live: Rc<Cell<u32>>,
}

impl DescriptorSetOps<OpenGl> for GlDescriptorSet {
    fn raw(&self) -> u32 {
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

impl Drop for GlDescriptorSet {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        self.live.set(self.live.get().saturating_sub(1));
        trace!("Released GL descriptor set {}", self.id);
    }
}

/// Takes one slot from a pipeline's set budget.
pub(crate) fn reserve_set(live: &Cell<u32>, max_sets: u32) -> bool {
    let count = live.get();
    if count >= max_sets {
        return false;
    }
    live.set(count + 1);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorSpace, Format};

    fn chain(image_count: u32) -> GlImageChain {
        GlImageChain::new(ImageChainDesc {
            extent: Extent2D::new(800, 600),
            surface_format: SurfaceFormat {
                format: Format::Rgba8Unorm,
                color_space: ColorSpace::SrgbNonlinear,
            },
            present_mode: PresentMode::Fifo,
            image_count,
            depth_format: Some(Format::Depth24Stencil8),
        })
    }

    #[test]
    fn test_binding_points_do_not_overlap() {
        assert_eq!(binding_point(0, 0), 0);
        assert_eq!(binding_point(0, 15), 15);
        assert_eq!(binding_point(1, 0), 16);
        assert_eq!(binding_point(2, 3), 35);
    }

    #[test]
    fn test_chain_cycles_indices() {
        let chain = chain(3);
        assert!(chain.has_depth());
        let indices: Vec<u32> = (0..4)
            .map(|_| {
                let index = chain.acquire();
                assert!(chain.release(index));
                index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_chain_release_requires_acquire() {
        let chain = chain(2);
        assert!(!chain.release(0));
        let index = chain.acquire();
        assert!(!chain.release(index + 1));
        assert!(chain.release(index));
        assert!(!chain.release(index));
    }

    #[test]
    fn test_registry_ids_are_never_zero() {
        let registry = DescriptorRegistry::default();
        let a = registry.insert(GlSetEntry {
            dynamic: false,
            bindings: Vec::new(),
        });
        let b = registry.insert(GlSetEntry {
            dynamic: true,
            bindings: Vec::new(),
        });
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert!(registry.sets().get(&b).is_some_and(|e| e.dynamic));

        registry.remove(a);
        assert!(registry.sets().get(&a).is_none());
    }

    #[test]
    fn test_set_budget() {
        let live = Cell::new(0);
        assert!(reserve_set(&live, 2));
        assert!(reserve_set(&live, 2));
        assert!(!reserve_set(&live, 2));
        assert_eq!(live.get(), 2);
    }
}
