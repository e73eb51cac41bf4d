//! Render-API-agnostic interfaces.
//!
//! A backend is a zero-sized marker type implementing [`Backend`]. Its
//! associated types are the concrete resource variants for one native API,
//! and every higher layer is written generically over `B: Backend`. The
//! variant set is closed: [`crate::vulkan::Vulkan`], [`crate::gl::OpenGl`]
//! and [`crate::headless::Headless`].

use std::fmt::Debug;
use std::time::Duration;

use prism_core::RenderApi;

use crate::buffer::BufferDesc;
use crate::descriptor::DescriptorWrite;
use crate::error::RhiResult;
use crate::pipeline::{LayoutId, PipelineDesc, PipelineKey};
use crate::texture::TextureDesc;
use crate::types::{
    AcquireOutcome, ClearColor, Extent2D, FenceStatus, ImageChainDesc, IndexType, PresentMode,
    PresentOutcome, PrimitiveType, SurfaceFormat, SurfaceSupport,
};

/// A native graphics API and its resource types.
pub trait Backend: Sized + 'static {
    /// Which API this backend drives.
    const API: RenderApi;

    type Device: GraphicsDevice<Self>;
    type ImageChain: ImageChainOps;
    type CommandPool;
    type CommandBuffer: CommandEncoder<Self>;
    /// GPU-side wait/signal primitive, not observable from the CPU.
    type Semaphore;
    /// CPU-waitable completion signal.
    type Fence;
    type Buffer;
    type Texture;
    type Pipeline: PipelineOps;
    type DescriptorSet: DescriptorSetOps<Self>;
    /// Handle passed to a bind call; cheap to copy into scratch storage.
    type RawDescriptorSet: Copy + Default + Debug;
}

/// Device-level operations of a backend.
///
/// All methods take `&self`; resources release themselves when dropped.
pub trait GraphicsDevice<B: Backend> {
    /// Queries the surface the device presents to.
    fn surface_support(&self) -> RhiResult<SurfaceSupport>;

    /// Builds a presentable image chain. `old` is the chain being replaced,
    /// if any; it stays alive until the caller drops it.
    fn create_image_chain(
        &self,
        desc: &ImageChainDesc,
        old: Option<&B::ImageChain>,
    ) -> RhiResult<B::ImageChain>;

    /// Requests the next presentable image, signaling `signal` once it can
    /// be written. Waiting longer than `timeout` is an error.
    fn acquire_next_image(
        &self,
        chain: &B::ImageChain,
        signal: &B::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome>;

    /// Queues `image_index` for display once `wait` is signaled.
    fn present(
        &self,
        chain: &B::ImageChain,
        image_index: u32,
        wait: &B::Semaphore,
    ) -> RhiResult<PresentOutcome>;

    fn create_semaphore(&self) -> RhiResult<B::Semaphore>;

    fn create_fence(&self, signaled: bool) -> RhiResult<B::Fence>;

    /// Blocks until `fence` is signaled or `timeout` expires. `None` waits
    /// without bound.
    fn wait_for_fence(&self, fence: &B::Fence, timeout: Option<Duration>)
    -> RhiResult<FenceStatus>;

    fn reset_fence(&self, fence: &B::Fence) -> RhiResult<()>;

    fn create_command_pool(&self) -> RhiResult<B::CommandPool>;

    /// Returns every buffer allocated from `pool` to the initial state.
    fn reset_command_pool(&self, pool: &mut B::CommandPool) -> RhiResult<()>;

    fn allocate_command_buffer(&self, pool: &mut B::CommandPool) -> RhiResult<B::CommandBuffer>;

    /// Submits recorded work. The GPU waits on `wait` before writing color
    /// output, signals `signal` and then `fence` on completion.
    fn submit(
        &self,
        cmd: &B::CommandBuffer,
        wait: Option<&B::Semaphore>,
        signal: Option<&B::Semaphore>,
        fence: &B::Fence,
    ) -> RhiResult<()>;

    /// Blocks until all submitted work has completed.
    fn wait_idle(&self) -> RhiResult<()>;

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<B::Buffer>;

    /// Copies `data` into a host-visible buffer at `offset`.
    fn write_buffer(&self, buffer: &B::Buffer, offset: u64, data: &[u8]) -> RhiResult<()>;

    /// Creates a texture, optionally uploading its initial texels.
    fn create_texture(&self, desc: &TextureDesc, data: Option<&[u8]>) -> RhiResult<B::Texture>;

    fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<B::Pipeline>;

    /// Creates a descriptor set for layout `set_index` of `pipeline`.
    fn create_descriptor_set(
        &self,
        pipeline: &B::Pipeline,
        set_index: u32,
        writes: &[DescriptorWrite<'_, B>],
    ) -> RhiResult<B::DescriptorSet>;
}

/// Read-only view of a built image chain.
pub trait ImageChainOps {
    fn extent(&self) -> Extent2D;
    fn format(&self) -> SurfaceFormat;
    fn image_count(&self) -> u32;
    fn present_mode(&self) -> PresentMode;
}

/// Native command recording.
///
/// State tracking lives in [`crate::command::CommandBuffer`]; implementors
/// only translate calls into native commands.
pub trait CommandEncoder<B: Backend> {
    fn begin(&mut self) -> RhiResult<()>;
    fn end(&mut self) -> RhiResult<()>;
    fn reset(&mut self) -> RhiResult<()>;

    /// Makes `image_index` the color target and clears it.
    fn begin_render_target(&mut self, chain: &B::ImageChain, image_index: u32, clear: ClearColor);

    fn end_render_target(&mut self);

    /// Ends any active render target and transitions the image for display.
    fn transition_to_present(&mut self, chain: &B::ImageChain, image_index: u32);

    fn bind_pipeline(&mut self, pipeline: &B::Pipeline);

    /// One native bind of `sets` starting at `first_set`.
    fn bind_descriptor_sets(
        &mut self,
        pipeline: &B::Pipeline,
        first_set: u32,
        sets: &[B::RawDescriptorSet],
        dynamic_offsets: &[u32],
    );

    fn bind_vertex_buffer(&mut self, buffer: &B::Buffer, offset: u64);
    fn bind_index_buffer(&mut self, buffer: &B::Buffer, offset: u64, index_type: IndexType);
    fn set_viewport(&mut self, extent: Extent2D);
    fn set_scissor(&mut self, extent: Extent2D);

    fn draw(&mut self, primitive: PrimitiveType, vertex_count: u32, first_vertex: u32);

    fn draw_indexed(
        &mut self,
        primitive: PrimitiveType,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );
}

/// Identity of a built pipeline.
pub trait PipelineOps {
    fn key(&self) -> &PipelineKey;
    fn layout_id(&self) -> LayoutId;
    /// Number of descriptor set layouts the pipeline was built with.
    fn descriptor_set_count(&self) -> usize;
    fn name(&self) -> &str;
}

/// Identity of a created descriptor set.
pub trait DescriptorSetOps<B: Backend> {
    fn raw(&self) -> B::RawDescriptorSet;
    /// True if the set carries a dynamic binding and consumes one offset.
    fn is_dynamic(&self) -> bool;
    fn layout_id(&self) -> LayoutId;
    /// Slot the set was created for.
    fn set_index(&self) -> u32;
}
