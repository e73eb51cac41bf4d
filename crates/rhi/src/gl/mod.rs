//! Legacy immediate-mode backend on OpenGL 4.3 core through `glow`.
//!
//! OpenGL has no explicit command buffers, semaphores or image chains, so
//! this backend maps the frame protocol onto what GL offers: commands are
//! recorded into a list and replayed at submission, fences are GL sync
//! objects, semaphores are empty (GL executes in submission order) and the
//! image chain cycles indices over the default framebuffer.
//!
//! The GL context itself is owned by the windowing layer, which hands the
//! device a [`GlSurface`] for buffer swaps and size queries. The context
//! must stay current on the thread that uses the device.

mod command;
mod convert;
mod device;
mod resources;

use prism_core::RenderApi;

use crate::backend::Backend;
use crate::context::GraphicsContext;
use crate::error::RhiResult;
use crate::types::Extent2D;

pub use command::{GlCommandBuffer, GlCommandPool};
pub use device::GlDevice;
pub use resources::{
    BINDINGS_PER_SET, GlBuffer, GlDescriptorSet, GlFence, GlImageChain, GlPipeline, GlSemaphore,
    GlTexture, binding_point,
};

/// Window-system side of a GL context.
pub trait GlSurface {
    /// Presents the back buffer.
    fn swap_buffers(&self) -> Result<(), String>;

    /// Current size of the default framebuffer in pixels.
    fn drawable_size(&self) -> Extent2D;

    /// Enables or disables waiting for vertical blank on swap.
    fn set_swap_interval(&self, vsync: bool) -> Result<(), String>;
}

/// Marker type for the OpenGL backend.
#[derive(Clone, Copy, Debug)]
pub struct OpenGl;

impl Backend for OpenGl {
    const API: RenderApi = RenderApi::OpenGl;

    type Device = GlDevice;
    type ImageChain = GlImageChain;
    type CommandPool = GlCommandPool;
    type CommandBuffer = GlCommandBuffer;
    type Semaphore = GlSemaphore;
    type Fence = GlFence;
    type Buffer = GlBuffer;
    type Texture = GlTexture;
    type Pipeline = GlPipeline;
    type DescriptorSet = GlDescriptorSet;
    type RawDescriptorSet = u32;
}

impl GraphicsContext<OpenGl> {
    /// Creates an OpenGL context wrapper around a current GL context.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RhiError::BackendMismatch`] if another API is
    /// active, or [`crate::RhiError::GlError`] if the context is unusable.
    pub fn new(gl: glow::Context, surface: impl GlSurface + 'static) -> RhiResult<Self> {
        Self::create(|| GlDevice::new(gl, Box::new(surface)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_api() {
        assert_eq!(OpenGl::API, RenderApi::OpenGl);
        assert_eq!(<OpenGl as Backend>::RawDescriptorSet::default(), 0);
    }
}
