//! CPU-simulated backend.
//!
//! The headless device needs no window or GPU. It simulates a presentation
//! engine with configurable surface capabilities and a GPU timeline whose
//! submissions either complete immediately ([`Completion::Automatic`]) or
//! only when a [`HeadlessController`] says so ([`Completion::Manual`]), so
//! fence waits genuinely block.
//!
//! It also checks the synchronization rules a real driver's validation
//! layer would: fences must be unsignaled at submission, semaphores may
//! hold at most one pending signal, and only acquired images may be
//! presented. Misuse is reported as [`crate::RhiError::SyncError`].
//!
//! # Example
//!
//! ```
//! use prism_rhi::GraphicsContext;
//! use prism_rhi::headless::{Headless, HeadlessConfig};
//!
//! let context = GraphicsContext::<Headless>::new(HeadlessConfig::default()).unwrap();
//! let controller = context.device().controller();
//! assert_eq!(controller.submissions().len(), 0);
//! ```

mod device;
mod resources;

use prism_core::RenderApi;

use crate::backend::Backend;
use crate::context::GraphicsContext;
use crate::error::RhiResult;
use crate::types::{
    ColorSpace, Extent2D, Format, PresentMode, SurfaceCapabilities, SurfaceFormat, SurfaceSupport,
};

pub use device::{
    Completion, HeadlessController, HeadlessDevice, Injected, PresentRecord, Submission,
};
pub use resources::{
    HeadlessBuffer, HeadlessCommandBuffer, HeadlessCommandPool, HeadlessDescriptorSet,
    HeadlessFence, HeadlessImageChain, HeadlessPipeline, HeadlessSemaphore, HeadlessTexture,
    RecordedCommand,
};

/// Marker type for the simulated backend.
#[derive(Clone, Copy, Debug)]
pub struct Headless;

impl Backend for Headless {
    const API: RenderApi = RenderApi::Headless;

    type Device = HeadlessDevice;
    type ImageChain = HeadlessImageChain;
    type CommandPool = HeadlessCommandPool;
    type CommandBuffer = HeadlessCommandBuffer;
    type Semaphore = HeadlessSemaphore;
    type Fence = HeadlessFence;
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Pipeline = HeadlessPipeline;
    type DescriptorSet = HeadlessDescriptorSet;
    type RawDescriptorSet = u64;
}

/// Initial state of a simulated device.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub support: SurfaceSupport,
    pub completion: Completion,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            support: SurfaceSupport {
                capabilities: SurfaceCapabilities {
                    min_image_count: 2,
                    max_image_count: 8,
                    current_extent: None,
                    min_extent: Extent2D::new(1, 1),
                    max_extent: Extent2D::new(16384, 16384),
                },
                formats: vec![
                    SurfaceFormat {
                        format: Format::Bgra8Srgb,
                        color_space: ColorSpace::SrgbNonlinear,
                    },
                    SurfaceFormat {
                        format: Format::Bgra8Unorm,
                        color_space: ColorSpace::SrgbNonlinear,
                    },
                ],
                present_modes: vec![
                    PresentMode::Fifo,
                    PresentMode::Mailbox,
                    PresentMode::Immediate,
                ],
            },
            completion: Completion::Automatic,
        }
    }
}

impl HeadlessConfig {
    /// Replaces the surface extent range.
    pub fn with_extent_range(mut self, min: Extent2D, max: Extent2D) -> Self {
        self.support.capabilities.min_extent = min;
        self.support.capabilities.max_extent = max;
        self
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }
}

impl GraphicsContext<Headless> {
    /// Creates a context backed by a simulated device.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RhiError::BackendMismatch`] if another API is active.
    pub fn new(config: HeadlessConfig) -> RhiResult<Self> {
        Self::create(|| Ok(HeadlessDevice::new(config)))
    }
}
