//! Frame orchestration over the prism RHI.
//!
//! This crate drives frames on any [`prism_rhi::Backend`]:
//! - [`frame`]: the frames-in-flight ring of per-frame resources
//! - [`swapchain`]: image chain lifecycle, acquisition, submission and presentation
//! - [`binder`]: descriptor set binding and the pipeline cache
//! - [`renderer`]: the per-frame entry point

pub mod binder;
pub mod frame;
pub mod renderer;
pub mod swapchain;

pub use binder::{BindSummary, DescriptorBinder, MAX_BOUND_DESCRIPTOR_SETS, PipelineCache};
pub use frame::{FrameRing, FrameSlot};
pub use renderer::{FrameBegin, Renderer};
pub use swapchain::{
    DEPTH_FORMAT, ImageChainSnapshot, SwapchainManager, SwapchainSettings, SwapchainState,
};
