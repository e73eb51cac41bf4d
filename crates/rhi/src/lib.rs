//! Render hardware interface.
//!
//! This crate hides the native graphics APIs behind one backend-agnostic
//! interface. It provides:
//! - The [`backend::Backend`] trait family implemented by every backend
//! - Value types and the surface selection functions
//! - The command buffer lifecycle state machine
//! - The graphics context that selects the backend once per process
//! - Pipeline, descriptor, buffer and texture descriptions
//! - Backends: [`vulkan`] (`ash`), [`gl`] (`glow`) and [`headless`]

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod gl;
pub mod headless;
pub mod pipeline;
pub mod texture;
pub mod types;
pub mod vulkan;

pub use backend::{
    Backend, CommandEncoder, DescriptorSetOps, GraphicsDevice, ImageChainOps, PipelineOps,
};
pub use command::{CommandBuffer, CommandBufferState};
pub use context::{DrawStatistics, GraphicsContext, StatisticsSnapshot, active_render_api};
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
