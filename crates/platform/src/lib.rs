//! Windowing glue for prism.
//!
//! This crate wraps winit so the renderer can stay window-system agnostic:
//! - Window creation
//! - Raw display/window handles for presentation surfaces
//! - Framebuffer size queries for resize handling

mod window;

pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
