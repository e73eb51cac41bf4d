//! Core utilities shared by the prism crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration (backend selection, vsync, ring size, timeouts)
//! - Timer utilities

mod config;
mod error;
mod logging;
mod timer;

pub use config::{RenderApi, RendererConfig, SubOptimalPolicy};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
