//! Window management using winit.
//!
//! The window only exposes what the graphics layer needs: raw display and
//! window handles for surface creation and the framebuffer size for
//! image chain sizing.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use prism_core::{Error, Result};

/// A resizable top-level window.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    /// Create a new window with the given framebuffer size and title.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", width, height);

        Ok(Self {
            window: Arc::new(window),
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current framebuffer size in physical pixels. Zero while minimized on
    /// some platforms.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Raw handles for creating a presentation surface.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the platform cannot provide a handle.
    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;
        Ok((display.as_raw(), window.as_raw()))
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}
