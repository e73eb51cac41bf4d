//! Renderer configuration.
//!
//! [`RendererConfig`] is the single configuration record consumed at context
//! and renderer creation. It can be built in code, loaded from a TOML file,
//! or overridden from the command line by the demo application.
//!
//! # Example
//!
//! ```
//! use prism_core::{RenderApi, RendererConfig};
//!
//! let config = RendererConfig::from_toml_str(
//!     r#"
//!     backend = "headless"
//!     vsync = false
//!     frames_in_flight = 3
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.backend, RenderApi::Headless);
//! assert_eq!(config.frames_in_flight, 3);
//! assert_eq!(config.width, 1280);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Graphics API selected once per process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderApi {
    /// Explicit GPU API (Vulkan 1.3 through `ash`).
    #[default]
    Vulkan,
    /// Legacy immediate-mode API (OpenGL 4.3 core through `glow`).
    #[serde(alias = "gl")]
    OpenGl,
    /// CPU-simulated device with no window or GPU.
    Headless,
}

impl RenderApi {
    /// Returns a human-readable name for the API.
    pub fn name(self) -> &'static str {
        match self {
            RenderApi::Vulkan => "vulkan",
            RenderApi::OpenGl => "opengl",
            RenderApi::Headless => "headless",
        }
    }
}

impl fmt::Display for RenderApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RenderApi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Ok(RenderApi::Vulkan),
            "opengl" | "gl" => Ok(RenderApi::OpenGl),
            "headless" | "null" => Ok(RenderApi::Headless),
            other => Err(Error::Config(format!("Unknown render API '{}'", other))),
        }
    }
}

/// What to do when image acquisition reports a stale-but-usable surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubOptimalPolicy {
    /// Render the frame at the old extent, rebuild once it has been presented.
    #[default]
    RebuildAfterPresent,
    /// Abandon the acquired image, rebuild, and acquire again before recording.
    RebuildImmediately,
}

/// Configuration for the graphics context and renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Backend to create.
    pub backend: RenderApi,
    /// Synchronize presentation with the display refresh.
    pub vsync: bool,
    /// Initial framebuffer width in pixels.
    pub width: u32,
    /// Initial framebuffer height in pixels.
    pub height: u32,
    /// Number of frame slots in the resource ring (2 or 3).
    pub frames_in_flight: usize,
    /// Upper bound on a single image acquisition, in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Upper bound on a frame fence wait, in milliseconds. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    /// Enable API validation (Vulkan validation layers).
    pub validation: bool,
    /// Allocate a depth attachment alongside the presentable images.
    pub depth_buffer: bool,
    /// Handling of sub-optimal acquisitions.
    pub suboptimal_policy: SubOptimalPolicy,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: RenderApi::Vulkan,
            vsync: true,
            width: 1280,
            height: 720,
            frames_in_flight: 2,
            acquire_timeout_ms: 1000,
            fence_timeout_ms: None,
            validation: cfg!(debug_assertions),
            depth_buffer: true,
            suboptimal_policy: SubOptimalPolicy::RebuildAfterPresent,
        }
    }
}

impl RendererConfig {
    /// Smallest supported frame ring.
    pub const MIN_FRAMES_IN_FLIGHT: usize = 2;
    /// Largest supported frame ring.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

    /// Parses and validates a configuration from TOML text.
    ///
    /// Missing keys fall back to [`RendererConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a value is out of range.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "No config file at '{}', using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded config from '{}': {:?}", path.display(), config);
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_FRAMES_IN_FLIGHT..=Self::MAX_FRAMES_IN_FLIGHT)
            .contains(&self.frames_in_flight)
        {
            return Err(Error::Config(format!(
                "frames_in_flight must be {} or {}, got {}",
                Self::MIN_FRAMES_IN_FLIGHT,
                Self::MAX_FRAMES_IN_FLIGHT,
                self.frames_in_flight
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "initial extent must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(Error::Config(
                "acquire_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Acquisition timeout as a [`Duration`].
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Fence timeout as a [`Duration`]; `None` means unbounded.
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.vsync);
        assert_eq!(config.suboptimal_policy, SubOptimalPolicy::RebuildAfterPresent);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RendererConfig::from_toml_str("vsync = false").unwrap();
        assert!(!config.vsync);
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.backend, RenderApi::Vulkan);
    }

    #[test]
    fn test_full_toml() {
        let config = RendererConfig::from_toml_str(
            r#"
            backend = "opengl"
            width = 800
            height = 600
            frames_in_flight = 3
            acquire_timeout_ms = 250
            fence_timeout_ms = 2000
            suboptimal_policy = "rebuild_immediately"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, RenderApi::OpenGl);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.acquire_timeout(), Duration::from_millis(250));
        assert_eq!(config.fence_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.suboptimal_policy, SubOptimalPolicy::RebuildImmediately);
    }

    #[test]
    fn test_rejects_ring_size() {
        for frames in [0, 1, 4] {
            let text = format!("frames_in_flight = {}", frames);
            assert!(matches!(
                RendererConfig::from_toml_str(&text),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn test_rejects_zero_extent() {
        assert!(RendererConfig::from_toml_str("width = 0").is_err());
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert!(matches!(
            RendererConfig::from_toml_str("vsync = ["),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_render_api_from_str() {
        assert_eq!("Vulkan".parse::<RenderApi>().unwrap(), RenderApi::Vulkan);
        assert_eq!("gl".parse::<RenderApi>().unwrap(), RenderApi::OpenGl);
        assert_eq!("headless".parse::<RenderApi>().unwrap(), RenderApi::Headless);
        assert!("metal".parse::<RenderApi>().is_err());
    }

    #[test]
    fn test_render_api_display_round_trips() {
        for api in [RenderApi::Vulkan, RenderApi::OpenGl, RenderApi::Headless] {
            assert_eq!(api.to_string().parse::<RenderApi>().unwrap(), api);
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = RendererConfig::load(Path::new("/nonexistent/prism.toml")).unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
