//! Backend-neutral value types.
//!
//! Everything in this module is plain data: surface capabilities and the
//! pure selection functions that pick an extent, format, present mode and
//! image count from them, plus the outcome enums of the acquire/present
//! protocol.

use glam::Vec4;
use tracing::{debug, warn};

/// Two-dimensional extent in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    /// Creates a new extent.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is zero (e.g. a minimized window).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Surface capabilities reported by the presentation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    /// Minimum number of presentable images.
    pub min_image_count: u32,
    /// Maximum number of presentable images; 0 means unbounded.
    pub max_image_count: u32,
    /// Extent dictated by the surface, if any.
    pub current_extent: Option<Extent2D>,
    /// Smallest supported extent.
    pub min_extent: Extent2D,
    /// Largest supported extent.
    pub max_extent: Extent2D,
}

impl SurfaceCapabilities {
    /// Clamps `requested` componentwise into `[min_extent, max_extent]`.
    pub fn clamp_extent(&self, requested: Extent2D) -> Extent2D {
        Extent2D {
            width: requested
                .width
                .clamp(self.min_extent.width, self.max_extent.width),
            height: requested
                .height
                .clamp(self.min_extent.height, self.max_extent.height),
        }
    }

    /// Chooses the image chain extent for a requested framebuffer size.
    ///
    /// When the surface dictates its extent, that extent is used; otherwise
    /// the request is clamped into the supported range.
    pub fn choose_extent(&self, requested: Extent2D) -> Extent2D {
        if let Some(current) = self.current_extent {
            debug!(
                "Using current surface extent: {}x{}",
                current.width, current.height
            );
            return current;
        }

        let extent = self.clamp_extent(requested);

        debug!(
            "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
            extent.width,
            extent.height,
            requested.width,
            requested.height,
            self.min_extent.width,
            self.min_extent.height,
            self.max_extent.width,
            self.max_extent.height
        );

        extent
    }
}

/// Everything needed to decide on an image chain configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSupport {
    pub capabilities: SurfaceCapabilities,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

impl SurfaceSupport {
    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Pixel formats understood by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Bgra8Srgb,
    Bgra8Unorm,
    Rgba8Srgb,
    Rgba8Unorm,
    Rgba16Float,
    Depth32Float,
    Depth24Stencil8,
}

impl Format {
    /// Returns true for depth (and depth/stencil) formats.
    pub fn is_depth(self) -> bool {
        matches!(self, Format::Depth32Float | Format::Depth24Stencil8)
    }

    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Rgba16Float => 8,
            _ => 4,
        }
    }
}

/// Color space of presentable images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    SrgbNonlinear,
    ExtendedSrgbLinear,
    Hdr10St2084,
}

/// Format and color space pair offered by a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: Format,
    pub color_space: ColorSpace,
}

/// Presentation modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    /// Vsync, never tears; always available.
    Fifo,
    /// Vsync unless a frame is late.
    FifoRelaxed,
    /// Replaces the queued image; low latency without tearing.
    Mailbox,
    /// No synchronization; may tear.
    Immediate,
}

/// Primitive assembly for a draw call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// Index element width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    /// Size of one index in bytes.
    pub fn size(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Result of a successful acquisition request.
///
/// Fatal failures (including exceeding the acquisition timeout) are
/// reported as `Err(RhiError)` instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The image at this index is ready to be rendered to.
    Ready(u32),
    /// The image is usable this frame, but the chain should be rebuilt.
    SubOptimal(u32),
    /// The surface changed; nothing was acquired and the chain must be rebuilt.
    OutOfDate,
}

impl AcquireOutcome {
    /// Returns the acquired image index, if any.
    pub fn image_index(self) -> Option<u32> {
        match self {
            AcquireOutcome::Ready(index) | AcquireOutcome::SubOptimal(index) => Some(index),
            AcquireOutcome::OutOfDate => None,
        }
    }
}

/// Result of a presentation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    SubOptimal,
    OutOfDate,
}

/// Result of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// Linear RGBA clear color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl Default for ClearColor {
    fn default() -> Self {
        // Dark blue-gray
        Self([0.1, 0.1, 0.15, 1.0])
    }
}

impl From<Vec4> for ClearColor {
    fn from(color: Vec4) -> Self {
        Self(color.to_array())
    }
}

/// Parameters for building an image chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageChainDesc {
    pub extent: Extent2D,
    pub surface_format: SurfaceFormat,
    pub present_mode: PresentMode,
    pub image_count: u32,
    /// Depth attachment sized with the chain, if any.
    pub depth_format: Option<Format>,
}

/// Picks a surface format, preferring sRGB BGRA.
///
/// # Panics
///
/// Panics if `formats` is empty; callers check [`SurfaceSupport::is_adequate`] first.
pub fn choose_surface_format(formats: &[SurfaceFormat]) -> SurfaceFormat {
    let preferred = formats.iter().find(|f| {
        f.format == Format::Bgra8Srgb && f.color_space == ColorSpace::SrgbNonlinear
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: Bgra8Srgb with SrgbNonlinear");
        return format;
    }

    let alternative = formats.iter().find(|f| {
        f.format == Format::Bgra8Unorm && f.color_space == ColorSpace::SrgbNonlinear
    });

    if let Some(&format) = alternative {
        warn!("Using fallback surface format: Bgra8Unorm with SrgbNonlinear");
        return format;
    }

    warn!("Using first available surface format: {:?}", formats[0]);
    formats[0]
}

/// Picks a present mode.
///
/// With vsync, FIFO is used (always available). Without vsync the lowest
/// latency mode on offer wins: mailbox, then immediate, then FIFO.
pub fn choose_present_mode(present_modes: &[PresentMode], vsync: bool) -> PresentMode {
    if vsync {
        debug!("Selected FIFO present mode (vsync)");
        return PresentMode::Fifo;
    }

    for mode in [PresentMode::Mailbox, PresentMode::Immediate] {
        if present_modes.contains(&mode) {
            debug!("Selected {:?} present mode (vsync disabled)", mode);
            return mode;
        }
    }

    debug!("Selected FIFO present mode (no low-latency mode available)");
    PresentMode::Fifo
}

/// Decides how many presentable images to request.
///
/// At least one more than the surface minimum and at least the frame ring
/// size, capped by the surface maximum when one exists.
pub fn determine_image_count(capabilities: &SurfaceCapabilities, frames_in_flight: usize) -> u32 {
    let preferred = (capabilities.min_image_count + 1).max(frames_in_flight as u32);

    let image_count = if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    };

    debug!(
        "Image count: {} (min: {}, max: {})",
        image_count,
        capabilities.min_image_count,
        if capabilities.max_image_count == 0 {
            "unlimited".to_string()
        } else {
            capabilities.max_image_count.to_string()
        }
    );

    image_count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: (u32, u32), max: (u32, u32)) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: None,
            min_extent: Extent2D::new(min.0, min.1),
            max_extent: Extent2D::new(max.0, max.1),
        }
    }

    #[test]
    fn test_clamp_extent_inside_range_is_exact() {
        let caps = caps((64, 64), (4096, 2160));
        assert_eq!(
            caps.clamp_extent(Extent2D::new(800, 600)),
            Extent2D::new(800, 600)
        );
    }

    #[test]
    fn test_clamp_extent_above_and_below() {
        let caps = caps((64, 64), (4096, 2160));
        assert_eq!(
            caps.clamp_extent(Extent2D::new(10000, 10000)),
            Extent2D::new(4096, 2160)
        );
        assert_eq!(
            caps.clamp_extent(Extent2D::new(1, 30)),
            Extent2D::new(64, 64)
        );
    }

    #[test]
    fn test_choose_extent_uses_current_extent() {
        let mut caps = caps((64, 64), (4096, 2160));
        caps.current_extent = Some(Extent2D::new(1024, 768));
        assert_eq!(
            caps.choose_extent(Extent2D::new(800, 600)),
            Extent2D::new(1024, 768)
        );
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            SurfaceFormat {
                format: Format::Rgba8Unorm,
                color_space: ColorSpace::SrgbNonlinear,
            },
            SurfaceFormat {
                format: Format::Bgra8Srgb,
                color_space: ColorSpace::SrgbNonlinear,
            },
            SurfaceFormat {
                format: Format::Bgra8Unorm,
                color_space: ColorSpace::SrgbNonlinear,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, Format::Bgra8Srgb);
    }

    #[test]
    fn test_choose_surface_format_unorm_fallback() {
        let formats = vec![
            SurfaceFormat {
                format: Format::Rgba8Unorm,
                color_space: ColorSpace::SrgbNonlinear,
            },
            SurfaceFormat {
                format: Format::Bgra8Unorm,
                color_space: ColorSpace::SrgbNonlinear,
            },
        ];
        assert_eq!(choose_surface_format(&formats).format, Format::Bgra8Unorm);
    }

    #[test]
    fn test_choose_surface_format_first_available() {
        let formats = vec![SurfaceFormat {
            format: Format::Rgba16Float,
            color_space: ColorSpace::ExtendedSrgbLinear,
        }];
        assert_eq!(choose_surface_format(&formats).format, Format::Rgba16Float);
    }

    #[test]
    fn test_choose_present_mode_vsync_is_fifo() {
        let modes = [PresentMode::Mailbox, PresentMode::Fifo];
        assert_eq!(choose_present_mode(&modes, true), PresentMode::Fifo);
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox_without_vsync() {
        let modes = [
            PresentMode::Fifo,
            PresentMode::Immediate,
            PresentMode::Mailbox,
        ];
        assert_eq!(choose_present_mode(&modes, false), PresentMode::Mailbox);
    }

    #[test]
    fn test_choose_present_mode_immediate_then_fifo() {
        assert_eq!(
            choose_present_mode(&[PresentMode::Fifo, PresentMode::Immediate], false),
            PresentMode::Immediate
        );
        assert_eq!(
            choose_present_mode(&[PresentMode::Fifo], false),
            PresentMode::Fifo
        );
    }

    #[test]
    fn test_determine_image_count() {
        let mut caps = caps((1, 1), (100, 100));
        caps.min_image_count = 2;
        caps.max_image_count = 3;
        assert_eq!(determine_image_count(&caps, 2), 3);

        caps.max_image_count = 0;
        assert_eq!(determine_image_count(&caps, 2), 3);

        caps.min_image_count = 1;
        assert_eq!(determine_image_count(&caps, 3), 3);

        caps.min_image_count = 2;
        caps.max_image_count = 2;
        assert_eq!(determine_image_count(&caps, 3), 2);
    }

    #[test]
    fn test_acquire_outcome_image_index() {
        assert_eq!(AcquireOutcome::Ready(2).image_index(), Some(2));
        assert_eq!(AcquireOutcome::SubOptimal(1).image_index(), Some(1));
        assert_eq!(AcquireOutcome::OutOfDate.image_index(), None);
    }

    #[test]
    fn test_extent_is_empty() {
        assert!(Extent2D::new(0, 1080).is_empty());
        assert!(Extent2D::new(1920, 0).is_empty());
        assert!(!Extent2D::new(1, 1).is_empty());
    }
}
