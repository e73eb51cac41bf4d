//! Swapchain lifecycle.
//!
//! [`SwapchainManager`] owns the presentable image chain and the
//! [`FrameRing`], and is the only component that mutates either. It moves
//! through three states:
//!
//! ```text
//! Uninitialized --init--> Ready <--rebuild-- Invalid
//!                           |                   ^
//!                           +--OutOfDate/stale--+
//! ```
//!
//! A rebuild replaces the image chain wholesale (the previous chain is
//! handed to the backend for reuse and dropped afterwards) while the frame
//! ring's synchronization objects are kept.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use prism_core::RendererConfig;
use prism_rhi::types::{
    AcquireOutcome, ClearColor, Extent2D, Format, ImageChainDesc, PresentMode, PresentOutcome,
    SurfaceFormat, choose_present_mode, choose_surface_format, determine_image_count,
};
use prism_rhi::{Backend, CommandBuffer, GraphicsDevice, ImageChainOps, RhiError, RhiResult};

use crate::frame::FrameRing;

/// Depth format used when the configuration asks for a depth buffer.
pub const DEPTH_FORMAT: Format = Format::Depth32Float;

/// Lifecycle state of a [`SwapchainManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    /// [`SwapchainManager::init`] has not run yet.
    Uninitialized,
    /// The image chain matches the surface.
    Ready,
    /// The image chain no longer matches the surface and must be rebuilt
    /// before the next acquisition.
    Invalid,
}

/// Construction parameters of a [`SwapchainManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainSettings {
    /// Extent to build for when the surface does not dictate one.
    pub requested_extent: Extent2D,
    pub frames_in_flight: usize,
    pub acquire_timeout: Duration,
    /// `None` waits on frame fences without bound.
    pub fence_timeout: Option<Duration>,
    pub depth_format: Option<Format>,
}

impl SwapchainSettings {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            requested_extent: Extent2D::new(config.width, config.height),
            frames_in_flight: config.frames_in_flight,
            acquire_timeout: config.acquire_timeout(),
            fence_timeout: config.fence_timeout(),
            depth_format: config.depth_buffer.then_some(DEPTH_FORMAT),
        }
    }
}

/// An image chain together with the parameters it was built with.
///
/// Never mutated; a rebuild produces a new snapshot.
pub struct ImageChainSnapshot<B: Backend> {
    chain: B::ImageChain,
    surface_format: SurfaceFormat,
    extent: Extent2D,
    present_mode: PresentMode,
    image_count: u32,
}

impl<B: Backend> ImageChainSnapshot<B> {
    fn new(chain: B::ImageChain) -> Self {
        Self {
            surface_format: chain.format(),
            extent: chain.extent(),
            present_mode: chain.present_mode(),
            image_count: chain.image_count(),
            chain,
        }
    }

    #[inline]
    pub fn chain(&self) -> &B::ImageChain {
        &self.chain
    }

    #[inline]
    pub fn surface_format(&self) -> SurfaceFormat {
        self.surface_format
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.image_count
    }
}

/// Owns the image chain and the frame ring.
pub struct SwapchainManager<B: Backend> {
    device: Arc<B::Device>,
    settings: SwapchainSettings,
    vsync: bool,
    state: SwapchainState,
    snapshot: Option<ImageChainSnapshot<B>>,
    frames: Option<FrameRing<B>>,
    /// Image index between a successful acquire and the matching present.
    acquired: Option<u32>,
    rebuild_count: u64,
}

impl<B: Backend> SwapchainManager<B> {
    /// Creates an uninitialized manager. Nothing is allocated until
    /// [`init`](Self::init).
    pub fn new(device: Arc<B::Device>, settings: SwapchainSettings) -> Self {
        Self {
            device,
            settings,
            vsync: true,
            state: SwapchainState::Uninitialized,
            snapshot: None,
            frames: None,
            acquired: None,
            rebuild_count: 0,
        }
    }

    /// Creates the frame ring and the first image chain.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedSurface`] if the surface offers no
    /// format or present mode, or the backend's error if creation fails.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn init(&mut self, vsync: bool) -> RhiResult<()> {
        assert_eq!(
            self.state,
            SwapchainState::Uninitialized,
            "swapchain manager initialized twice"
        );
        self.vsync = vsync;

        let frames = FrameRing::new(Arc::clone(&self.device), self.settings.frames_in_flight)?;
        let snapshot = self.build_snapshot(None)?.ok_or_else(|| {
            RhiError::SwapchainError("surface has a zero-sized extent".to_string())
        })?;

        info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            snapshot.extent.width,
            snapshot.extent.height,
            snapshot.image_count,
            snapshot.surface_format.format,
            snapshot.present_mode
        );

        self.frames = Some(frames);
        self.snapshot = Some(snapshot);
        self.state = SwapchainState::Ready;
        Ok(())
    }

    /// Builds a new image chain for the current surface. Returns `None` if
    /// the surface currently has no area (e.g. a minimized window).
    fn build_snapshot(
        &self,
        old: Option<&B::ImageChain>,
    ) -> RhiResult<Option<ImageChainSnapshot<B>>> {
        let support = self.device.surface_support()?;
        if !support.is_adequate() {
            return Err(RhiError::UnsupportedSurface(
                "surface offers no format or present mode".to_string(),
            ));
        }

        let capabilities = support.capabilities;
        let extent = capabilities.choose_extent(self.settings.requested_extent);
        if extent.is_empty() {
            return Ok(None);
        }

        let desc = ImageChainDesc {
            extent,
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes, self.vsync),
            image_count: determine_image_count(&capabilities, self.settings.frames_in_flight),
            depth_format: self.settings.depth_format,
        };

        let chain = self.device.create_image_chain(&desc, old)?;
        Ok(Some(ImageChainSnapshot::new(chain)))
    }

    /// Waits for the current frame slot and requests the next image.
    ///
    /// Returns [`AcquireOutcome::OutOfDate`] without touching the device if
    /// the manager is already [`SwapchainState::Invalid`]. An out-of-date
    /// result marks the manager invalid; the caller rebuilds and retries.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] if the frame fence or the image does not
    /// become available in time, or the backend's error.
    ///
    /// # Panics
    ///
    /// Panics before [`init`](Self::init) or while an image is still acquired.
    pub fn acquire_next_image(&mut self) -> RhiResult<AcquireOutcome> {
        assert!(
            self.acquired.is_none(),
            "acquire_next_image while image {:?} is still acquired",
            self.acquired
        );
        match self.state {
            SwapchainState::Uninitialized => panic!("acquire_next_image before init"),
            SwapchainState::Invalid => return Ok(AcquireOutcome::OutOfDate),
            SwapchainState::Ready => {}
        }

        let Self {
            device,
            settings,
            snapshot,
            frames,
            ..
        } = self;
        let (Some(snapshot), Some(frames)) = (snapshot.as_ref(), frames.as_ref()) else {
            unreachable!("ready swapchain manager without image chain");
        };

        frames.wait_for_current(settings.fence_timeout)?;

        let outcome = device.acquire_next_image(
            &snapshot.chain,
            frames.current().image_acquired(),
            settings.acquire_timeout,
        )?;

        match outcome {
            AcquireOutcome::Ready(index) | AcquireOutcome::SubOptimal(index) => {
                trace!("Acquired image {} ({:?})", index, outcome);
                self.acquired = Some(index);
            }
            AcquireOutcome::OutOfDate => {
                debug!("Image chain out of date on acquire");
                self.state = SwapchainState::Invalid;
            }
        }
        Ok(outcome)
    }

    /// Starts recording the current frame into the acquired image.
    ///
    /// Resets the slot's command pool, begins recording, clears the target
    /// and sets viewport and scissor to the chain extent.
    ///
    /// # Panics
    ///
    /// Panics unless an image is acquired.
    pub fn begin_commands(&mut self, clear: ClearColor) -> RhiResult<()> {
        let index = self
            .acquired
            .unwrap_or_else(|| panic!("begin_commands without an acquired image"));
        let (Some(snapshot), Some(frames)) = (self.snapshot.as_ref(), self.frames.as_mut()) else {
            unreachable!("acquired image without image chain");
        };

        frames.prepare_current()?;
        let cmd = frames.current_mut().command_buffer_mut();
        cmd.begin_recording()?;
        cmd.begin_render_target(&snapshot.chain, index, clear);
        cmd.set_viewport(snapshot.extent);
        cmd.set_scissor(snapshot.extent);
        Ok(())
    }

    /// Ends the frame: transitions the image for display, submits the
    /// recording and queues the image for presentation.
    ///
    /// The frame ring advances once the work has been submitted, whatever
    /// the presentation result. An out-of-date or suboptimal presentation
    /// marks the manager invalid.
    ///
    /// # Panics
    ///
    /// Panics unless an image is acquired and the current command buffer is
    /// recording.
    pub fn present(&mut self) -> RhiResult<PresentOutcome> {
        let index = self
            .acquired
            .unwrap_or_else(|| panic!("present without an acquired image"));

        let Self {
            device,
            snapshot,
            frames,
            ..
        } = self;
        let (Some(snapshot), Some(frames)) = (snapshot.as_ref(), frames.as_mut()) else {
            unreachable!("acquired image without image chain");
        };

        let cmd = frames.current_mut().command_buffer_mut();
        cmd.transition_to_present(&snapshot.chain, index);
        cmd.end_recording()?;

        frames.reset_current_fence()?;
        let slot = frames.current();
        let submitted = device.submit(
            slot.command_buffer().raw(),
            Some(slot.image_acquired()),
            Some(slot.render_finished()),
            slot.in_flight_fence(),
        );
        if let Err(e) = submitted {
            // The reset fence has no work behind it; leave the slot waitable.
            if let Err(restore) = frames.restore_current_fence() {
                warn!("Failed to restore fence after submit error: {}", restore);
            }
            return Err(e);
        }
        frames.current_mut().command_buffer_mut().mark_submitted();

        let outcome = device.present(&snapshot.chain, index, frames.current().render_finished());
        frames.advance();
        self.acquired = None;

        let outcome = outcome?;
        if outcome != PresentOutcome::Presented {
            debug!("Image chain stale on present ({:?})", outcome);
            self.state = SwapchainState::Invalid;
        }
        Ok(outcome)
    }

    /// Handles a new framebuffer size.
    ///
    /// A zero dimension (minimized window) is ignored. Otherwise the size is
    /// clamped to the surface limits and the chain is rebuilt unless it
    /// already has that extent. Returns whether a rebuild happened.
    pub fn on_resize(&mut self, width: u32, height: u32) -> RhiResult<bool> {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return Ok(false);
        }

        let requested = Extent2D::new(width, height);
        self.settings.requested_extent = requested;
        if self.state == SwapchainState::Uninitialized {
            return Ok(false);
        }

        let capabilities = self.device.surface_support()?.capabilities;
        let target = capabilities.choose_extent(requested);
        if self.state == SwapchainState::Ready && Some(target) == self.extent() {
            trace!("Resize to {}x{} matches the current extent", width, height);
            return Ok(false);
        }
        if target != requested {
            debug!(
                "Resize to {}x{} clamped to {}x{}",
                width, height, target.width, target.height
            );
        }

        if self.acquired.is_some() {
            self.abandon_frame()?;
        }
        self.rebuild()
    }

    /// Rebuilds the image chain for the current surface.
    ///
    /// Waits for the device to go idle first. Returns `false` and stays
    /// invalid if the surface currently has a zero-sized extent.
    ///
    /// # Panics
    ///
    /// Panics before [`init`](Self::init) or while an image is acquired.
    pub fn rebuild(&mut self) -> RhiResult<bool> {
        assert_ne!(
            self.state,
            SwapchainState::Uninitialized,
            "rebuild before init"
        );
        assert!(
            self.acquired.is_none(),
            "rebuild while image {:?} is acquired",
            self.acquired
        );

        self.device.wait_idle()?;

        let old = self.snapshot.take();
        let built = self.build_snapshot(old.as_ref().map(ImageChainSnapshot::chain));
        let snapshot = match built {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("Surface has no area; postponing rebuild");
                self.snapshot = old;
                self.state = SwapchainState::Invalid;
                return Ok(false);
            }
            Err(e) => {
                self.snapshot = old;
                self.state = SwapchainState::Invalid;
                return Err(e);
            }
        };
        drop(old);

        if let Some(frames) = self.frames.as_mut() {
            frames.invalidate_recordings();
        }
        self.rebuild_count += 1;
        self.state = SwapchainState::Ready;

        info!(
            "Swapchain rebuilt: {}x{}, {} images",
            snapshot.extent.width, snapshot.extent.height, snapshot.image_count
        );
        self.snapshot = Some(snapshot);
        Ok(true)
    }

    /// Marks the image chain stale so the next acquisition rebuilds it.
    pub fn invalidate(&mut self) {
        if self.state == SwapchainState::Ready {
            self.state = SwapchainState::Invalid;
        }
    }

    /// Drops the frame in progress without submitting it.
    ///
    /// Ends any recording, releases the acquired image index and replaces
    /// the slot's image-acquired semaphore, whose signal nobody will wait on.
    pub fn abandon_frame(&mut self) -> RhiResult<()> {
        let Some(frames) = self.frames.as_mut() else {
            return Ok(());
        };

        let cmd = frames.current_mut().command_buffer_mut();
        if cmd.is_recording() {
            cmd.abandon()?;
        }

        if let Some(index) = self.acquired.take() {
            warn!("Abandoning frame with acquired image {}", index);
            self.device.wait_idle()?;
            frames.replace_image_acquired()?;
        }
        Ok(())
    }

    /// Blocks until all submitted frames have completed.
    pub fn wait_idle(&self) -> RhiResult<()> {
        match self.frames.as_ref() {
            Some(frames) => frames.wait_all(),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    #[inline]
    pub fn device(&self) -> &Arc<B::Device> {
        &self.device
    }

    /// The current image chain, if one was built.
    #[inline]
    pub fn snapshot(&self) -> Option<&ImageChainSnapshot<B>> {
        self.snapshot.as_ref()
    }

    #[inline]
    pub fn extent(&self) -> Option<Extent2D> {
        self.snapshot.as_ref().map(ImageChainSnapshot::extent)
    }

    #[inline]
    pub fn surface_format(&self) -> Option<SurfaceFormat> {
        self.snapshot.as_ref().map(ImageChainSnapshot::surface_format)
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.snapshot.as_ref().map_or(0, ImageChainSnapshot::image_count)
    }

    /// Depth attachment format built with every image chain, if any.
    #[inline]
    pub fn depth_format(&self) -> Option<Format> {
        self.settings.depth_format
    }

    #[inline]
    pub fn acquired_image(&self) -> Option<u32> {
        self.acquired
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.settings.frames_in_flight
    }

    /// Frame slot used by the frame being prepared. Per-frame data indexed
    /// by it is safe to overwrite once [`acquire_next_image`](Self::acquire_next_image)
    /// has returned.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.frames.as_ref().map_or(0, FrameRing::current_index)
    }

    /// Number of frames submitted so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frames.as_ref().map_or(0, FrameRing::frame_number)
    }

    /// Number of rebuilds since init.
    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Command buffer of the frame being recorded.
    ///
    /// # Panics
    ///
    /// Panics before [`init`](Self::init).
    pub fn current_command_buffer_mut(&mut self) -> &mut CommandBuffer<B> {
        self.frames
            .as_mut()
            .map(|frames| frames.current_mut().command_buffer_mut())
            .unwrap_or_else(|| panic!("command buffer requested before init"))
    }

    /// Command buffer of the current frame slot, if initialized.
    pub fn current_command_buffer(&self) -> Option<&CommandBuffer<B>> {
        self.frames
            .as_ref()
            .map(|frames| frames.current().command_buffer())
    }
}

impl<B: Backend> Drop for SwapchainManager<B> {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            warn!("Failed to wait for device idle while dropping swapchain: {}", e);
        }
        debug!("Swapchain manager destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, Injected};

    fn settings() -> SwapchainSettings {
        SwapchainSettings {
            requested_extent: Extent2D::new(800, 600),
            frames_in_flight: 2,
            acquire_timeout: Duration::from_millis(100),
            fence_timeout: Some(Duration::from_secs(1)),
            depth_format: None,
        }
    }

    fn manager() -> (SwapchainManager<Headless>, Arc<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let mut manager = SwapchainManager::new(Arc::clone(&device), settings());
        manager.init(true).unwrap();
        (manager, device)
    }

    fn run_frame(manager: &mut SwapchainManager<Headless>) -> PresentOutcome {
        let outcome = manager.acquire_next_image().unwrap();
        assert!(outcome.image_index().is_some(), "{:?}", outcome);
        manager.begin_commands(ClearColor::default()).unwrap();
        manager.present().unwrap()
    }

    #[test]
    fn test_settings_from_config() {
        let config = RendererConfig {
            width: 640,
            height: 480,
            frames_in_flight: 3,
            depth_buffer: true,
            ..RendererConfig::default()
        };
        let settings = SwapchainSettings::from_config(&config);
        assert_eq!(settings.requested_extent, Extent2D::new(640, 480));
        assert_eq!(settings.frames_in_flight, 3);
        assert_eq!(settings.depth_format, Some(DEPTH_FORMAT));
    }

    #[test]
    fn test_init() {
        let (manager, _device) = manager();
        assert_eq!(manager.state(), SwapchainState::Ready);
        assert_eq!(manager.extent(), Some(Extent2D::new(800, 600)));
        assert_eq!(manager.image_count(), 3);
        assert_eq!(manager.rebuild_count(), 0);
        assert_eq!(manager.acquired_image(), None);
    }

    #[test]
    fn test_init_rejects_inadequate_surface() {
        let mut config = HeadlessConfig::default();
        config.support.present_modes.clear();
        let device = Arc::new(HeadlessDevice::new(config));
        let mut manager = SwapchainManager::<Headless>::new(device, settings());
        assert!(matches!(
            manager.init(true),
            Err(RhiError::UnsupportedSurface(_))
        ));
        assert_eq!(manager.state(), SwapchainState::Uninitialized);
    }

    #[test]
    fn test_frame_advances_ring() {
        let (mut manager, device) = manager();
        assert_eq!(run_frame(&mut manager), PresentOutcome::Presented);
        assert_eq!(run_frame(&mut manager), PresentOutcome::Presented);
        assert_eq!(manager.frame_number(), 2);
        assert_eq!(device.controller().presents().len(), 2);
        assert_eq!(manager.acquired_image(), None);
    }

    #[test]
    fn test_out_of_date_acquire_invalidates() {
        let (mut manager, device) = manager();
        device.controller().inject_acquire(Injected::OutOfDate);

        assert_eq!(
            manager.acquire_next_image().unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(manager.state(), SwapchainState::Invalid);
        assert_eq!(manager.acquired_image(), None);

        assert!(manager.rebuild().unwrap());
        assert_eq!(manager.state(), SwapchainState::Ready);
        assert_eq!(manager.rebuild_count(), 1);
        assert_eq!(run_frame(&mut manager), PresentOutcome::Presented);
    }

    #[test]
    fn test_suboptimal_present_invalidates() {
        let (mut manager, device) = manager();
        device.controller().inject_present(Injected::SubOptimal);

        assert_eq!(run_frame(&mut manager), PresentOutcome::SubOptimal);
        assert_eq!(manager.state(), SwapchainState::Invalid);
        assert_eq!(manager.frame_number(), 1);
    }

    #[test]
    fn test_resize_same_extent_is_noop() {
        let (mut manager, device) = manager();
        assert!(!manager.on_resize(800, 600).unwrap());
        assert_eq!(device.controller().chain_creations().len(), 1);

        assert!(manager.on_resize(1024, 768).unwrap());
        assert_eq!(manager.extent(), Some(Extent2D::new(1024, 768)));
        assert_eq!(device.controller().chain_creations().len(), 2);
    }

    #[test]
    fn test_resize_before_init_updates_request() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let mut manager = SwapchainManager::<Headless>::new(device, settings());
        assert!(!manager.on_resize(320, 240).unwrap());
        manager.init(false).unwrap();
        assert_eq!(manager.extent(), Some(Extent2D::new(320, 240)));
        assert_eq!(
            manager.snapshot().map(ImageChainSnapshot::present_mode),
            Some(PresentMode::Mailbox)
        );
    }

    #[test]
    fn test_abandon_frame_releases_image() {
        let (mut manager, _device) = manager();
        manager.acquire_next_image().unwrap();
        manager.begin_commands(ClearColor::default()).unwrap();

        manager.abandon_frame().unwrap();
        assert_eq!(manager.acquired_image(), None);
        assert!(
            !manager
                .current_command_buffer()
                .is_some_and(CommandBuffer::is_recording)
        );

        assert_eq!(run_frame(&mut manager), PresentOutcome::Presented);
    }

    #[test]
    fn test_failed_submit_leaves_slot_usable() {
        let (mut manager, device) = manager();
        manager.acquire_next_image().unwrap();
        manager.begin_commands(ClearColor::default()).unwrap();

        // Another submission consumes the acquire signal, so the frame's
        // own submission has nothing to wait on.
        let mut pool = device.create_command_pool().unwrap();
        let other = device.allocate_command_buffer(&mut pool).unwrap();
        let fence = device.create_fence(false).unwrap();
        let frames = manager.frames.as_ref().unwrap();
        device
            .submit(&other, Some(frames.current().image_acquired()), None, &fence)
            .unwrap();

        assert!(matches!(manager.present(), Err(RhiError::SyncError(_))));
        manager.abandon_frame().unwrap();
        assert_eq!(manager.state(), SwapchainState::Ready);
        assert_eq!(manager.frame_number(), 0);

        assert!(manager.acquire_next_image().unwrap().image_index().is_some());
        manager.begin_commands(ClearColor::default()).unwrap();
        assert_eq!(manager.present().unwrap(), PresentOutcome::Presented);
        assert_eq!(run_frame(&mut manager), PresentOutcome::Presented);
    }

    #[test]
    fn test_rebuild_postponed_for_zero_extent() {
        let (mut manager, device) = manager();
        let controller = device.controller();
        let mut support = device.surface_support().unwrap();
        support.capabilities.current_extent = Some(Extent2D::new(0, 0));
        support.capabilities.min_extent = Extent2D::new(0, 0);
        controller.set_surface_support(support);

        manager.invalidate();
        assert!(!manager.rebuild().unwrap());
        assert_eq!(manager.state(), SwapchainState::Invalid);
        assert_eq!(manager.extent(), Some(Extent2D::new(800, 600)));
    }
}
