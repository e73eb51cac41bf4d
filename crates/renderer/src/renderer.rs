//! Frame orchestration.
//!
//! This module provides the [`Renderer`], the uniform per-frame entry point
//! over any backend. A frame is driven as:
//!
//! ```text
//! begin() -> [set_pipeline, bind_descriptor_sets, bind buffers, draw]* -> present()
//! ```
//!
//! Out-of-date and suboptimal image chains are handled inside `begin` and
//! `present` by rebuilding; callers only ever see a skipped frame. Errors
//! that cannot be recovered from are logged as critical, the frame is
//! abandoned and the error is returned.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use prism_core::{RendererConfig, SubOptimalPolicy};
use prism_rhi::pipeline::RenderTargetLayout;
use prism_rhi::types::{AcquireOutcome, ClearColor, IndexType, PresentOutcome, PrimitiveType};
use prism_rhi::{Backend, CommandBuffer, DrawStatistics, GraphicsContext, RhiError, RhiResult};

use crate::binder::{BindSummary, DescriptorBinder};
use crate::swapchain::{SwapchainManager, SwapchainSettings, SwapchainState};

/// How many acquisitions [`Renderer::begin`] attempts before skipping.
const MAX_BEGIN_ATTEMPTS: usize = 2;

/// Result of [`Renderer::begin`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameBegin {
    /// Recording into the image at this index; finish with
    /// [`Renderer::present`].
    Recording { image_index: u32 },
    /// No frame this time (the image chain is being rebuilt or the surface
    /// has no area). Do not record or present.
    Skipped,
}

impl FrameBegin {
    #[inline]
    pub fn is_recording(self) -> bool {
        matches!(self, FrameBegin::Recording { .. })
    }
}

/// Renders frames through a [`SwapchainManager`].
///
/// # Thread Safety
///
/// A renderer records on one thread. Pipelines and descriptor sets are
/// owned by the caller and only referenced while binding.
pub struct Renderer<B: Backend> {
    swapchain: SwapchainManager<B>,
    binder: DescriptorBinder<B>,
    statistics: Arc<DrawStatistics>,
    clear_color: ClearColor,
    suboptimal_policy: SubOptimalPolicy,
    /// Set when a suboptimal image was accepted for the current frame.
    rebuild_after_present: bool,
}

impl<B: Backend> Renderer<B> {
    /// Creates a renderer and its image chain.
    ///
    /// # Arguments
    ///
    /// * `device` - The device to render with
    /// * `statistics` - Counters updated on every draw and frame
    /// * `config` - Extent, ring size, timeouts and policies
    ///
    /// # Errors
    ///
    /// Returns an error if the frame ring or the image chain cannot be
    /// created.
    pub fn new(
        device: Arc<B::Device>,
        statistics: Arc<DrawStatistics>,
        config: &RendererConfig,
    ) -> RhiResult<Self> {
        info!(
            "Initializing {} renderer ({}x{}, {} frames in flight)",
            B::API,
            config.width,
            config.height,
            config.frames_in_flight
        );

        let mut swapchain = SwapchainManager::new(device, SwapchainSettings::from_config(config));
        swapchain.init(config.vsync)?;

        Ok(Self {
            swapchain,
            binder: DescriptorBinder::new(),
            statistics,
            clear_color: ClearColor::default(),
            suboptimal_policy: config.suboptimal_policy,
            rebuild_after_present: false,
        })
    }

    /// Creates a renderer on the context's device and statistics.
    pub fn from_context(context: &GraphicsContext<B>, config: &RendererConfig) -> RhiResult<Self> {
        Self::new(
            Arc::clone(context.device()),
            Arc::clone(context.statistics()),
            config,
        )
    }

    /// Starts a frame.
    ///
    /// Waits until the frame slot is free, acquires an image and starts
    /// recording with the target cleared and viewport and scissor covering
    /// the image. A stale image chain is rebuilt and the acquisition retried
    /// once; if it is still stale the frame is skipped.
    ///
    /// # Errors
    ///
    /// Returns the error after logging it as critical if a wait times out,
    /// the device is lost, or the backend fails.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already being recorded.
    pub fn begin(&mut self) -> RhiResult<FrameBegin> {
        assert!(!self.is_recording(), "begin called while a frame is recording");

        for attempt in 1..=MAX_BEGIN_ATTEMPTS {
            if self.swapchain.state() == SwapchainState::Invalid {
                match self.swapchain.rebuild() {
                    Ok(true) => {}
                    Ok(false) => return Ok(FrameBegin::Skipped),
                    Err(e) => return Err(self.critical("rebuild", e)),
                }
            }

            let outcome = match self.swapchain.acquire_next_image() {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.critical("acquire", e)),
            };

            let image_index = match outcome {
                AcquireOutcome::Ready(index) => index,
                AcquireOutcome::SubOptimal(index) => match self.suboptimal_policy {
                    SubOptimalPolicy::RebuildAfterPresent => {
                        debug!("Suboptimal image {} accepted; rebuilding after present", index);
                        self.rebuild_after_present = true;
                        index
                    }
                    SubOptimalPolicy::RebuildImmediately => {
                        debug!("Suboptimal image {} dropped; rebuilding now", index);
                        if let Err(e) = self.swapchain.abandon_frame() {
                            return Err(self.critical("abandon", e));
                        }
                        self.swapchain.invalidate();
                        continue;
                    }
                },
                AcquireOutcome::OutOfDate => {
                    debug!("Image chain out of date (attempt {})", attempt);
                    continue;
                }
            };

            if let Err(e) = self.swapchain.begin_commands(self.clear_color) {
                return Err(self.critical("begin recording", e));
            }
            return Ok(FrameBegin::Recording { image_index });
        }

        debug!(
            "Image chain still stale after {} attempts; skipping frame",
            MAX_BEGIN_ATTEMPTS
        );
        Ok(FrameBegin::Skipped)
    }

    /// Binds a pipeline for the following draws.
    pub fn set_pipeline(&mut self, pipeline: &B::Pipeline) {
        self.swapchain.current_command_buffer_mut().bind_pipeline(pipeline);
    }

    /// Binds `sets` at slots `0..sets.len()` with one backend call.
    ///
    /// Every dynamic set consumes `dynamic_offset`. `sets` must follow the
    /// pipeline layout's set order.
    pub fn bind_descriptor_sets(
        &mut self,
        pipeline: &B::Pipeline,
        dynamic_offset: u32,
        sets: &[&B::DescriptorSet],
    ) -> BindSummary {
        let cmd = self.swapchain.current_command_buffer_mut();
        self.binder.bind(cmd, pipeline, dynamic_offset, sets)
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &B::Buffer, offset: u64) {
        self.swapchain
            .current_command_buffer_mut()
            .bind_vertex_buffer(buffer, offset);
    }

    pub fn bind_index_buffer(&mut self, buffer: &B::Buffer, offset: u64, index_type: IndexType) {
        self.swapchain
            .current_command_buffer_mut()
            .bind_index_buffer(buffer, offset, index_type);
    }

    /// Records a non-indexed draw and counts it.
    pub fn draw(&mut self, primitive: PrimitiveType, vertex_count: u32, first_vertex: u32) {
        self.swapchain
            .current_command_buffer_mut()
            .draw(primitive, vertex_count, first_vertex);
        self.statistics.record_draw();
    }

    /// Records an indexed draw from the bound index buffer and counts it.
    pub fn draw_indexed(&mut self, primitive: PrimitiveType, index_count: u32, start_index: u32) {
        self.swapchain
            .current_command_buffer_mut()
            .draw_indexed(primitive, index_count, start_index, 0);
        self.statistics.record_draw();
    }

    /// Ends the frame, submits it and presents the image.
    ///
    /// A stale image chain reported by presentation, or a suboptimal image
    /// accepted in [`begin`](Self::begin), is rebuilt before returning.
    ///
    /// # Errors
    ///
    /// Returns the error after logging it as critical if submission,
    /// presentation or the rebuild fails.
    ///
    /// # Panics
    ///
    /// Panics unless a frame is being recorded.
    pub fn present(&mut self) -> RhiResult<()> {
        assert!(self.is_recording(), "present called without a recording frame");

        let outcome = match self.swapchain.present() {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.critical("present", e)),
        };
        self.statistics.record_frame();

        if outcome != PresentOutcome::Presented {
            debug!("Present reported {:?}", outcome);
        }
        if std::mem::take(&mut self.rebuild_after_present) {
            self.swapchain.invalidate();
        }
        if self.swapchain.state() == SwapchainState::Invalid {
            if let Err(e) = self.swapchain.rebuild() {
                return Err(self.critical("rebuild", e));
            }
        }
        Ok(())
    }

    /// Handles a framebuffer resize from the windowing layer.
    ///
    /// Zero-sized extents are ignored. A frame being recorded is abandoned.
    pub fn on_resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        if self.swapchain.on_resize(width, height)? {
            debug!("Renderer resized to {}x{}", width, height);
        }
        Ok(())
    }

    pub fn set_clear_color(&mut self, color: impl Into<ClearColor>) {
        self.clear_color = color.into();
    }

    #[inline]
    pub fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    /// True between a recording [`begin`](Self::begin) and [`present`](Self::present).
    pub fn is_recording(&self) -> bool {
        self.swapchain
            .current_command_buffer()
            .is_some_and(CommandBuffer::is_recording)
    }

    #[inline]
    pub fn swapchain(&self) -> &SwapchainManager<B> {
        &self.swapchain
    }

    #[inline]
    pub fn statistics(&self) -> &Arc<DrawStatistics> {
        &self.statistics
    }

    /// Attachment layout pipelines must be built for to render into the
    /// current image chain.
    pub fn render_target_layout(&self) -> Option<RenderTargetLayout> {
        let snapshot = self.swapchain.snapshot()?;
        Some(
            RenderTargetLayout::color(snapshot.surface_format().format)
                .with_depth(self.swapchain.depth_format()),
        )
    }

    /// Logs a frame-ending error as critical and abandons the frame.
    fn critical(&mut self, stage: &'static str, err: RhiError) -> RhiError {
        error!(
            severity = "critical",
            stage,
            fatal = err.is_fatal(),
            "Frame abandoned: {}",
            err
        );
        if let Err(e) = self.swapchain.abandon_frame() {
            warn!("Failed to abandon frame after {} error: {}", stage, e);
        }
        err
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if self.is_recording() {
            warn!("Renderer dropped while recording; abandoning frame");
            if let Err(e) = self.swapchain.abandon_frame() {
                error!("Failed to abandon frame during renderer drop: {}", e);
            }
        }
        info!(
            "Renderer destroyed after {} frames",
            self.statistics.frames()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, Injected};

    fn renderer(config: &RendererConfig) -> (Renderer<Headless>, Arc<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let renderer = Renderer::new(
            Arc::clone(&device),
            Arc::new(DrawStatistics::new()),
            config,
        )
        .unwrap();
        (renderer, device)
    }

    fn config() -> RendererConfig {
        RendererConfig {
            width: 640,
            height: 480,
            ..RendererConfig::default()
        }
    }

    #[test]
    fn test_begin_present() {
        let (mut renderer, device) = renderer(&config());
        let begin = renderer.begin().unwrap();
        assert!(begin.is_recording());
        assert!(renderer.is_recording());

        renderer.draw(PrimitiveType::Triangles, 3, 0);
        renderer.present().unwrap();
        assert!(!renderer.is_recording());
        assert_eq!(renderer.statistics().draw_calls(), 1);
        assert_eq!(renderer.statistics().frames(), 1);
        assert_eq!(device.controller().presents().len(), 1);
    }

    #[test]
    fn test_clear_color_recorded() {
        let (mut renderer, device) = renderer(&config());
        renderer.set_clear_color(glam::Vec4::new(1.0, 0.0, 0.0, 1.0));
        renderer.begin().unwrap();
        renderer.present().unwrap();

        let commands = device.controller().submitted_commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            prism_rhi::headless::RecordedCommand::BeginRenderTarget { clear, .. }
                if *clear == ClearColor([1.0, 0.0, 0.0, 1.0])
        )));
    }

    #[test]
    fn test_suboptimal_rebuild_immediately() {
        let config = RendererConfig {
            suboptimal_policy: SubOptimalPolicy::RebuildImmediately,
            ..config()
        };
        let (mut renderer, device) = renderer(&config);
        device.controller().inject_acquire(Injected::SubOptimal);

        assert!(renderer.begin().unwrap().is_recording());
        assert_eq!(renderer.swapchain().rebuild_count(), 1);
        renderer.present().unwrap();
        assert_eq!(renderer.swapchain().rebuild_count(), 1);
    }

    #[test]
    fn test_suboptimal_rebuild_after_present() {
        let (mut renderer, device) = renderer(&config());
        device.controller().inject_acquire(Injected::SubOptimal);

        assert!(renderer.begin().unwrap().is_recording());
        assert_eq!(renderer.swapchain().rebuild_count(), 0);
        renderer.present().unwrap();
        assert_eq!(renderer.swapchain().rebuild_count(), 1);
        assert_eq!(device.controller().presents().len(), 1);
    }

    #[test]
    fn test_render_target_layout() {
        let config = RendererConfig {
            depth_buffer: true,
            ..config()
        };
        let (renderer, _device) = renderer(&config);
        let layout = renderer.render_target_layout().unwrap();
        assert_eq!(
            layout.color_formats,
            vec![prism_rhi::types::Format::Bgra8Srgb]
        );
        assert_eq!(layout.depth_format, Some(crate::swapchain::DEPTH_FORMAT));
    }

    #[test]
    #[should_panic(expected = "without a recording frame")]
    fn test_present_without_begin_panics() {
        let (mut renderer, _device) = renderer(&config());
        let _ = renderer.present();
    }
}
