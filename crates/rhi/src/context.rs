//! Graphics context and process-wide state.
//!
//! A [`GraphicsContext`] is the factory that fixes the render API for the
//! process. Creating one claims the active-backend slot; contexts for the
//! same API may coexist, but claiming a different API while any context is
//! alive fails with [`RhiError::BackendMismatch`]. Dropping the last context
//! releases the slot.
//!
//! The context also owns the [`DrawStatistics`] shared with every renderer
//! built from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use prism_core::RenderApi;
use tracing::{debug, info};

use crate::backend::{Backend, GraphicsDevice};
use crate::buffer::BufferDesc;
use crate::descriptor::DescriptorWrite;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::PipelineDesc;
use crate::texture::TextureDesc;

static ACTIVE_API: Mutex<Option<(RenderApi, usize)>> = Mutex::new(None);

/// Returns the API of the live context(s), if any.
pub fn active_render_api() -> Option<RenderApi> {
    ACTIVE_API
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .map(|(api, _)| api)
}

/// A reference on the process-wide active-backend slot.
struct ApiClaim {
    api: RenderApi,
}

impl ApiClaim {
    fn acquire(requested: RenderApi) -> RhiResult<Self> {
        let mut slot = ACTIVE_API.lock().unwrap_or_else(PoisonError::into_inner);
        match *slot {
            Some((active, count)) if active == requested => {
                *slot = Some((active, count + 1));
            }
            Some((active, _)) => {
                return Err(RhiError::BackendMismatch { active, requested });
            }
            None => {
                info!("Render API selected: {}", requested);
                *slot = Some((requested, 1));
            }
        }
        Ok(Self { api: requested })
    }
}

impl Drop for ApiClaim {
    fn drop(&mut self) {
        let mut slot = ACTIVE_API.lock().unwrap_or_else(PoisonError::into_inner);
        match *slot {
            Some((api, count)) if api == self.api && count > 1 => {
                *slot = Some((api, count - 1));
            }
            Some((api, _)) if api == self.api => {
                info!("Render API released: {}", api);
                *slot = None;
            }
            _ => {}
        }
    }
}

/// Process-wide draw and frame counters.
///
/// Incremented once per draw submission and once per presented frame. The
/// draw counter is reset externally at frame boundaries by whoever reports
/// it.
#[derive(Debug, Default)]
pub struct DrawStatistics {
    draw_calls: AtomicU64,
    frames: AtomicU64,
}

/// Point-in-time copy of [`DrawStatistics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub draw_calls: u64,
    pub frames: u64,
}

impl DrawStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_draw(&self) {
        self.draw_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn draw_calls(&self) -> u64 {
        self.draw_calls.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Resets the draw counter, returning its previous value.
    pub fn reset_draw_calls(&self) -> u64 {
        self.draw_calls.swap(0, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            draw_calls: self.draw_calls(),
            frames: self.frames(),
        }
    }
}

/// The device of the selected backend plus its shared statistics.
pub struct GraphicsContext<B: Backend> {
    device: Arc<B::Device>,
    statistics: Arc<DrawStatistics>,
    // Released after the device.
    _claim: ApiClaim,
}

impl<B: Backend> GraphicsContext<B> {
    /// Claims the active-backend slot for `B`, then builds the device.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::BackendMismatch`] if a context for another API is
    /// alive, or whatever `build` fails with. The slot is released again if
    /// the device cannot be built.
    pub fn create<F>(build: F) -> RhiResult<Self>
    where
        F: FnOnce() -> RhiResult<B::Device>,
    {
        let claim = ApiClaim::acquire(B::API)?;
        let device = build()?;
        debug!("Graphics context created for {}", B::API);

        Ok(Self {
            device: Arc::new(device),
            statistics: Arc::new(DrawStatistics::new()),
            _claim: claim,
        })
    }

    /// The API this context drives.
    #[inline]
    pub fn api(&self) -> RenderApi {
        B::API
    }

    #[inline]
    pub fn device(&self) -> &Arc<B::Device> {
        &self.device
    }

    #[inline]
    pub fn statistics(&self) -> &Arc<DrawStatistics> {
        &self.statistics
    }

    pub fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<B::Buffer> {
        self.device.create_buffer(desc)
    }

    pub fn create_texture(&self, desc: &TextureDesc, data: Option<&[u8]>) -> RhiResult<B::Texture> {
        self.device.create_texture(desc, data)
    }

    pub fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<B::Pipeline> {
        self.device.create_pipeline(desc)
    }

    pub fn create_descriptor_set(
        &self,
        pipeline: &B::Pipeline,
        set_index: u32,
        writes: &[DescriptorWrite<'_, B>],
    ) -> RhiResult<B::DescriptorSet> {
        self.device.create_descriptor_set(pipeline, set_index, writes)
    }
}

impl<B: Backend> Drop for GraphicsContext<B> {
    fn drop(&mut self) {
        debug!("Graphics context for {} dropped", B::API);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{Headless, HeadlessConfig};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_statistics_are_send_sync() {
        assert_send_sync::<DrawStatistics>();
    }

    #[test]
    fn test_statistics_counters() {
        let stats = DrawStatistics::new();
        stats.record_draw();
        stats.record_draw();
        stats.record_frame();
        assert_eq!(
            stats.snapshot(),
            StatisticsSnapshot {
                draw_calls: 2,
                frames: 1
            }
        );
        assert_eq!(stats.reset_draw_calls(), 2);
        assert_eq!(stats.draw_calls(), 0);
        assert_eq!(stats.frames(), 1);
    }

    #[test]
    fn test_mismatched_api_is_rejected() {
        let _context = GraphicsContext::<Headless>::new(HeadlessConfig::default()).unwrap();
        assert_eq!(active_render_api(), Some(RenderApi::Headless));

        // Same API may be claimed again.
        let second = GraphicsContext::<Headless>::new(HeadlessConfig::default());
        assert!(second.is_ok());

        match ApiClaim::acquire(RenderApi::OpenGl) {
            Err(RhiError::BackendMismatch { active, requested }) => {
                assert_eq!(active, RenderApi::Headless);
                assert_eq!(requested, RenderApi::OpenGl);
            }
            other => panic!("expected a backend mismatch, got {:?}", other.map(|c| c.api)),
        }
    }

    #[test]
    fn test_failed_build_releases_claim() {
        let _context = GraphicsContext::<Headless>::new(HeadlessConfig::default()).unwrap();
        let result = GraphicsContext::<Headless>::create(|| Err(RhiError::NoSuitableGpu));
        assert!(matches!(result, Err(RhiError::NoSuitableGpu)));
        assert_eq!(active_render_api(), Some(RenderApi::Headless));
    }
}
