//! Per-frame resources and the frames-in-flight ring.
//!
//! This module provides the [`FrameRing`], the fixed-size ring of
//! [`FrameSlot`]s that lets the CPU record frame N+1 while the GPU is still
//! executing frame N. Each slot owns:
//!
//! - A command pool and one primary command buffer
//! - A semaphore signaled when the acquired image can be written
//! - A semaphore signaled when rendering into that image has finished
//! - A fence signaled when the slot's last submission completed
//!
//! # Overview
//!
//! The ring holds N slots (2 or 3). Frame `k` uses slot `k mod N`. Before a
//! slot is reused its fence is waited on, which bounds the number of frames
//! the GPU can lag behind to N and blocks the CPU once it is N frames ahead.
//!
//! Slots are never shared between frames that may be in flight at the same
//! time, so no locking is needed as long as recording happens on one thread.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use prism_core::RendererConfig;
use prism_rhi::{Backend, CommandBuffer, GraphicsDevice, RhiError, RhiResult, types::FenceStatus};

/// Resources of one frame slot.
///
/// # Synchronization Flow
///
/// ```text
/// 1. Wait on in_flight (CPU waits for the previous use of this slot)
/// 2. Reset the command pool and start recording
/// 3. Acquire an image (signals image_acquired)
/// 4. Reset in_flight, then submit the command buffer:
///    - Wait on image_acquired
///    - Signal render_finished
///    - Signal in_flight
/// 5. Present (waits on render_finished)
/// ```
pub struct FrameSlot<B: Backend> {
    /// Pool the slot's command buffer is allocated from; reset once per frame.
    command_pool: B::CommandPool,
    command_buffer: CommandBuffer<B>,
    /// Signaled by the presentation engine when the acquired image is ready.
    image_acquired: B::Semaphore,
    /// Signaled by the GPU when rendering into the image has finished.
    render_finished: B::Semaphore,
    /// Signaled by the GPU when this slot's submission has completed.
    in_flight: B::Fence,
}

impl<B: Backend> FrameSlot<B> {
    /// Creates the resources of one slot.
    ///
    /// The fence starts signaled so the first wait on a fresh slot returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource creation fails.
    fn new(device: &B::Device) -> RhiResult<Self> {
        let mut command_pool = device.create_command_pool()?;
        let command_buffer = CommandBuffer::new(device.allocate_command_buffer(&mut command_pool)?);
        let image_acquired = device.create_semaphore()?;
        let render_finished = device.create_semaphore()?;
        let in_flight = device.create_fence(true)?;

        Ok(Self {
            command_pool,
            command_buffer,
            image_acquired,
            render_finished,
            in_flight,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer<B> {
        &self.command_buffer
    }

    #[inline]
    pub fn command_buffer_mut(&mut self) -> &mut CommandBuffer<B> {
        &mut self.command_buffer
    }

    #[inline]
    pub fn image_acquired(&self) -> &B::Semaphore {
        &self.image_acquired
    }

    #[inline]
    pub fn render_finished(&self) -> &B::Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &B::Fence {
        &self.in_flight
    }
}

/// Ring of frame slots cycled once per frame.
///
/// # Thread Safety
///
/// The ring is not thread-safe. It is owned by the swapchain manager and
/// driven from the thread that records frames.
pub struct FrameRing<B: Backend> {
    device: Arc<B::Device>,
    slots: Vec<FrameSlot<B>>,
    /// Index of the slot used by the frame being prepared.
    current: usize,
    /// Number of frames submitted through the ring so far.
    frame_number: u64,
}

impl<B: Backend> FrameRing<B> {
    /// Creates a ring of `frames_in_flight` slots.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ConfigError`] if `frames_in_flight` is not 2 or 3,
    /// or an error if any resource creation fails.
    pub fn new(device: Arc<B::Device>, frames_in_flight: usize) -> RhiResult<Self> {
        let allowed =
            RendererConfig::MIN_FRAMES_IN_FLIGHT..=RendererConfig::MAX_FRAMES_IN_FLIGHT;
        if !allowed.contains(&frames_in_flight) {
            return Err(RhiError::ConfigError(format!(
                "frames in flight must be between {} and {}, got {}",
                allowed.start(),
                allowed.end(),
                frames_in_flight
            )));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            slots.push(FrameSlot::new(&*device)?);
            debug!("Created frame slot {}", i);
        }

        info!("Frame ring created with {} frames in flight", frames_in_flight);

        Ok(Self {
            device,
            slots,
            current: 0,
            frame_number: 0,
        })
    }

    /// Number of slots in the ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least two slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    pub fn current(&self) -> &FrameSlot<B> {
        &self.slots[self.current]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut FrameSlot<B> {
        &mut self.slots[self.current]
    }

    /// Blocks until the previous submission from the current slot is done.
    ///
    /// `None` waits without bound.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] if the bound expires, or the device's
    /// error (e.g. [`RhiError::DeviceLost`]) if the wait fails.
    pub fn wait_for_current(&self, timeout: Option<Duration>) -> RhiResult<()> {
        match self
            .device
            .wait_for_fence(&self.slots[self.current].in_flight, timeout)?
        {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::TimedOut => Err(RhiError::Timeout("frame fence")),
        }
    }

    /// Resets the current slot's command pool for a new recording.
    ///
    /// Only valid once [`wait_for_current`](Self::wait_for_current) returned.
    pub fn prepare_current(&mut self) -> RhiResult<()> {
        let slot = &mut self.slots[self.current];
        self.device.reset_command_pool(&mut slot.command_pool)?;
        slot.command_buffer.on_pool_reset();
        Ok(())
    }

    /// Unsignals the current slot's fence.
    ///
    /// Called immediately before submission, once nothing can abandon the
    /// frame any more.
    pub fn reset_current_fence(&self) -> RhiResult<()> {
        self.device.reset_fence(&self.slots[self.current].in_flight)
    }

    /// Swaps a fresh, signaled fence into the current slot.
    ///
    /// Used when a submission fails after the fence was reset, so the next
    /// wait on this slot returns instead of waiting for work that never ran.
    pub fn restore_current_fence(&mut self) -> RhiResult<()> {
        let fence = self.device.create_fence(true)?;
        self.slots[self.current].in_flight = fence;
        debug!("Restored in-flight fence of slot {}", self.current);
        Ok(())
    }

    /// Replaces the current slot's image-acquired semaphore.
    ///
    /// Needed when an acquired image is abandoned: the pending signal on the
    /// old semaphore will never be waited on.
    pub fn replace_image_acquired(&mut self) -> RhiResult<()> {
        let semaphore = self.device.create_semaphore()?;
        self.slots[self.current].image_acquired = semaphore;
        trace!("Replaced image-acquired semaphore of slot {}", self.current);
        Ok(())
    }

    /// Moves to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.frame_number += 1;
    }

    /// Blocks until every slot's submission has completed.
    pub fn wait_all(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    /// Invalidates pending recordings after the image chain they target was
    /// replaced.
    pub fn invalidate_recordings(&mut self) {
        for slot in &mut self.slots {
            slot.command_buffer.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::CommandBufferState;
    use prism_rhi::headless::{Completion, Headless, HeadlessConfig, HeadlessDevice};

    fn device(completion: Completion) -> Arc<HeadlessDevice> {
        Arc::new(HeadlessDevice::new(
            HeadlessConfig::default().with_completion(completion),
        ))
    }

    #[test]
    fn test_ring_size_is_validated() {
        for n in [0, 1, 4] {
            let result = FrameRing::<Headless>::new(device(Completion::Automatic), n);
            assert!(matches!(result, Err(RhiError::ConfigError(_))), "n = {}", n);
        }
        for n in [2, 3] {
            let ring = FrameRing::<Headless>::new(device(Completion::Automatic), n).unwrap();
            assert_eq!(ring.len(), n);
        }
    }

    #[test]
    fn test_advance_wraps() {
        let mut ring = FrameRing::<Headless>::new(device(Completion::Automatic), 3).unwrap();
        let indices: Vec<usize> = (0..7)
            .map(|_| {
                let index = ring.current_index();
                ring.advance();
                index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.frame_number(), 7);
    }

    #[test]
    fn test_fresh_slot_does_not_block() {
        let ring = FrameRing::<Headless>::new(device(Completion::Manual), 2).unwrap();
        let timeout = Some(Duration::from_millis(10));
        ring.wait_for_current(timeout).unwrap();
    }

    #[test]
    fn test_pending_slot_times_out() {
        let device = device(Completion::Manual);
        let mut ring = FrameRing::<Headless>::new(Arc::clone(&device), 2).unwrap();

        ring.prepare_current().unwrap();
        let slot = ring.current_mut();
        slot.command_buffer_mut().begin_recording().unwrap();
        slot.command_buffer_mut().end_recording().unwrap();
        ring.reset_current_fence().unwrap();
        let slot = ring.current();
        device
            .submit(slot.command_buffer().raw(), None, None, slot.in_flight_fence())
            .unwrap();

        let timeout = Some(Duration::from_millis(20));
        let result = ring.wait_for_current(timeout);
        assert!(matches!(result, Err(RhiError::Timeout("frame fence"))));

        device.controller().complete_all();
        ring.wait_for_current(timeout).unwrap();
    }

    #[test]
    fn test_prepare_resets_command_buffer() {
        let mut ring = FrameRing::<Headless>::new(device(Completion::Automatic), 2).unwrap();
        let cmd = ring.current_mut().command_buffer_mut();
        cmd.begin_recording().unwrap();
        cmd.abandon().unwrap();
        assert_eq!(
            ring.current().command_buffer().state(),
            CommandBufferState::Invalid
        );

        ring.prepare_current().unwrap();
        assert_eq!(
            ring.current().command_buffer().state(),
            CommandBufferState::Initial
        );
    }

    #[test]
    fn test_invalidate_recordings() {
        let mut ring = FrameRing::<Headless>::new(device(Completion::Automatic), 2).unwrap();
        let cmd = ring.current_mut().command_buffer_mut();
        cmd.begin_recording().unwrap();
        ring.invalidate_recordings();
        assert_eq!(
            ring.current().command_buffer().state(),
            CommandBufferState::Invalid
        );
        ring.advance();
        assert_eq!(
            ring.current().command_buffer().state(),
            CommandBufferState::Initial
        );
    }
}
