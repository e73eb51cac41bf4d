//! Simulated device, presentation engine and GPU timeline.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::resources::{
    ChainCursor, HeadlessBuffer, HeadlessCommandBuffer, HeadlessCommandPool,
    HeadlessDescriptorSet, HeadlessFence, HeadlessImageChain, HeadlessPipeline,
    HeadlessSemaphore, HeadlessTexture, RecordedCommand,
};
use super::{Headless, HeadlessConfig};
use crate::backend::{GraphicsDevice, ImageChainOps};
use crate::buffer::BufferDesc;
use crate::descriptor::{DescriptorWrite, validate_writes};
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{LayoutId, PipelineDesc};
use crate::texture::TextureDesc;
use crate::types::{
    AcquireOutcome, Extent2D, FenceStatus, ImageChainDesc, PresentOutcome, SurfaceSupport,
};

/// When simulated GPU work completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Completion {
    /// Every submission completes as soon as it is made.
    #[default]
    Automatic,
    /// Submissions stay in flight until completed through the controller
    /// (or drained by [`GraphicsDevice::wait_idle`]).
    Manual,
}

/// An outcome forced onto the next acquire or present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Injected {
    OutOfDate,
    SubOptimal,
    Timeout,
    DeviceLost,
}

/// One queue submission as seen by the simulated GPU.
#[derive(Clone, Debug)]
pub struct Submission {
    pub seq: u64,
    pub commands: Vec<RecordedCommand>,
    pub waited_on_semaphore: bool,
    pub signaled_semaphore: bool,
}

/// One image handed to the simulated display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    pub image_index: u32,
    pub extent: Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FenceState {
    Signaled,
    Unsignaled,
    Pending(u64),
}

pub(crate) struct SimState {
    support: SurfaceSupport,
    completion: Completion,
    next_id: u64,
    next_seq: u64,
    in_flight: VecDeque<(u64, u64)>,
    pub(crate) fences: HashMap<u64, FenceState>,
    pub(crate) semaphores: HashMap<u64, bool>,
    pub(crate) current_chain: Option<u64>,
    injected_acquire: VecDeque<Injected>,
    injected_present: VecDeque<Injected>,
    device_lost: bool,
    submissions: Vec<Submission>,
    presents: Vec<PresentRecord>,
    chain_creations: Vec<Extent2D>,
    acquisitions: usize,
    wait_idle_calls: usize,
}

impl SimState {
    fn new(config: HeadlessConfig) -> Self {
        Self {
            support: config.support,
            completion: config.completion,
            next_id: 1,
            next_seq: 1,
            in_flight: VecDeque::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            current_chain: None,
            injected_acquire: VecDeque::new(),
            injected_present: VecDeque::new(),
            device_lost: false,
            submissions: Vec::new(),
            presents: Vec::new(),
            chain_creations: Vec::new(),
            acquisitions: 0,
            wait_idle_calls: 0,
        }
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_device(&self) -> RhiResult<()> {
        if self.device_lost {
            Err(RhiError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Retires the oldest in-flight submission. Returns false if none.
    fn complete_next(&mut self) -> bool {
        let Some((seq, fence)) = self.in_flight.pop_front() else {
            return false;
        };
        if let Some(state) = self.fences.get_mut(&fence) {
            if *state == FenceState::Pending(seq) {
                *state = FenceState::Signaled;
            }
        }
        trace!("Simulated submission {} complete", seq);
        true
    }

    fn complete_all(&mut self) -> usize {
        let mut count = 0;
        while self.complete_next() {
            count += 1;
        }
        count
    }

    fn consume_semaphore(&mut self, semaphore: &HeadlessSemaphore, what: &str) -> RhiResult<()> {
        match self.semaphores.get_mut(&semaphore.id) {
            Some(pending) if *pending => {
                *pending = false;
                Ok(())
            }
            Some(_) => Err(RhiError::SyncError(format!(
                "{} waits on a semaphore with no pending signal",
                what
            ))),
            None => Err(RhiError::InvalidHandle("semaphore".to_string())),
        }
    }

    fn signal_semaphore(&mut self, semaphore: &HeadlessSemaphore, what: &str) -> RhiResult<()> {
        match self.semaphores.get_mut(&semaphore.id) {
            Some(pending) if !*pending => {
                *pending = true;
                Ok(())
            }
            Some(_) => Err(RhiError::SyncError(format!(
                "{} signals a semaphore that already has a pending signal",
                what
            ))),
            None => Err(RhiError::InvalidHandle("semaphore".to_string())),
        }
    }

    fn chain_is_stale(&self, chain: &HeadlessImageChain) -> bool {
        if self.current_chain != Some(chain.id) {
            return true;
        }
        self.support
            .capabilities
            .current_extent
            .is_some_and(|extent| extent != chain.extent())
    }
}

pub(crate) struct Shared {
    state: Mutex<SimState>,
    gpu: Condvar,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The simulated device.
pub struct HeadlessDevice {
    shared: Arc<Shared>,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        info!(
            "Headless device created ({:?} completion, {} formats, {} present modes)",
            config.completion,
            config.support.formats.len(),
            config.support.present_modes.len()
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState::new(config)),
                gpu: Condvar::new(),
            }),
        }
    }

    /// Returns a handle for steering and inspecting the simulation.
    pub fn controller(&self) -> HeadlessController {
        HeadlessController {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl GraphicsDevice<Headless> for HeadlessDevice {
    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        let state = self.shared.lock();
        state.check_device()?;
        Ok(state.support.clone())
    }

    fn create_image_chain(
        &self,
        desc: &ImageChainDesc,
        old: Option<&HeadlessImageChain>,
    ) -> RhiResult<HeadlessImageChain> {
        let mut state = self.shared.lock();
        state.check_device()?;

        let caps = state.support.capabilities;
        if desc.extent.is_empty() || caps.clamp_extent(desc.extent) != desc.extent {
            return Err(RhiError::SwapchainError(format!(
                "extent {}x{} outside surface range",
                desc.extent.width, desc.extent.height
            )));
        }
        if desc.image_count < caps.min_image_count
            || (caps.max_image_count > 0 && desc.image_count > caps.max_image_count)
        {
            return Err(RhiError::SwapchainError(format!(
                "image count {} outside surface range",
                desc.image_count
            )));
        }
        if !state.support.formats.contains(&desc.surface_format) {
            return Err(RhiError::UnsupportedSurface(format!(
                "format {:?} not offered",
                desc.surface_format
            )));
        }
        if !state.support.present_modes.contains(&desc.present_mode) {
            return Err(RhiError::UnsupportedSurface(format!(
                "present mode {:?} not offered",
                desc.present_mode
            )));
        }

        match (old, state.current_chain) {
            (Some(old), current) if current != Some(old.id) => {
                return Err(RhiError::SwapchainError(
                    "old image chain is not the surface's current chain".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(RhiError::SwapchainError(
                    "surface already has an active image chain".to_string(),
                ));
            }
            _ => {}
        }

        let id = state.next_id();
        state.current_chain = Some(id);
        state.chain_creations.push(desc.extent);

        debug!(
            "Headless image chain {} created: {}x{}, {} images",
            id, desc.extent.width, desc.extent.height, desc.image_count
        );

        Ok(HeadlessImageChain {
            id,
            desc: *desc,
            cursor: Mutex::new(ChainCursor::default()),
            shared: Arc::clone(&self.shared),
        })
    }

    fn acquire_next_image(
        &self,
        chain: &HeadlessImageChain,
        signal: &HeadlessSemaphore,
        _timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let mut state = self.shared.lock();
        state.check_device()?;

        let suboptimal = match state.injected_acquire.pop_front() {
            Some(Injected::OutOfDate) => return Ok(AcquireOutcome::OutOfDate),
            Some(Injected::Timeout) => return Err(RhiError::Timeout("swapchain image")),
            Some(Injected::DeviceLost) => {
                state.device_lost = true;
                return Err(RhiError::DeviceLost);
            }
            Some(Injected::SubOptimal) => true,
            None => false,
        };

        if state.chain_is_stale(chain) {
            return Ok(AcquireOutcome::OutOfDate);
        }

        state.signal_semaphore(signal, "acquire")?;
        let acquired = chain
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquire(chain.image_count());
        let Some(index) = acquired else {
            // Every image is held by the application; a real engine would block.
            state.semaphores.insert(signal.id, false);
            return Err(RhiError::Timeout("swapchain image"));
        };
        state.acquisitions += 1;

        trace!("Headless acquired image {}", index);
        Ok(if suboptimal {
            AcquireOutcome::SubOptimal(index)
        } else {
            AcquireOutcome::Ready(index)
        })
    }

    fn present(
        &self,
        chain: &HeadlessImageChain,
        image_index: u32,
        wait: &HeadlessSemaphore,
    ) -> RhiResult<PresentOutcome> {
        let mut state = self.shared.lock();
        state.check_device()?;

        let released = chain
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(image_index);
        if !released {
            return Err(RhiError::SyncError(format!(
                "image {} presented without being acquired",
                image_index
            )));
        }
        state.consume_semaphore(wait, "present")?;

        let outcome = match state.injected_present.pop_front() {
            Some(Injected::OutOfDate) => return Ok(PresentOutcome::OutOfDate),
            Some(Injected::Timeout) => return Err(RhiError::Timeout("presentation")),
            Some(Injected::DeviceLost) => {
                state.device_lost = true;
                return Err(RhiError::DeviceLost);
            }
            Some(Injected::SubOptimal) => PresentOutcome::SubOptimal,
            None if state.chain_is_stale(chain) => return Ok(PresentOutcome::OutOfDate),
            None => PresentOutcome::Presented,
        };

        state.presents.push(PresentRecord {
            image_index,
            extent: chain.extent(),
        });
        Ok(outcome)
    }

    fn create_semaphore(&self) -> RhiResult<HeadlessSemaphore> {
        let mut state = self.shared.lock();
        let id = state.next_id();
        state.semaphores.insert(id, false);
        Ok(HeadlessSemaphore {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<HeadlessFence> {
        let mut state = self.shared.lock();
        let id = state.next_id();
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(id, initial);
        Ok(HeadlessFence {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    fn wait_for_fence(
        &self,
        fence: &HeadlessFence,
        timeout: Option<Duration>,
    ) -> RhiResult<FenceStatus> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();

        loop {
            state.check_device()?;
            match state.fences.get(&fence.id) {
                Some(FenceState::Signaled) => return Ok(FenceStatus::Signaled),
                Some(FenceState::Unsignaled) => {
                    return Err(RhiError::SyncError(
                        "waiting on an unsignaled fence with no pending submission".to_string(),
                    ));
                }
                Some(FenceState::Pending(_)) => {}
                None => return Err(RhiError::InvalidHandle("fence".to_string())),
            }

            state = match deadline {
                None => self
                    .shared
                    .gpu
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(FenceStatus::TimedOut);
                    }
                    self.shared
                        .gpu
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn reset_fence(&self, fence: &HeadlessFence) -> RhiResult<()> {
        let mut state = self.shared.lock();
        match state.fences.get_mut(&fence.id) {
            Some(FenceState::Pending(_)) => Err(RhiError::SyncError(
                "reset of a fence with pending work".to_string(),
            )),
            Some(slot) => {
                *slot = FenceState::Unsignaled;
                Ok(())
            }
            None => Err(RhiError::InvalidHandle("fence".to_string())),
        }
    }

    fn create_command_pool(&self) -> RhiResult<HeadlessCommandPool> {
        Ok(HeadlessCommandPool::default())
    }

    fn reset_command_pool(&self, pool: &mut HeadlessCommandPool) -> RhiResult<()> {
        pool.resets += 1;
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        pool: &mut HeadlessCommandPool,
    ) -> RhiResult<HeadlessCommandBuffer> {
        pool.allocated += 1;
        Ok(HeadlessCommandBuffer::default())
    }

    fn submit(
        &self,
        cmd: &HeadlessCommandBuffer,
        wait: Option<&HeadlessSemaphore>,
        signal: Option<&HeadlessSemaphore>,
        fence: &HeadlessFence,
    ) -> RhiResult<()> {
        let mut state = self.shared.lock();
        state.check_device()?;

        match state.fences.get(&fence.id) {
            Some(FenceState::Unsignaled) => {}
            Some(_) => {
                return Err(RhiError::SyncError(
                    "submission fence must be unsignaled".to_string(),
                ));
            }
            None => return Err(RhiError::InvalidHandle("fence".to_string())),
        }
        if let Some(wait) = wait {
            state.consume_semaphore(wait, "submission")?;
        }
        if let Some(signal) = signal {
            state.signal_semaphore(signal, "submission")?;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.submissions.push(Submission {
            seq,
            commands: cmd.commands().to_vec(),
            waited_on_semaphore: wait.is_some(),
            signaled_semaphore: signal.is_some(),
        });
        state.fences.insert(fence.id, FenceState::Pending(seq));
        state.in_flight.push_back((seq, fence.id));
        trace!("Simulated submission {} ({} commands)", seq, cmd.commands().len());

        if state.completion == Completion::Automatic {
            state.complete_all();
            self.shared.gpu.notify_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.shared.lock();
        state.check_device()?;
        state.wait_idle_calls += 1;
        let drained = state.complete_all();
        if drained > 0 {
            debug!("wait_idle drained {} simulated submissions", drained);
            self.shared.gpu.notify_all();
        }
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<HeadlessBuffer> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }
        let id = self.shared.lock().next_id();
        Ok(HeadlessBuffer {
            id,
            desc: *desc,
            data: Mutex::new(vec![0; desc.size as usize]),
        })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        if !buffer.desc.contains(offset, data.len()) {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                buffer.desc.size
            )));
        }
        let mut contents = buffer.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = offset as usize;
        contents[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> RhiResult<HeadlessTexture> {
        desc.validate(data)?;
        let id = self.shared.lock().next_id();
        Ok(HeadlessTexture { id, desc: *desc })
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<HeadlessPipeline> {
        if desc.target.color_formats.is_empty() {
            return Err(RhiError::PipelineError(format!(
                "pipeline '{}' has no color attachment",
                desc.name
            )));
        }
        if desc.max_descriptor_sets == 0 && !desc.descriptor_layouts.is_empty() {
            warn!(
                "Pipeline '{}' declares descriptor layouts but allows no sets",
                desc.name
            );
        }

        let layout_id = LayoutId::next();
        debug!("Headless pipeline '{}' created ({:?})", desc.name, layout_id);
        Ok(HeadlessPipeline {
            key: desc.key(),
            layout_id,
            name: desc.name.clone(),
            layouts: desc.descriptor_layouts.clone(),
            max_sets: desc.max_descriptor_sets,
            live_sets: Arc::new(AtomicU32::new(0)),
        })
    }

    fn create_descriptor_set(
        &self,
        pipeline: &HeadlessPipeline,
        set_index: u32,
        writes: &[DescriptorWrite<'_, Headless>],
    ) -> RhiResult<HeadlessDescriptorSet> {
        let layout = pipeline.layouts.get(set_index as usize).ok_or_else(|| {
            RhiError::DescriptorError(format!(
                "pipeline '{}' has no descriptor set {}",
                pipeline.name, set_index
            ))
        })?;
        validate_writes(layout, writes)?;

        let live = Arc::clone(&pipeline.live_sets);
        HeadlessDescriptorSet::reserve(&live, pipeline.max_sets).ok_or_else(|| {
            RhiError::DescriptorError(format!(
                "descriptor pool of pipeline '{}' is exhausted",
                pipeline.name
            ))
        })?;

        let id = self.shared.lock().next_id();
        Ok(HeadlessDescriptorSet {
            id,
            layout_id: pipeline.layout_id,
            set_index,
            dynamic: layout.is_dynamic(),
            live,
        })
    }
}

/// Test handle for steering and inspecting a [`HeadlessDevice`].
#[derive(Clone)]
pub struct HeadlessController {
    shared: Arc<Shared>,
}

impl HeadlessController {
    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.shared.lock().support = support;
    }

    /// Replaces the surface capabilities (e.g. to simulate a monitor change).
    pub fn set_surface_capabilities(&self, capabilities: crate::types::SurfaceCapabilities) {
        self.shared.lock().support.capabilities = capabilities;
    }

    /// Switches completion mode. Switching to automatic drains pending work.
    pub fn set_completion(&self, completion: Completion) {
        let mut state = self.shared.lock();
        state.completion = completion;
        if completion == Completion::Automatic && state.complete_all() > 0 {
            self.shared.gpu.notify_all();
        }
    }

    /// Completes the oldest in-flight submission. Returns false if none.
    pub fn complete_next(&self) -> bool {
        let completed = self.shared.lock().complete_next();
        if completed {
            self.shared.gpu.notify_all();
        }
        completed
    }

    /// Completes every in-flight submission, returning how many there were.
    pub fn complete_all(&self) -> usize {
        let count = self.shared.lock().complete_all();
        if count > 0 {
            self.shared.gpu.notify_all();
        }
        count
    }

    pub fn inject_acquire(&self, outcome: Injected) {
        self.shared.lock().injected_acquire.push_back(outcome);
    }

    pub fn inject_present(&self, outcome: Injected) {
        self.shared.lock().injected_present.push_back(outcome);
    }

    /// Loses the device: every later device call fails with `DeviceLost`.
    pub fn lose_device(&self) {
        self.shared.lock().device_lost = true;
        self.shared.gpu.notify_all();
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.shared.lock().submissions.clone()
    }

    /// Every command of every submission, in submission order.
    pub fn submitted_commands(&self) -> Vec<RecordedCommand> {
        self.shared
            .lock()
            .submissions
            .iter()
            .flat_map(|s| s.commands.iter().cloned())
            .collect()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.shared.lock().presents.clone()
    }

    /// Extents of every image chain created, in order.
    pub fn chain_creations(&self) -> Vec<Extent2D> {
        self.shared.lock().chain_creations.clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.shared.lock().acquisitions
    }

    pub fn wait_idle_calls(&self) -> usize {
        self.shared.lock().wait_idle_calls
    }

    pub fn pending_submissions(&self) -> usize {
        self.shared.lock().in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PresentMode, choose_surface_format};

    fn chain_desc(device: &HeadlessDevice) -> ImageChainDesc {
        let support = device.surface_support().unwrap();
        ImageChainDesc {
            extent: Extent2D::new(640, 480),
            surface_format: choose_surface_format(&support.formats),
            present_mode: PresentMode::Fifo,
            image_count: 3,
            depth_format: None,
        }
    }

    #[test]
    fn test_fence_wait_blocks_until_completion() {
        let device = HeadlessDevice::new(
            HeadlessConfig::default().with_completion(Completion::Manual),
        );
        let controller = device.controller();
        let fence = device.create_fence(false).unwrap();
        let cmd = HeadlessCommandBuffer::default();

        device.submit(&cmd, None, None, &fence).unwrap();
        assert_eq!(
            device
                .wait_for_fence(&fence, Some(Duration::from_millis(10)))
                .unwrap(),
            FenceStatus::TimedOut
        );

        assert!(controller.complete_next());
        assert_eq!(
            device.wait_for_fence(&fence, None).unwrap(),
            FenceStatus::Signaled
        );
    }

    #[test]
    fn test_submit_requires_unsignaled_fence() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let fence = device.create_fence(true).unwrap();
        let cmd = HeadlessCommandBuffer::default();
        assert!(matches!(
            device.submit(&cmd, None, None, &fence),
            Err(RhiError::SyncError(_))
        ));
        device.reset_fence(&fence).unwrap();
        device.submit(&cmd, None, None, &fence).unwrap();
    }

    #[test]
    fn test_waiting_on_unsignaled_fence_is_an_error() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let fence = device.create_fence(false).unwrap();
        assert!(matches!(
            device.wait_for_fence(&fence, None),
            Err(RhiError::SyncError(_))
        ));
    }

    #[test]
    fn test_semaphore_cannot_be_signaled_twice() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let chain = device.create_image_chain(&chain_desc(&device), None).unwrap();
        let semaphore = device.create_semaphore().unwrap();

        device
            .acquire_next_image(&chain, &semaphore, Duration::from_secs(1))
            .unwrap();
        assert!(matches!(
            device.acquire_next_image(&chain, &semaphore, Duration::from_secs(1)),
            Err(RhiError::SyncError(_))
        ));
    }

    #[test]
    fn test_present_requires_acquired_image() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let chain = device.create_image_chain(&chain_desc(&device), None).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        assert!(matches!(
            device.present(&chain, 0, &semaphore),
            Err(RhiError::SyncError(_))
        ));
    }

    #[test]
    fn test_retired_chain_is_out_of_date() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let desc = chain_desc(&device);
        let old = device.create_image_chain(&desc, None).unwrap();
        assert!(device.create_image_chain(&desc, None).is_err());

        let _new = device.create_image_chain(&desc, Some(&old)).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        assert_eq!(
            device
                .acquire_next_image(&old, &semaphore, Duration::from_secs(1))
                .unwrap(),
            AcquireOutcome::OutOfDate
        );
    }

    #[test]
    fn test_injected_outcomes() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let controller = device.controller();
        let chain = device.create_image_chain(&chain_desc(&device), None).unwrap();
        let semaphore = device.create_semaphore().unwrap();

        controller.inject_acquire(Injected::OutOfDate);
        assert_eq!(
            device
                .acquire_next_image(&chain, &semaphore, Duration::from_secs(1))
                .unwrap(),
            AcquireOutcome::OutOfDate
        );

        controller.inject_acquire(Injected::DeviceLost);
        assert!(matches!(
            device.acquire_next_image(&chain, &semaphore, Duration::from_secs(1)),
            Err(RhiError::DeviceLost)
        ));
        assert!(matches!(device.wait_idle(), Err(RhiError::DeviceLost)));
    }

    #[test]
    fn test_chain_rejects_out_of_range_extent() {
        let device = HeadlessDevice::new(
            HeadlessConfig::default()
                .with_extent_range(Extent2D::new(64, 64), Extent2D::new(4096, 2160)),
        );
        let mut desc = chain_desc(&device);
        desc.extent = Extent2D::new(10000, 10000);
        assert!(matches!(
            device.create_image_chain(&desc, None),
            Err(RhiError::SwapchainError(_))
        ));
    }

    #[test]
    fn test_write_buffer_bounds() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let buffer = device
            .create_buffer(&BufferDesc::new(crate::buffer::BufferUsage::Uniform, 8))
            .unwrap();
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.contents(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.write_buffer(&buffer, 6, &[1, 2, 3]).is_err());
    }
}
