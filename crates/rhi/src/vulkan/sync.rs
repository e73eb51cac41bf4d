//! Semaphores and fences.
//!
//! - [`Semaphore`] orders GPU work against other GPU work (acquire before
//!   render, render before present).
//! - [`Fence`] lets the CPU wait for GPU completion.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use super::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::types::FenceStatus;

/// Converts an optional timeout to the nanosecond form Vulkan takes.
pub(crate) fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

/// Vulkan semaphore wrapper.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        debug!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Start signaled, so the first wait before any
    ///   submission returns immediately
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` expires.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the device was lost while waiting.
    pub fn wait(&self, timeout: Option<Duration>) -> RhiResult<FenceStatus> {
        let fences = [self.fence];
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout_ns(timeout))
        };
        match result {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(RhiError::from_vk(e)),
        }
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be referenced by a pending submission.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences) }.map_err(RhiError::from_vk)
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        unsafe { self.device.handle().get_fence_status(self.fence) }.map_err(RhiError::from_vk)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ns(None), u64::MAX);
        assert_eq!(timeout_ns(Some(Duration::from_millis(2))), 2_000_000);
        assert_eq!(timeout_ns(Some(Duration::MAX)), u64::MAX);
    }

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }
}
