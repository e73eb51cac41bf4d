//! Explicit-API backend on Vulkan 1.3.
//!
//! Built on `ash` with `gpu-allocator` for memory and `ash-window` for the
//! presentation surface. Rendering uses dynamic rendering, so pipelines
//! and command buffers never reference a render pass or framebuffer.

mod buffer;
mod command;
mod convert;
mod descriptor;
mod device;
mod image;
mod instance;
mod physical_device;
mod pipeline;
mod shader;
mod swapchain;
mod sync;
mod texture;

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use prism_core::RenderApi;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::backend::{Backend, GraphicsDevice};
use crate::buffer::BufferDesc;
use crate::context::GraphicsContext;
use crate::descriptor::{DescriptorWrite, validate_writes};
use crate::error::{RhiError, RhiResult};
use crate::pipeline::PipelineDesc;
use crate::texture::TextureDesc;
use crate::types::{AcquireOutcome, FenceStatus, ImageChainDesc, PresentOutcome, SurfaceSupport};

pub use buffer::VulkanBuffer;
pub use command::{VulkanCommandBuffer, VulkanCommandPool};
pub use descriptor::VulkanDescriptorSet;
pub use device::Device;
pub use image::DEFAULT_DEPTH_FORMAT;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
pub use pipeline::VulkanPipeline;
pub use swapchain::VulkanImageChain;
pub use sync::{Fence, Semaphore};
pub use texture::VulkanTexture;

/// Marker type for the Vulkan backend.
#[derive(Clone, Copy, Debug)]
pub struct Vulkan;

impl Backend for Vulkan {
    const API: RenderApi = RenderApi::Vulkan;

    type Device = VulkanDevice;
    type ImageChain = VulkanImageChain;
    type CommandPool = VulkanCommandPool;
    type CommandBuffer = VulkanCommandBuffer;
    type Semaphore = Semaphore;
    type Fence = Fence;
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Pipeline = VulkanPipeline;
    type DescriptorSet = VulkanDescriptorSet;
    type RawDescriptorSet = vk::DescriptorSet;
}

/// [`GraphicsDevice`] implementation over a shared [`Device`].
pub struct VulkanDevice {
    device: Arc<Device>,
}

impl VulkanDevice {
    /// Creates the instance, surface and logical device for a window.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] if the window system is not
    /// supported, [`RhiError::NoSuitableGpu`] if no GPU can present to the
    /// surface, or the error that stopped creation.
    pub fn new(
        validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RhiResult<Self> {
        let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(|e| {
                RhiError::SurfaceError(format!("Unsupported window system: {:?}", e))
            })?;

        let instance = Instance::new(validation, surface_extensions)?;

        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display_handle,
                window_handle,
                None,
            )
            .map_err(|e| RhiError::SurfaceError(format!("Failed to create surface: {:?}", e)))?
        };
        debug!("Window surface created");

        let device = Device::new(instance, surface)?;
        info!(
            "Vulkan device ready: {}",
            device.physical_device().device_name()
        );
        Ok(Self { device })
    }

    /// The shared device core.
    #[inline]
    pub fn inner(&self) -> &Arc<Device> {
        &self.device
    }
}

impl GraphicsDevice<Vulkan> for VulkanDevice {
    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        swapchain::query_surface_support(&self.device)
    }

    fn create_image_chain(
        &self,
        desc: &ImageChainDesc,
        old: Option<&VulkanImageChain>,
    ) -> RhiResult<VulkanImageChain> {
        VulkanImageChain::new(Arc::clone(&self.device), desc, old)
    }

    fn acquire_next_image(
        &self,
        chain: &VulkanImageChain,
        signal: &Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_loader().acquire_next_image(
                chain.handle(),
                sync::timeout_ns(Some(timeout)),
                signal.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Ready(index)),
            Ok((index, true)) => Ok(AcquireOutcome::SubOptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Err(RhiError::Timeout("swapchain image"))
            }
            Err(e) => Err(RhiError::from_vk(e)),
        }
    }

    fn present(
        &self,
        chain: &VulkanImageChain,
        image_index: u32,
        wait: &Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let wait_semaphores = [wait.handle()];
        let swapchains = [chain.handle()];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader()
                .queue_present(self.device.present_queue(), &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::SubOptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RhiError::from_vk(e)),
        }
    }

    fn create_semaphore(&self) -> RhiResult<Semaphore> {
        Semaphore::new(Arc::clone(&self.device))
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<Fence> {
        Fence::new(Arc::clone(&self.device), signaled)
    }

    fn wait_for_fence(&self, fence: &Fence, timeout: Option<Duration>) -> RhiResult<FenceStatus> {
        fence.wait(timeout)
    }

    fn reset_fence(&self, fence: &Fence) -> RhiResult<()> {
        fence.reset()
    }

    fn create_command_pool(&self) -> RhiResult<VulkanCommandPool> {
        VulkanCommandPool::new(Arc::clone(&self.device), command::FRAME_POOL_FLAGS)
    }

    fn reset_command_pool(&self, pool: &mut VulkanCommandPool) -> RhiResult<()> {
        pool.reset()
    }

    fn allocate_command_buffer(
        &self,
        pool: &mut VulkanCommandPool,
    ) -> RhiResult<VulkanCommandBuffer> {
        let buffer = pool.allocate()?;
        Ok(VulkanCommandBuffer::new(Arc::clone(&self.device), buffer))
    }

    fn submit(
        &self,
        cmd: &VulkanCommandBuffer,
        wait: Option<&Semaphore>,
        signal: Option<&Semaphore>,
        fence: &Fence,
    ) -> RhiResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.map(Semaphore::handle).into_iter().collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
            .iter()
            .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> =
            signal.map(Semaphore::handle).into_iter().collect();
        let command_buffers = [cmd.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.handle().queue_submit(
                self.device.graphics_queue(),
                &[submit_info],
                fence.handle(),
            )
        }
        .map_err(RhiError::from_vk)
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<VulkanBuffer> {
        VulkanBuffer::new(Arc::clone(&self.device), desc)
    }

    fn write_buffer(&self, buffer: &VulkanBuffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        buffer.write(offset, data)
    }

    fn create_texture(&self, desc: &TextureDesc, data: Option<&[u8]>) -> RhiResult<VulkanTexture> {
        VulkanTexture::new(Arc::clone(&self.device), desc, data)
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<VulkanPipeline> {
        VulkanPipeline::new(Arc::clone(&self.device), desc)
    }

    fn create_descriptor_set(
        &self,
        pipeline: &VulkanPipeline,
        set_index: u32,
        writes: &[DescriptorWrite<'_, Vulkan>],
    ) -> RhiResult<VulkanDescriptorSet> {
        use crate::backend::PipelineOps;

        let (vk_layout, layout) = pipeline.set_layout(set_index).ok_or_else(|| {
            RhiError::DescriptorError(format!(
                "pipeline '{}' has no descriptor set {}",
                pipeline.name(),
                set_index
            ))
        })?;
        validate_writes(layout, writes)?;

        let pool = pipeline.descriptor_pool().ok_or_else(|| {
            RhiError::DescriptorError(format!(
                "pipeline '{}' has no descriptor pool",
                pipeline.name()
            ))
        })?;

        VulkanDescriptorSet::new(
            Arc::clone(pool),
            vk_layout,
            layout,
            pipeline.layout_id(),
            set_index,
            writes,
        )
    }
}

impl GraphicsContext<Vulkan> {
    /// Creates a Vulkan context presenting to a window.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::BackendMismatch`] if another API is active, or
    /// the error from [`VulkanDevice::new`].
    pub fn new(
        validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RhiResult<Self> {
        Self::create(|| VulkanDevice::new(validation, display_handle, window_handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
        assert_send_sync::<VulkanBuffer>();
        assert_send_sync::<VulkanPipeline>();
        assert_send_sync::<VulkanDescriptorSet>();
    }

    #[test]
    fn test_backend_api() {
        assert_eq!(Vulkan::API, RenderApi::Vulkan);
    }
}
