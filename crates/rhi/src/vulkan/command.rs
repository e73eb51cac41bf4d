//! Command pools and command recording.
//!
//! - [`VulkanCommandPool`] owns a `VkCommandPool`; resetting it returns every
//!   buffer allocated from it to the initial state in one call.
//! - [`VulkanCommandBuffer`] translates [`CommandEncoder`] calls into
//!   `vkCmd*` calls, using dynamic rendering for the color target.
//! - [`submit_one_time`] records and synchronously executes a short
//!   transfer, used for texture uploads.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use super::Vulkan;
use super::buffer::VulkanBuffer;
use super::device::Device;
use super::image::subresource_range;
use super::pipeline::VulkanPipeline;
use super::swapchain::VulkanImageChain;
use super::sync::Fence;
use crate::backend::{CommandEncoder, ImageChainOps};
use crate::error::{RhiError, RhiResult};
use crate::types::{ClearColor, Extent2D, Format, IndexType, PrimitiveType};

/// Flags for per-frame pools. Buffers may be reset individually as well as
/// through the pool.
pub(crate) const FRAME_POOL_FLAGS: vk::CommandPoolCreateFlags =
    vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;

/// Vulkan command pool wrapper.
///
/// Not thread-safe; each frame slot owns its own pool.
pub struct VulkanCommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl VulkanCommandPool {
    /// Creates a pool for the graphics queue family.
    pub fn new(device: Arc<Device>, flags: vk::CommandPoolCreateFlags) -> RhiResult<Self> {
        let queue_family_index = device.queue_families().graphics_family.ok_or_else(|| {
            RhiError::InvalidHandle("Graphics queue family is not resolved".to_string())
        })?;

        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!(
            "Command pool created for queue family {} ({:?})",
            queue_family_index, flags
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates one primary command buffer.
    pub fn allocate(&self) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("No command buffer allocated".to_string()))
    }

    /// Returns every buffer allocated from this pool to the initial state.
    ///
    /// None of them may be pending execution.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(RhiError::from_vk)
    }
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed (queue family {})",
            self.queue_family_index
        );
    }
}

/// Primary command buffer recording into a frame.
///
/// Does not own the `VkCommandBuffer`; it is freed with its pool.
pub struct VulkanCommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
    rendering: bool,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            buffer,
            rendering: false,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

// =========================================================================
// Recording lifecycle
// =========================================================================

impl CommandEncoder<Vulkan> for VulkanCommandBuffer {
    fn begin(&mut self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.rendering = false;
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)
        }
        .map_err(RhiError::from_vk)
    }

    fn end(&mut self) -> RhiResult<()> {
        self.end_render_target();
        unsafe { self.device.handle().end_command_buffer(self.buffer) }.map_err(RhiError::from_vk)
    }

    fn reset(&mut self) -> RhiResult<()> {
        self.rendering = false;
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(RhiError::from_vk)
    }

    // =========================================================================
    // Render target
    // =========================================================================

    fn begin_render_target(
        &mut self,
        chain: &VulkanImageChain,
        image_index: u32,
        clear: ClearColor,
    ) {
        let device = self.device.handle();

        transition_image_layout(
            device,
            self.buffer,
            chain.image(image_index),
            chain.format().format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(chain.image_view(image_index))
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear.0 },
            });

        let depth_attachment = chain.depth().map(|depth| {
            transition_image_layout(
                device,
                self.buffer,
                depth.handle(),
                depth.format(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            );
            vk::RenderingAttachmentInfo::default()
                .image_view(depth.view())
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: chain.extent().to_vk(),
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        unsafe { device.cmd_begin_rendering(self.buffer, &rendering_info) };
        self.rendering = true;
    }

    fn end_render_target(&mut self) {
        if self.rendering {
            unsafe { self.device.handle().cmd_end_rendering(self.buffer) };
            self.rendering = false;
        }
    }

    fn transition_to_present(&mut self, chain: &VulkanImageChain, image_index: u32) {
        self.end_render_target();
        transition_image_layout(
            self.device.handle(),
            self.buffer,
            chain.image(image_index),
            chain.format().format,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
    }

    // =========================================================================
    // Binding
    // =========================================================================

    fn bind_pipeline(&mut self, pipeline: &VulkanPipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
    }

    fn bind_descriptor_sets(
        &mut self,
        pipeline: &VulkanPipeline,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                first_set,
                sets,
                dynamic_offsets,
            );
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: &VulkanBuffer, offset: u64) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[buffer.handle()], &[offset]);
        }
    }

    fn bind_index_buffer(
        &mut self,
        buffer: &VulkanBuffer,
        offset: u64,
        index_type: IndexType,
    ) {
        unsafe {
            self.device.handle().cmd_bind_index_buffer(
                self.buffer,
                buffer.handle(),
                offset,
                index_type.to_vk(),
            );
        }
    }

    // =========================================================================
    // Dynamic state
    // =========================================================================

    fn set_viewport(&mut self, extent: Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
        }
    }

    fn set_scissor(&mut self, extent: Extent2D) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: extent.to_vk(),
        };
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    // =========================================================================
    // Draw commands
    // =========================================================================

    fn draw(&mut self, primitive: PrimitiveType, vertex_count: u32, first_vertex: u32) {
        let device = self.device.handle();
        unsafe {
            device.cmd_set_primitive_topology(self.buffer, primitive.to_vk());
            device.cmd_draw(self.buffer, vertex_count, 1, first_vertex, 0);
        }
    }

    fn draw_indexed(
        &mut self,
        primitive: PrimitiveType,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        let device = self.device.handle();
        unsafe {
            device.cmd_set_primitive_topology(self.buffer, primitive.to_vk());
            device.cmd_draw_indexed(self.buffer, index_count, 1, first_index, vertex_offset, 0);
        }
    }
}

/// Access masks and stages for a supported layout transition.
fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        _ => {
            warn!(
                "Unhandled layout transition: {:?} -> {:?}",
                old_layout, new_layout
            );
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    }
}

/// Records an image layout transition over the whole image.
pub(crate) fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_stage, src_access, dst_stage, dst_access) = transition_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(format))
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Records `record` into a transient command buffer, submits it to the
/// graphics queue and blocks until it has executed.
pub(crate) fn submit_one_time<F>(device: &Arc<Device>, record: F) -> RhiResult<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let pool = VulkanCommandPool::new(Arc::clone(device), vk::CommandPoolCreateFlags::TRANSIENT)?;
    let cmd = pool.allocate()?;

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.handle().begin_command_buffer(cmd, &begin_info)? };
    record(device.handle(), cmd);
    unsafe { device.handle().end_command_buffer(cmd)? };

    let fence = Fence::new(Arc::clone(device), false)?;
    let command_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
    unsafe {
        device
            .handle()
            .queue_submit(device.graphics_queue(), &[submit_info], fence.handle())
            .map_err(RhiError::from_vk)?;
    }
    fence.wait(None)?;

    info!("One-time transfer submission completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_transition_masks() {
        let (src_stage, src_access, dst_stage, _) = transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_upload_transition_masks() {
        let (_, _, dst_stage, dst_access) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_unhandled_transition_falls_back_to_full_barrier() {
        let (src_stage, _, dst_stage, _) = transition_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_frame_pool_allows_buffer_reset() {
        assert!(FRAME_POOL_FLAGS.contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER));
    }
}
