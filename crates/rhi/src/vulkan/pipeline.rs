//! Graphics pipelines.
//!
//! A [`VulkanPipeline`] bundles the `VkPipeline`, its layout, one
//! descriptor set layout per set slot and the descriptor pool its sets are
//! allocated from. Pipelines target dynamic rendering (Vulkan 1.3), so the
//! attachment formats come from the [`RenderTargetLayout`] rather than a
//! render pass. Viewport, scissor and primitive topology are dynamic state.
//!
//! [`RenderTargetLayout`]: crate::pipeline::RenderTargetLayout

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use super::descriptor::{DescriptorPool, DescriptorSetLayout, pool_sizes};
use super::device::Device;
use super::shader::ShaderModule;
use crate::backend::PipelineOps;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{
    DescriptorSetLayoutDesc, FixedFunctionState, LayoutId, PipelineDesc, PipelineKey,
    ShaderSource, VertexLayout,
};

/// States set while recording instead of at pipeline creation.
const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::PRIMITIVE_TOPOLOGY,
];

/// Vulkan graphics pipeline with its layout and descriptor resources.
pub struct VulkanPipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    // Dropped after the pipeline handle is destroyed in Drop.
    set_layouts: Vec<DescriptorSetLayout>,
    layout_descs: Vec<DescriptorSetLayoutDesc>,
    descriptor_pool: Option<Arc<DescriptorPool>>,
    key: PipelineKey,
    layout_id: LayoutId,
    name: String,
}

impl VulkanPipeline {
    /// Builds a pipeline from `desc`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] for non-SPIR-V shaders,
    /// [`RhiError::PipelineError`] for a target without color formats, or
    /// the Vulkan error from object creation.
    pub fn new(device: Arc<Device>, desc: &PipelineDesc) -> RhiResult<Self> {
        let ShaderSource::SpirV { vertex, fragment } = &desc.shader.source else {
            return Err(RhiError::ShaderError(format!(
                "Pipeline '{}' needs SPIR-V shaders on Vulkan",
                desc.name
            )));
        };
        if desc.target.color_formats.is_empty() {
            return Err(RhiError::PipelineError(
                "At least one color attachment format is required".to_string(),
            ));
        }

        let vertex_shader =
            ShaderModule::new(Arc::clone(&device), vertex, vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader =
            ShaderModule::new(Arc::clone(&device), fragment, vk::ShaderStageFlags::FRAGMENT)?;

        let set_layouts = desc
            .descriptor_layouts
            .iter()
            .map(|layout| DescriptorSetLayout::new(Arc::clone(&device), layout))
            .collect::<RhiResult<Vec<_>>>()?;

        let descriptor_pool = if desc.descriptor_layouts.is_empty() {
            None
        } else if desc.max_descriptor_sets == 0 {
            return Err(RhiError::PipelineError(format!(
                "Pipeline '{}' has descriptor layouts but allows no descriptor sets",
                desc.name
            )));
        } else {
            let sizes = pool_sizes(&desc.descriptor_layouts, desc.max_descriptor_sets);
            Some(Arc::new(DescriptorPool::new(
                Arc::clone(&device),
                desc.max_descriptor_sets,
                &sizes,
            )?))
        };

        let vk_set_layouts: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(DescriptorSetLayout::handle).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&vk_set_layouts);
        let layout = unsafe { device.handle().create_pipeline_layout(&layout_info, None)? };

        // Owns `layout` from here on, so an error below still destroys it.
        let mut created = Self {
            device,
            pipeline: vk::Pipeline::null(),
            layout,
            set_layouts,
            layout_descs: desc.descriptor_layouts.clone(),
            descriptor_pool,
            key: desc.key(),
            layout_id: LayoutId::next(),
            name: desc.name.clone(),
        };

        created.pipeline = build_graphics_pipeline(
            &created.device,
            desc,
            layout,
            [&vertex_shader, &fragment_shader],
        )?;

        info!(
            "Created graphics pipeline '{}' ({} descriptor set layout(s))",
            created.name,
            created.set_layouts.len()
        );
        Ok(created)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Vulkan layout of set slot `index`, with its description.
    pub(crate) fn set_layout(
        &self,
        index: u32,
    ) -> Option<(vk::DescriptorSetLayout, &DescriptorSetLayoutDesc)> {
        let i = index as usize;
        Some((self.set_layouts.get(i)?.handle(), self.layout_descs.get(i)?))
    }

    pub(crate) fn descriptor_pool(&self) -> Option<&Arc<DescriptorPool>> {
        self.descriptor_pool.as_ref()
    }
}

impl PipelineOps for VulkanPipeline {
    fn key(&self) -> &PipelineKey {
        &self.key
    }

    fn layout_id(&self) -> LayoutId {
        self.layout_id
    }

    fn descriptor_set_count(&self) -> usize {
        self.set_layouts.len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.handle().destroy_pipeline(self.pipeline, None);
            }
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed pipeline '{}'", self.name);
    }
}

fn vertex_input(
    layout: &VertexLayout,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    if layout.attributes.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let binding = vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(layout.stride)
        .input_rate(vk::VertexInputRate::VERTEX);

    let attributes = layout
        .attributes
        .iter()
        .map(|attr| {
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(attr.location)
                .format(attr.format.to_vk())
                .offset(attr.offset)
        })
        .collect();

    (vec![binding], attributes)
}

/// Color blend state for one attachment.
fn blend_attachment(transparency: bool) -> vk::PipelineColorBlendAttachmentState {
    if transparency {
        // src * src_alpha + dst * (1 - src_alpha)
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }
}

fn polygon_mode(device: &Device, state: &FixedFunctionState) -> vk::PolygonMode {
    if !state.wireframe {
        vk::PolygonMode::FILL
    } else if device.supports_wireframe() {
        vk::PolygonMode::LINE
    } else {
        warn!("Wireframe requested but fillModeNonSolid is unsupported; using fill");
        vk::PolygonMode::FILL
    }
}

fn build_graphics_pipeline(
    device: &Device,
    desc: &PipelineDesc,
    layout: vk::PipelineLayout,
    shaders: [&ShaderModule; 2],
) -> RhiResult<vk::Pipeline> {
    let state = &desc.state;
    let shader_stages = shaders.map(ShaderModule::stage_create_info);

    let (bindings, attributes) = vertex_input(&desc.vertex_layout);
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(state.topology.to_vk())
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let mut rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(polygon_mode(device, state))
        .line_width(1.0)
        .cull_mode(state.cull_mode.to_vk())
        .front_face(state.front_face.to_vk());
    if let Some(bias) = state.depth_bias {
        rasterization_state = rasterization_state
            .depth_bias_enable(true)
            .depth_bias_constant_factor(bias.constant_factor)
            .depth_bias_slope_factor(bias.slope_factor)
            .depth_bias_clamp(bias.clamp);
    }

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let has_depth = desc.target.depth_format.is_some();
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(has_depth && state.depth_test)
        .depth_write_enable(has_depth && state.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
        .target
        .color_formats
        .iter()
        .map(|_| blend_attachment(state.transparency))
        .collect();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

    let color_formats: Vec<vk::Format> = desc
        .target
        .color_formats
        .iter()
        .map(|format| format.to_vk())
        .collect();
    let mut rendering_info =
        vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
    if let Some(depth_format) = desc.target.depth_format {
        rendering_info = rendering_info.depth_attachment_format(depth_format.to_vk());
    }

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device
            .handle()
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| {
                RhiError::PipelineError(format!(
                    "Failed to create pipeline '{}': {:?}",
                    desc.name, e
                ))
            })?
    };

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("No pipeline created".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{VertexAttribute, VertexFormat};

    #[test]
    fn test_vertex_input_from_layout() {
        let layout = VertexLayout::new(
            24,
            vec![
                VertexAttribute::new(0, VertexFormat::Float32x3, 0),
                VertexAttribute::new(1, VertexFormat::Float32x3, 12),
            ],
        );
        let (bindings, attributes) = vertex_input(&layout);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 24);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn test_vertex_input_empty_layout() {
        let (bindings, attributes) = vertex_input(&VertexLayout::default());
        assert!(bindings.is_empty());
        assert!(attributes.is_empty());
    }

    #[test]
    fn test_blend_attachment() {
        let opaque = blend_attachment(false);
        assert_eq!(opaque.blend_enable, vk::FALSE);

        let blended = blend_attachment(true);
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blended.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }

    #[test]
    fn test_dynamic_states_include_topology() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::PRIMITIVE_TOPOLOGY));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
    }
}
