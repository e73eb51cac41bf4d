//! Descriptor set layouts, pools and sets.
//!
//! Each pipeline owns one [`DescriptorSetLayout`] per set slot and one
//! [`DescriptorPool`] sized for `max_descriptor_sets` sets. Sets created
//! against the pipeline share the pool through an `Arc` and free
//! themselves on drop, so the pool outlives every set allocated from it.

use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use tracing::{debug, error};

use super::Vulkan;
use super::device::Device;
use crate::backend::DescriptorSetOps;
use crate::descriptor::DescriptorWrite;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{DescriptorKind, DescriptorSetLayoutDesc, LayoutId};

/// Vulkan descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<Device>, desc: &DescriptorSetLayoutDesc) -> RhiResult<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.kind.to_vk())
                    .descriptor_count(1)
                    .stage_flags(b.visibility.to_vk())
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Pool sizes covering `max_sets` sets of any of `layouts`.
pub(crate) fn pool_sizes(
    layouts: &[DescriptorSetLayoutDesc],
    max_sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let kinds = [
        DescriptorKind::UniformBuffer,
        DescriptorKind::DynamicUniformBuffer,
        DescriptorKind::StorageBuffer,
        DescriptorKind::CombinedImageSampler,
    ];

    kinds
        .into_iter()
        .filter_map(|kind| {
            // The widest layout decides how many descriptors of this kind one set may need.
            let per_set = layouts
                .iter()
                .map(|layout| layout.bindings.iter().filter(|b| b.kind == kind).count())
                .max()
                .unwrap_or(0) as u32;
            (per_set > 0).then(|| {
                vk::DescriptorPoolSize::default()
                    .ty(kind.to_vk())
                    .descriptor_count(per_set * max_sets)
            })
        })
        .collect()
}

/// Vulkan descriptor pool shared by the sets of one pipeline.
///
/// Allocation and freeing are serialized by an internal lock that also
/// tracks the number of live sets.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
    live: Mutex<u32>,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
            live: Mutex::new(0),
        })
    }

    /// Allocates one set with `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DescriptorError`] once `max_sets` sets are live.
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if *live >= self.max_sets {
            return Err(RhiError::DescriptorError(format!(
                "descriptor pool exhausted ({} sets)",
                self.max_sets
            )));
        }

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info) }
            .map_err(RhiError::from_vk)?;
        let set = sets
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::DescriptorError("No descriptor set allocated".to_string()))?;

        *live += 1;
        Ok(set)
    }

    /// Returns `set` to the pool. The GPU must no longer reference it.
    pub fn free(&self, set: vk::DescriptorSet) -> RhiResult<()> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        unsafe { self.device.handle().free_descriptor_sets(self.pool, &[set]) }
            .map_err(RhiError::from_vk)?;
        *live = live.saturating_sub(1);
        Ok(())
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    #[inline]
    pub(crate) fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Descriptor set allocated from a pipeline's pool.
pub struct VulkanDescriptorSet {
    pool: Arc<DescriptorPool>,
    set: vk::DescriptorSet,
    layout_id: LayoutId,
    set_index: u32,
    dynamic: bool,
}

impl VulkanDescriptorSet {
    /// Allocates a set and writes its contents.
    ///
    /// `writes` must already be validated against `layout`.
    pub(crate) fn new(
        pool: Arc<DescriptorPool>,
        vk_layout: vk::DescriptorSetLayout,
        layout: &DescriptorSetLayoutDesc,
        layout_id: LayoutId,
        set_index: u32,
        writes: &[DescriptorWrite<'_, Vulkan>],
    ) -> RhiResult<Self> {
        let set = pool.allocate(vk_layout)?;
        let created = Self {
            pool,
            set,
            layout_id,
            set_index,
            dynamic: layout.is_dynamic(),
        };
        update_descriptor_set(created.pool.device(), set, layout, writes);
        debug!(
            "Created descriptor set {} with {} write(s)",
            set_index,
            writes.len()
        );
        Ok(created)
    }
}

impl DescriptorSetOps<Vulkan> for VulkanDescriptorSet {
    fn raw(&self) -> vk::DescriptorSet {
        self.set
    }

    fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    fn layout_id(&self) -> LayoutId {
        self.layout_id
    }

    fn set_index(&self) -> u32 {
        self.set_index
    }
}

impl Drop for VulkanDescriptorSet {
    fn drop(&mut self) {
        if let Err(e) = self.pool.free(self.set) {
            error!("Failed to free descriptor set: {:?}", e);
        }
    }
}

/// Writes buffer ranges and textures into `set`.
fn update_descriptor_set(
    device: &Device,
    set: vk::DescriptorSet,
    layout: &DescriptorSetLayoutDesc,
    writes: &[DescriptorWrite<'_, Vulkan>],
) {
    enum Info {
        Buffer(vk::DescriptorBufferInfo),
        Image(vk::DescriptorImageInfo),
    }

    let infos: Vec<(u32, vk::DescriptorType, Info)> = writes
        .iter()
        .filter_map(|write| {
            let kind = layout.binding(write.binding())?.kind;
            let info = match write {
                DescriptorWrite::Buffer {
                    buffer,
                    offset,
                    range,
                    ..
                } => Info::Buffer(
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer.handle())
                        .offset(*offset)
                        .range(*range),
                ),
                DescriptorWrite::Texture { texture, .. } => Info::Image(
                    vk::DescriptorImageInfo::default()
                        .sampler(texture.sampler())
                        .image_view(texture.view())
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                ),
            };
            Some((write.binding(), kind.to_vk(), info))
        })
        .collect();

    let vk_writes: Vec<vk::WriteDescriptorSet> = infos
        .iter()
        .map(|(binding, ty, info)| {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(*binding)
                .dst_array_element(0)
                .descriptor_type(*ty);
            match info {
                Info::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                Info::Image(info) => write.image_info(std::slice::from_ref(info)),
            }
        })
        .collect();

    unsafe {
        device.handle().update_descriptor_sets(&vk_writes, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DescriptorBinding, ShaderVisibility};

    fn layout(kinds: &[DescriptorKind]) -> DescriptorSetLayoutDesc {
        DescriptorSetLayoutDesc::new(
            kinds
                .iter()
                .enumerate()
                .map(|(i, &kind)| {
                    DescriptorBinding::new(i as u32, kind, ShaderVisibility::VertexFragment)
                })
                .collect(),
        )
    }

    #[test]
    fn test_pool_sizes_scale_with_max_sets() {
        let layouts = [
            layout(&[DescriptorKind::UniformBuffer, DescriptorKind::UniformBuffer]),
            layout(&[
                DescriptorKind::DynamicUniformBuffer,
                DescriptorKind::CombinedImageSampler,
            ]),
        ];
        let sizes = pool_sizes(&layouts, 10);
        assert_eq!(sizes.len(), 3);

        let count = |ty: vk::DescriptorType| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(20));
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC), Some(10));
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(10));
        assert_eq!(count(vk::DescriptorType::STORAGE_BUFFER), None);
    }

    #[test]
    fn test_pool_sizes_empty_layouts() {
        assert!(pool_sizes(&[], 64).is_empty());
    }
}
