//! Pipeline and descriptor set binding.
//!
//! [`DescriptorBinder`] turns the sets a drawable wants bound into a single
//! backend bind call. [`PipelineCache`] shares built pipelines between
//! structurally identical descriptions.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use prism_rhi::pipeline::{PipelineDesc, PipelineKey, RenderTargetLayout};
use prism_rhi::{Backend, CommandBuffer, DescriptorSetOps, GraphicsDevice, PipelineOps, RhiResult};

/// Most descriptor sets one bind call can carry.
pub const MAX_BOUND_DESCRIPTOR_SETS: usize = 16;

/// What a [`DescriptorBinder::bind`] call issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindSummary {
    /// Set handles passed to the backend.
    pub sets: usize,
    /// Dynamic offsets passed to the backend, one per dynamic set.
    pub dynamic_sets: usize,
}

/// Binds descriptor sets contiguously from slot 0.
///
/// The binder keeps fixed-capacity scratch arrays that are refilled on
/// every call, so binding never allocates. It is not reentrant: one binder
/// serves one recording thread.
pub struct DescriptorBinder<B: Backend> {
    raw_sets: [B::RawDescriptorSet; MAX_BOUND_DESCRIPTOR_SETS],
    dynamic_offsets: [u32; MAX_BOUND_DESCRIPTOR_SETS],
}

impl<B: Backend> DescriptorBinder<B> {
    pub fn new() -> Self {
        Self {
            raw_sets: [B::RawDescriptorSet::default(); MAX_BOUND_DESCRIPTOR_SETS],
            dynamic_offsets: [0; MAX_BOUND_DESCRIPTOR_SETS],
        }
    }

    /// Records one bind of `sets` at slots `0..sets.len()`.
    ///
    /// Every dynamic set consumes `dynamic_offset`, in set order. An empty
    /// `sets` records nothing.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_BOUND_DESCRIPTOR_SETS`] sets are given, if
    /// a set was created for a different pipeline layout, or if a set's
    /// index does not match its position in `sets`.
    pub fn bind(
        &mut self,
        cmd: &mut CommandBuffer<B>,
        pipeline: &B::Pipeline,
        dynamic_offset: u32,
        sets: &[&B::DescriptorSet],
    ) -> BindSummary {
        assert!(
            sets.len() <= MAX_BOUND_DESCRIPTOR_SETS,
            "{} descriptor sets exceed the limit of {}",
            sets.len(),
            MAX_BOUND_DESCRIPTOR_SETS
        );
        if sets.is_empty() {
            return BindSummary::default();
        }

        let layout = pipeline.layout_id();
        let mut dynamic_sets = 0;
        for (slot, set) in sets.iter().enumerate() {
            assert_eq!(
                set.layout_id(),
                layout,
                "descriptor set {} was not created for pipeline '{}'",
                slot,
                pipeline.name()
            );
            assert_eq!(
                set.set_index() as usize,
                slot,
                "descriptor set for slot {} bound at slot {}",
                set.set_index(),
                slot
            );

            self.raw_sets[slot] = set.raw();
            if set.is_dynamic() {
                self.dynamic_offsets[dynamic_sets] = dynamic_offset;
                dynamic_sets += 1;
            }
        }

        cmd.bind_descriptor_sets(
            pipeline,
            0,
            &self.raw_sets[..sets.len()],
            &self.dynamic_offsets[..dynamic_sets],
        );
        trace!(
            "Bound {} descriptor sets ({} dynamic) for '{}'",
            sets.len(),
            dynamic_sets,
            pipeline.name()
        );

        BindSummary {
            sets: sets.len(),
            dynamic_sets,
        }
    }
}

impl<B: Backend> Default for DescriptorBinder<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Built pipelines keyed by their structural description.
pub struct PipelineCache<B: Backend> {
    pipelines: HashMap<PipelineKey, Arc<B::Pipeline>>,
}

impl<B: Backend> PipelineCache<B> {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
        }
    }

    /// Returns the pipeline for `desc`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the pipeline cannot be built; nothing
    /// is cached in that case.
    pub fn get_or_create(
        &mut self,
        device: &B::Device,
        desc: &PipelineDesc,
    ) -> RhiResult<Arc<B::Pipeline>> {
        let key = desc.key();
        if let Some(pipeline) = self.pipelines.get(&key) {
            trace!("Pipeline cache hit for '{}'", desc.name);
            return Ok(Arc::clone(pipeline));
        }

        let pipeline = Arc::new(device.create_pipeline(desc)?);
        debug!(
            "Pipeline cache miss for '{}' ({} cached)",
            desc.name,
            self.pipelines.len() + 1
        );
        self.pipelines.insert(key, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Drops every pipeline built for a render target other than `current`.
    ///
    /// Returns how many were dropped. Pipelines still referenced elsewhere
    /// stay alive until their last user drops them.
    pub fn invalidate_target(&mut self, current: &RenderTargetLayout) -> usize {
        let before = self.pipelines.len();
        self.pipelines.retain(|key, _| &key.target == current);
        let dropped = before - self.pipelines.len();
        if dropped > 0 {
            debug!("Dropped {} pipelines built for another render target", dropped);
        }
        dropped
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }
}

impl<B: Backend> Default for PipelineCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::descriptor::DescriptorWrite;
    use prism_rhi::headless::{Headless, HeadlessConfig, HeadlessDevice, RecordedCommand};
    use prism_rhi::pipeline::{
        DescriptorBinding, DescriptorKind, DescriptorSetLayoutDesc, ShaderProgram,
        ShaderVisibility,
    };
    use prism_rhi::types::Format;

    fn layout(kind: DescriptorKind) -> DescriptorSetLayoutDesc {
        DescriptorSetLayoutDesc::new(vec![DescriptorBinding::new(
            0,
            kind,
            ShaderVisibility::VertexFragment,
        )])
    }

    fn desc(kinds: &[DescriptorKind]) -> PipelineDesc {
        let mut desc = PipelineDesc::new(
            "binder",
            ShaderProgram::glsl("binder", "vs", "fs"),
            RenderTargetLayout::color(Format::Bgra8Srgb),
        );
        for &kind in kinds {
            desc = desc.with_descriptor_layout(layout(kind));
        }
        desc
    }

    fn recording() -> CommandBuffer<Headless> {
        let mut cmd = CommandBuffer::new(Default::default());
        cmd.begin_recording().unwrap();
        cmd
    }

    #[test]
    fn test_bind_counts_dynamic_sets() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let kinds = [
            DescriptorKind::DynamicUniformBuffer,
            DescriptorKind::UniformBuffer,
            DescriptorKind::DynamicUniformBuffer,
        ];
        let pipeline = device.create_pipeline(&desc(&kinds)).unwrap();
        let buffer = device
            .create_buffer(&prism_rhi::buffer::BufferDesc::new(
                prism_rhi::buffer::BufferUsage::Uniform,
                256,
            ))
            .unwrap();
        let sets: Vec<_> = (0..3)
            .map(|i| {
                let write = DescriptorWrite::Buffer {
                    binding: 0,
                    buffer: &buffer,
                    offset: 0,
                    range: 64,
                };
                device.create_descriptor_set(&pipeline, i, &[write]).unwrap()
            })
            .collect();
        let refs: Vec<_> = sets.iter().collect();

        let mut cmd = recording();
        let mut binder = DescriptorBinder::<Headless>::new();
        let summary = binder.bind(&mut cmd, &pipeline, 128, &refs);
        assert_eq!(
            summary,
            BindSummary {
                sets: 3,
                dynamic_sets: 2
            }
        );

        let binds: Vec<_> = cmd
            .raw()
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BindDescriptorSets {
                    first_set,
                    sets,
                    dynamic_offsets,
                } => Some((*first_set, sets.len(), dynamic_offsets.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(binds, vec![(0, 3, vec![128, 128])]);
    }

    #[test]
    fn test_bind_nothing() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let pipeline = device.create_pipeline(&desc(&[])).unwrap();
        let mut cmd = recording();
        let summary = DescriptorBinder::<Headless>::new().bind(&mut cmd, &pipeline, 0, &[]);
        assert_eq!(summary, BindSummary::default());
        assert!(cmd.raw().commands().is_empty());
    }

    #[test]
    #[should_panic(expected = "was not created for pipeline")]
    fn test_bind_rejects_foreign_set() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let kinds = [DescriptorKind::CombinedImageSampler];
        let a = device.create_pipeline(&desc(&kinds)).unwrap();
        let b = device.create_pipeline(&desc(&kinds)).unwrap();
        let texture = device
            .create_texture(
                &prism_rhi::texture::TextureDesc::sampled(1, 1, Format::Rgba8Unorm),
                None,
            )
            .unwrap();
        let set = device
            .create_descriptor_set(
                &b,
                0,
                &[DescriptorWrite::Texture {
                    binding: 0,
                    texture: &texture,
                }],
            )
            .unwrap();

        let mut cmd = recording();
        DescriptorBinder::<Headless>::new().bind(&mut cmd, &a, 0, &[&set]);
    }

    #[test]
    fn test_cache_shares_identical_pipelines() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let mut cache = PipelineCache::<Headless>::new();

        let first = cache.get_or_create(&device, &desc(&[])).unwrap();
        let mut renamed = desc(&[]);
        renamed.name = "other name".to_string();
        let second = cache.get_or_create(&device, &renamed).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let third = cache
            .get_or_create(&device, &desc(&[]).with_wireframe(true))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_invalidate_target() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let mut cache = PipelineCache::<Headless>::new();
        cache.get_or_create(&device, &desc(&[])).unwrap();

        let unchanged = RenderTargetLayout::color(Format::Bgra8Srgb);
        assert_eq!(cache.invalidate_target(&unchanged), 0);

        let changed = RenderTargetLayout::color(Format::Bgra8Unorm);
        assert_eq!(cache.invalidate_target(&changed), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_does_not_store_failures() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let mut cache = PipelineCache::<Headless>::new();
        let mut broken = desc(&[]);
        broken.target.color_formats.clear();
        assert!(cache.get_or_create(&device, &broken).is_err());
        assert!(cache.is_empty());
    }
}
