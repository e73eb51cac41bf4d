//! Backend-neutral pipeline descriptions.
//!
//! A [`PipelineDesc`] fully describes an immutable pipeline: shader program,
//! vertex input layout, render-target layout, fixed-function state and the
//! descriptor set layouts. Its [`PipelineKey`] is the structural identity
//! used to share built pipelines; whenever any part of the description
//! changes, a new pipeline is built rather than the old one mutated.
//!
//! # Example
//!
//! ```
//! use prism_rhi::pipeline::{
//!     CullMode, DescriptorBinding, DescriptorKind, DescriptorSetLayoutDesc, PipelineDesc,
//!     RenderTargetLayout, ShaderProgram, ShaderVisibility, VertexAttribute, VertexFormat,
//!     VertexLayout,
//! };
//! use prism_rhi::types::Format;
//!
//! let desc = PipelineDesc::new(
//!     "unlit",
//!     ShaderProgram::glsl("unlit", "void main() {}", "void main() {}"),
//!     RenderTargetLayout::color(Format::Bgra8Srgb),
//! )
//! .with_vertex_layout(VertexLayout::new(
//!     12,
//!     vec![VertexAttribute::new(0, VertexFormat::Float32x3, 0)],
//! ))
//! .with_descriptor_layout(DescriptorSetLayoutDesc::new(vec![DescriptorBinding::new(
//!     0,
//!     DescriptorKind::DynamicUniformBuffer,
//!     ShaderVisibility::Vertex,
//! )]))
//! .with_cull_mode(CullMode::None);
//!
//! assert_eq!(desc.key(), desc.clone().key());
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Format, PrimitiveType};

/// Identity of a built pipeline layout.
///
/// Descriptor sets are created against a pipeline and remember its layout
/// id; binding a set to a pipeline with a different id is a contract
/// violation caught at bind time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutId(u64);

impl LayoutId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Shader stages a descriptor binding is visible to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    Vertex,
    Fragment,
    #[default]
    VertexFragment,
}

/// Kind of resource bound at a descriptor binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    /// Uniform buffer whose offset is supplied per draw.
    DynamicUniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
}

impl DescriptorKind {
    /// Returns true if the binding consumes a dynamic offset.
    #[inline]
    pub fn is_dynamic(self) -> bool {
        matches!(self, DescriptorKind::DynamicUniformBuffer)
    }

    /// Returns true if the binding takes a buffer.
    #[inline]
    pub fn is_buffer(self) -> bool {
        !matches!(self, DescriptorKind::CombinedImageSampler)
    }
}

/// One binding in a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub visibility: ShaderVisibility,
}

impl DescriptorBinding {
    pub fn new(binding: u32, kind: DescriptorKind, visibility: ShaderVisibility) -> Self {
        Self {
            binding,
            kind,
            visibility,
        }
    }
}

/// Layout of one descriptor set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDesc {
    pub fn new(bindings: Vec<DescriptorBinding>) -> Self {
        Self { bindings }
    }

    /// Returns true if any binding in the set is dynamic.
    ///
    /// A dynamic set contributes one dynamic offset when bound.
    pub fn is_dynamic(&self) -> bool {
        self.bindings.iter().any(|b| b.kind.is_dynamic())
    }

    /// Looks up a binding by number.
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

/// Shader code in the form a backend consumes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    /// SPIR-V words, consumed by the Vulkan backend.
    SpirV { vertex: Vec<u32>, fragment: Vec<u32> },
    /// GLSL text, consumed by the OpenGL backend.
    Glsl { vertex: String, fragment: String },
}

/// A vertex + fragment shader pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderProgram {
    pub name: String,
    pub source: ShaderSource,
}

impl ShaderProgram {
    /// Creates a program from SPIR-V words.
    pub fn spirv(name: impl Into<String>, vertex: Vec<u32>, fragment: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            source: ShaderSource::SpirV { vertex, fragment },
        }
    }

    /// Creates a program from SPIR-V bytes (e.g. `include_bytes!` output).
    ///
    /// Returns `None` if the byte length is not a multiple of four.
    pub fn spirv_bytes(name: impl Into<String>, vertex: &[u8], fragment: &[u8]) -> Option<Self> {
        Some(Self::spirv(name, words(vertex)?, words(fragment)?))
    }

    /// Creates a program from GLSL source text.
    pub fn glsl(
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: ShaderSource::Glsl {
                vertex: vertex.into(),
                fragment: fragment.into(),
            },
        }
    }

    /// Stable identity of the program contents.
    pub fn identity(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

fn words(bytes: &[u8]) -> Option<Vec<u32>> {
    if !bytes.len().is_multiple_of(4) {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Format of a single vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Unorm8x4,
}

impl VertexFormat {
    /// Number of components.
    pub fn components(self) -> u32 {
        match self {
            VertexFormat::Float32 => 1,
            VertexFormat::Float32x2 => 2,
            VertexFormat::Float32x3 => 3,
            VertexFormat::Float32x4 | VertexFormat::Unorm8x4 => 4,
        }
    }

    /// Size in bytes.
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Unorm8x4 => 4,
            other => other.components() * 4,
        }
    }
}

/// One attribute read from the vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

impl VertexAttribute {
    pub fn new(location: u32, format: VertexFormat, offset: u32) -> Self {
        Self {
            location,
            format,
            offset,
        }
    }
}

/// Interleaved vertex layout of a single vertex buffer binding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new(stride: u32, attributes: Vec<VertexAttribute>) -> Self {
        Self { stride, attributes }
    }
}

/// Attachment formats a pipeline renders into.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderTargetLayout {
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
}

impl RenderTargetLayout {
    /// A single color attachment without depth.
    pub fn color(format: Format) -> Self {
        Self {
            color_formats: vec![format],
            depth_format: None,
        }
    }

    /// Adds a depth attachment.
    pub fn with_depth(mut self, format: Option<Format>) -> Self {
        self.depth_format = format;
        self
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

/// Winding order of front-facing triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

/// Depth bias parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub slope_factor: f32,
    pub clamp: f32,
}

impl DepthBias {
    fn bits(&self) -> [u32; 3] {
        [
            self.constant_factor.to_bits(),
            self.slope_factor.to_bits(),
            self.clamp.to_bits(),
        ]
    }
}

impl PartialEq for DepthBias {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for DepthBias {}

impl Hash for DepthBias {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Rasterization, depth and blend state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixedFunctionState {
    /// Base primitive class; draws may switch within the class.
    pub topology: PrimitiveType,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub wireframe: bool,
    pub depth_bias: Option<DepthBias>,
    /// Standard alpha blending on every color attachment.
    pub transparency: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            topology: PrimitiveType::Triangles,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            wireframe: false,
            depth_bias: None,
            transparency: false,
            depth_test: true,
            depth_write: true,
        }
    }
}

/// Complete description of an immutable graphics pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub name: String,
    pub shader: ShaderProgram,
    pub vertex_layout: VertexLayout,
    pub target: RenderTargetLayout,
    pub state: FixedFunctionState,
    /// Set layouts in binding order; set `i` is bound at slot `i`.
    pub descriptor_layouts: Vec<DescriptorSetLayoutDesc>,
    /// Upper bound on descriptor sets created against this pipeline.
    pub max_descriptor_sets: u32,
}

impl PipelineDesc {
    /// Default number of descriptor sets a pipeline can hand out.
    pub const DEFAULT_MAX_DESCRIPTOR_SETS: u32 = 64;

    pub fn new(name: impl Into<String>, shader: ShaderProgram, target: RenderTargetLayout) -> Self {
        Self {
            name: name.into(),
            shader,
            vertex_layout: VertexLayout::default(),
            target,
            state: FixedFunctionState::default(),
            descriptor_layouts: Vec::new(),
            max_descriptor_sets: Self::DEFAULT_MAX_DESCRIPTOR_SETS,
        }
    }

    pub fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    pub fn with_descriptor_layout(mut self, layout: DescriptorSetLayoutDesc) -> Self {
        self.descriptor_layouts.push(layout);
        self
    }

    pub fn with_state(mut self, state: FixedFunctionState) -> Self {
        self.state = state;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.state.cull_mode = cull_mode;
        self
    }

    pub fn with_wireframe(mut self, wireframe: bool) -> Self {
        self.state.wireframe = wireframe;
        self
    }

    pub fn with_transparency(mut self, transparency: bool) -> Self {
        self.state.transparency = transparency;
        self
    }

    pub fn with_depth_bias(mut self, bias: DepthBias) -> Self {
        self.state.depth_bias = Some(bias);
        self
    }

    pub fn with_max_descriptor_sets(mut self, max_sets: u32) -> Self {
        self.max_descriptor_sets = max_sets;
        self
    }

    /// Structural key of this description.
    pub fn key(&self) -> PipelineKey {
        PipelineKey {
            shader: self.shader.identity(),
            vertex_layout: self.vertex_layout.clone(),
            target: self.target.clone(),
            state: self.state,
            descriptor_layouts: self.descriptor_layouts.clone(),
        }
    }
}

/// Structural identity of a pipeline.
///
/// Two descriptions with equal keys may share one built pipeline object.
/// The pipeline name is deliberately not part of the key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: u64,
    pub vertex_layout: VertexLayout,
    pub target: RenderTargetLayout,
    pub state: FixedFunctionState,
    pub descriptor_layouts: Vec<DescriptorSetLayoutDesc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> PipelineDesc {
        PipelineDesc::new(
            "test",
            ShaderProgram::glsl("test", "vs", "fs"),
            RenderTargetLayout::color(Format::Bgra8Srgb),
        )
    }

    #[test]
    fn test_key_ignores_name() {
        let mut other = desc();
        other.name = "renamed".to_string();
        assert_eq!(desc().key(), other.key());
    }

    #[test]
    fn test_key_changes_with_state() {
        assert_ne!(desc().key(), desc().with_wireframe(true).key());
        assert_ne!(desc().key(), desc().with_cull_mode(CullMode::Front).key());
        assert_ne!(desc().key(), desc().with_transparency(true).key());
    }

    #[test]
    fn test_key_changes_with_target_format() {
        let mut other = desc();
        other.target = RenderTargetLayout::color(Format::Bgra8Unorm);
        assert_ne!(desc().key(), other.key());
    }

    #[test]
    fn test_key_changes_with_shader() {
        let mut other = desc();
        other.shader = ShaderProgram::glsl("test", "vs2", "fs");
        assert_ne!(desc().key(), other.key());
    }

    #[test]
    fn test_depth_bias_equality_by_bits() {
        let a = DepthBias {
            constant_factor: 1.25,
            slope_factor: 1.75,
            clamp: 0.0,
        };
        assert_eq!(desc().with_depth_bias(a).key(), desc().with_depth_bias(a).key());
        assert_ne!(desc().key(), desc().with_depth_bias(a).key());
    }

    #[test]
    fn test_layout_ids_are_unique() {
        assert_ne!(LayoutId::next(), LayoutId::next());
    }

    #[test]
    fn test_dynamic_layout_detection() {
        let layout = DescriptorSetLayoutDesc::new(vec![
            DescriptorBinding::new(0, DescriptorKind::UniformBuffer, ShaderVisibility::Vertex),
            DescriptorBinding::new(
                1,
                DescriptorKind::DynamicUniformBuffer,
                ShaderVisibility::Vertex,
            ),
        ]);
        assert!(layout.is_dynamic());
        assert!(layout.binding(1).is_some());
        assert!(layout.binding(2).is_none());
        assert!(!DescriptorSetLayoutDesc::default().is_dynamic());
    }

    #[test]
    fn test_spirv_bytes_alignment() {
        assert!(ShaderProgram::spirv_bytes("s", &[0; 8], &[0; 4]).is_some());
        assert!(ShaderProgram::spirv_bytes("s", &[0; 7], &[0; 4]).is_none());
    }

    #[test]
    fn test_vertex_format_sizes() {
        assert_eq!(VertexFormat::Float32x3.size(), 12);
        assert_eq!(VertexFormat::Unorm8x4.size(), 4);
        assert_eq!(VertexFormat::Unorm8x4.components(), 4);
    }
}
