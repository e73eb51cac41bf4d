//! Descriptor set contents.

use crate::backend::Backend;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{DescriptorKind, DescriptorSetLayoutDesc};

/// One resource written into a descriptor set at creation.
pub enum DescriptorWrite<'a, B: Backend> {
    /// A buffer range. For dynamic bindings `offset` is the base to which
    /// the per-draw dynamic offset is added.
    Buffer {
        binding: u32,
        buffer: &'a B::Buffer,
        offset: u64,
        range: u64,
    },
    /// A sampled texture.
    Texture { binding: u32, texture: &'a B::Texture },
}

impl<B: Backend> DescriptorWrite<'_, B> {
    /// Binding number written.
    pub fn binding(&self) -> u32 {
        match self {
            DescriptorWrite::Buffer { binding, .. } | DescriptorWrite::Texture { binding, .. } => {
                *binding
            }
        }
    }
}

/// Checks `writes` against `layout`.
///
/// Every write must target a binding that exists, with a resource of the
/// matching kind, and no binding may be written twice.
///
/// # Errors
///
/// Returns [`RhiError::DescriptorError`] describing the first mismatch.
pub fn validate_writes<B: Backend>(
    layout: &DescriptorSetLayoutDesc,
    writes: &[DescriptorWrite<'_, B>],
) -> RhiResult<()> {
    for (i, write) in writes.iter().enumerate() {
        let binding = write.binding();
        let Some(slot) = layout.binding(binding) else {
            return Err(RhiError::DescriptorError(format!(
                "binding {} is not part of the set layout",
                binding
            )));
        };

        let compatible = match write {
            DescriptorWrite::Buffer { range, .. } => slot.kind.is_buffer() && *range > 0,
            DescriptorWrite::Texture { .. } => slot.kind == DescriptorKind::CombinedImageSampler,
        };
        if !compatible {
            return Err(RhiError::DescriptorError(format!(
                "write to binding {} does not match its {:?} layout",
                binding, slot.kind
            )));
        }

        if writes[..i].iter().any(|w| w.binding() == binding) {
            return Err(RhiError::DescriptorError(format!(
                "binding {} written twice",
                binding
            )));
        }
    }
    Ok(())
}
