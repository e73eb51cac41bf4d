//! GPU buffer descriptions.

/// Buffer usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Uniform buffer - stores shader uniform data
    Uniform,
    /// Storage buffer - general-purpose GPU storage
    Storage,
    /// Staging buffer for CPU to GPU transfers
    Staging,
}

impl BufferUsage {
    /// Get a human-readable name for this usage type.
    pub fn name(&self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }

    /// Returns true if the buffer lives in CPU-visible memory and can be
    /// written directly. Storage buffers are GPU-only and are filled through
    /// a staging copy.
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, BufferUsage::Storage)
    }
}

/// Description of a buffer to create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub usage: BufferUsage,
    /// Size in bytes; must be non-zero.
    pub size: u64,
}

impl BufferDesc {
    pub fn new(usage: BufferUsage, size: u64) -> Self {
        Self { usage, size }
    }

    /// Checks that a write of `len` bytes at `offset` fits.
    pub fn contains(&self, offset: u64, len: usize) -> bool {
        offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_names() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Staging.name(), "staging");
    }

    #[test]
    fn test_host_visibility() {
        assert!(BufferUsage::Uniform.is_host_visible());
        assert!(BufferUsage::Vertex.is_host_visible());
        assert!(!BufferUsage::Storage.is_host_visible());
    }

    #[test]
    fn test_contains() {
        let desc = BufferDesc::new(BufferUsage::Uniform, 256);
        assert!(desc.contains(0, 256));
        assert!(desc.contains(128, 128));
        assert!(!desc.contains(128, 129));
        assert!(!desc.contains(u64::MAX, 1));
    }
}
