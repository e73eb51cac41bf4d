//! RHI-specific error types.

use prism_core::RenderApi;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// OpenGL call failed
    #[error("OpenGL error: {0}")]
    GlError(String),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The surface offers no usable format or present mode
    #[error("Unsupported surface: {0}")]
    UnsupportedSurface(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Shader compilation error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Descriptor set creation or update error
    #[error("Descriptor error: {0}")]
    DescriptorError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Synchronization object misuse reported by the backend
    #[error("Synchronization error: {0}")]
    SyncError(String),

    /// A bounded wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The device was lost and cannot produce further frames
    #[error("Device lost")]
    DeviceLost,

    /// A context for a different API is already active in this process
    #[error("Render API {requested} requested while {active} is active")]
    BackendMismatch {
        /// API currently holding the process-wide slot.
        active: RenderApi,
        /// API that was requested.
        requested: RenderApi,
    },

    /// Invalid configuration passed to the RHI
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl RhiError {
    /// Returns true for errors after which the device cannot be trusted to
    /// produce further frames.
    pub fn is_fatal(&self) -> bool {
        match self {
            RhiError::DeviceLost => true,
            RhiError::VulkanError(result) => matches!(
                *result,
                ash::vk::Result::ERROR_DEVICE_LOST
                    | ash::vk::Result::ERROR_SURFACE_LOST_KHR
                    | ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ),
            RhiError::GlError(_) | RhiError::SyncError(_) | RhiError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Maps a raw Vulkan result, folding device loss into [`RhiError::DeviceLost`].
    pub(crate) fn from_vk(result: ash::vk::Result) -> Self {
        match result {
            ash::vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            other => RhiError::VulkanError(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_device_lost_is_fatal() {
        assert!(RhiError::DeviceLost.is_fatal());
        assert!(RhiError::from_vk(vk::Result::ERROR_DEVICE_LOST).is_fatal());
        assert!(matches!(
            RhiError::from_vk(vk::Result::ERROR_DEVICE_LOST),
            RhiError::DeviceLost
        ));
    }

    #[test]
    fn test_configuration_errors_are_not_fatal() {
        assert!(!RhiError::UnsupportedSurface("no formats".into()).is_fatal());
        assert!(!RhiError::PipelineError("bad".into()).is_fatal());
    }

    #[test]
    fn test_backend_mismatch_message() {
        let err = RhiError::BackendMismatch {
            active: RenderApi::Vulkan,
            requested: RenderApi::OpenGl,
        };
        assert_eq!(
            err.to_string(),
            "Render API opengl requested while vulkan is active"
        );
    }
}
