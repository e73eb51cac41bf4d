//! Shader modules.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::device::Device;
use crate::error::{RhiError, RhiResult};

/// Entry point every stage is compiled with.
const ENTRY_POINT: &CStr = c"main";

/// SPIR-V magic number, first word of every module.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Vulkan shader module for one stage.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    /// Creates a module from SPIR-V words.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if `code` is not SPIR-V, or the
    /// Vulkan error from module creation.
    pub fn new(device: Arc<Device>, code: &[u32], stage: vk::ShaderStageFlags) -> RhiResult<Self> {
        validate_spirv(code)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("Created {:?} shader module ({} words)", stage, code.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for pipeline creation; borrows `self`.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {:?} shader module", self.stage);
    }
}

fn validate_spirv(code: &[u32]) -> RhiResult<()> {
    match code.first() {
        None => Err(RhiError::ShaderError("SPIR-V code is empty".to_string())),
        Some(&SPIRV_MAGIC) => Ok(()),
        Some(word) => Err(RhiError::ShaderError(format!(
            "Invalid SPIR-V magic number {:#010x}",
            word
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_spirv() {
        assert!(validate_spirv(&[SPIRV_MAGIC, 0x0001_0600]).is_ok());
        assert!(matches!(validate_spirv(&[]), Err(RhiError::ShaderError(_))));
        assert!(matches!(
            validate_spirv(&[0xdead_beef]),
            Err(RhiError::ShaderError(_))
        ));
    }

    #[test]
    fn test_entry_point() {
        assert_eq!(ENTRY_POINT.to_str().ok(), Some("main"));
    }
}
