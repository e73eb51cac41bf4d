//! Texture descriptions.

use crate::error::{RhiError, RhiResult};
use crate::types::Format;

/// How a texture is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Read by shaders through a combined image sampler.
    Sampled,
    /// Rendered into as a color attachment.
    ColorTarget,
    /// Rendered into as a depth attachment.
    DepthTarget,
}

/// Description of a 2D texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: TextureUsage,
}

impl TextureDesc {
    /// A sampled texture with the given size and format.
    pub fn sampled(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            format,
            usage: TextureUsage::Sampled,
        }
    }

    /// Size of the full texel data in bytes.
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_pixel())
    }

    /// Checks the description and optional initial data.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for zero sizes, format/usage
    /// mismatches, or initial data of the wrong length.
    pub fn validate(&self, data: Option<&[u8]>) -> RhiResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "texture extent {}x{} is empty",
                self.width, self.height
            )));
        }
        let depth_usage = self.usage == TextureUsage::DepthTarget;
        if depth_usage != self.format.is_depth() {
            return Err(RhiError::InvalidHandle(format!(
                "format {:?} cannot be used as {:?}",
                self.format, self.usage
            )));
        }
        if let Some(data) = data {
            if self.usage != TextureUsage::Sampled {
                return Err(RhiError::InvalidHandle(
                    "initial data is only accepted for sampled textures".to_string(),
                ));
            }
            if data.len() as u64 != self.byte_size() {
                return Err(RhiError::InvalidHandle(format!(
                    "texture data is {} bytes, expected {}",
                    data.len(),
                    self.byte_size()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_data_length() {
        let desc = TextureDesc::sampled(2, 2, Format::Rgba8Unorm);
        assert_eq!(desc.byte_size(), 16);
        assert!(desc.validate(Some(&[0; 16])).is_ok());
        assert!(desc.validate(Some(&[0; 15])).is_err());
        assert!(desc.validate(None).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_and_mismatched() {
        assert!(TextureDesc::sampled(0, 2, Format::Rgba8Unorm).validate(None).is_err());

        let depth = TextureDesc {
            width: 4,
            height: 4,
            format: Format::Rgba8Unorm,
            usage: TextureUsage::DepthTarget,
        };
        assert!(depth.validate(None).is_err());

        let target = TextureDesc {
            usage: TextureUsage::ColorTarget,
            ..TextureDesc::sampled(4, 4, Format::Rgba8Unorm)
        };
        assert!(target.validate(Some(&[0; 64])).is_err());
    }
}
