//! Depth buffer management.
//!
//! The depth attachment shares the swapchain's extent and is rebuilt with
//! it. Its format is chosen once, at renderer construction, by asking the
//! device which entry of the preference list it can actually use as a
//! depth attachment.

use tracing::{debug, info};

use mango_rhi::{Device, Extent2D, Format, RhiResult, Texture, TextureDesc};

/// Depth texture sized to the swapchain.
pub struct DepthBuffer {
    texture: Texture,
    format: Format,
}

impl DepthBuffer {
    /// Creates a depth texture of `extent`.
    pub fn new(device: &Device, format: Format, extent: Extent2D) -> RhiResult<Self> {
        let texture = device.create_texture(&TextureDesc::depth_attachment(format, extent))?;
        debug!("Depth buffer created: {} {:?}", extent, format);
        Ok(Self { texture, format })
    }

    /// Picks the first format in `preference` the device supports.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedFormat`](mango_rhi::RhiError::UnsupportedFormat)
    /// when none qualifies.
    pub fn select_format(device: &Device, preference: &[Format]) -> RhiResult<Format> {
        let format = device.select_depth_format(preference)?;
        info!("Depth format: {:?}", format);
        Ok(format)
    }

    #[inline]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.texture.extent()
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        debug!("Depth buffer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use mango_rhi::headless::HeadlessConfig;
    use mango_rhi::{DeviceDesc, ErrorKind};

    use super::*;

    #[test]
    fn test_select_format_skips_unsupported_entries() {
        let device = Device::new_headless(HeadlessConfig {
            depth_formats: vec![Format::Depth24Stencil8],
            ..HeadlessConfig::default()
        })
        .unwrap();
        let format = DepthBuffer::select_format(
            &device,
            &[Format::Depth32F, Format::Depth24Stencil8, Format::Depth24],
        )
        .unwrap();
        assert_eq!(format, Format::Depth24Stencil8);
    }

    #[test]
    fn test_select_format_fails_without_support() {
        let device = Device::new_headless(HeadlessConfig {
            depth_formats: Vec::new(),
            ..HeadlessConfig::default()
        })
        .unwrap();
        let err = DepthBuffer::select_format(&device, &[Format::Depth32F]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_depth_buffer_matches_extent() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let depth = DepthBuffer::new(&device, Format::Depth32F, Extent2D::new(320, 200)).unwrap();
        assert_eq!(depth.extent(), Extent2D::new(320, 200));
        assert_eq!(depth.format(), Format::Depth32F);
        assert_eq!(depth.texture().format(), Format::Depth32F);
    }
}
