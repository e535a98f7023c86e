//! Renderer configuration.
//!
//! [`RendererConfig`] is deserialized from the `[renderer]` table of the
//! application's TOML file (see [`mango_core::config`]). Every field has a
//! default, so an empty table is valid.

use serde::{Deserialize, Serialize};

use mango_rhi::{Backend, DeviceDesc, Format};

use crate::error::{RendererError, Result};

/// Upper bound accepted for [`RendererConfig::max_frames_in_flight`].
pub const MAX_SUPPORTED_FRAMES_IN_FLIGHT: usize = 4;

/// Depth formats tried in order when the config does not name any.
pub const DEFAULT_DEPTH_FORMATS: [Format; 4] = [
    Format::Depth32F,
    Format::Depth24Stencil8,
    Format::Depth32FStencil8,
    Format::Depth24,
];

/// Settings the renderer is constructed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub backend: Backend,
    pub app_name: String,
    /// Initial framebuffer size; the swapchain may clamp it.
    pub width: u32,
    pub height: u32,
    pub enable_validation: bool,
    pub enable_vsync: bool,
    pub max_frames_in_flight: usize,
    pub clear_color: [f32; 4],
    /// First entry the device supports as a depth attachment wins.
    pub depth_format_preference: Vec<Format>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            app_name: "mango".to_string(),
            width: 1280,
            height: 720,
            enable_validation: cfg!(debug_assertions),
            enable_vsync: true,
            max_frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_format_preference: DEFAULT_DEPTH_FORMATS.to_vec(),
        }
    }
}

impl RendererConfig {
    /// Configuration for the CPU-simulated backend.
    pub fn headless() -> Self {
        Self {
            backend: Backend::Headless,
            enable_validation: false,
            ..Self::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.enable_vsync = vsync;
        self
    }

    /// Checks the values that would make construction fail later.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::Config`] for zero or too many frames in
    /// flight, a zero-sized framebuffer, or an empty depth preference list.
    pub fn validate(&self) -> Result<()> {
        if self.max_frames_in_flight == 0 {
            return Err(RendererError::Config(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.max_frames_in_flight > MAX_SUPPORTED_FRAMES_IN_FLIGHT {
            return Err(RendererError::Config(format!(
                "max_frames_in_flight is {}, at most {} is supported",
                self.max_frames_in_flight, MAX_SUPPORTED_FRAMES_IN_FLIGHT
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RendererError::Config(format!(
                "framebuffer size {}x{} has a zero dimension",
                self.width, self.height
            )));
        }
        if self.depth_format_preference.is_empty() {
            return Err(RendererError::Config(
                "depth_format_preference is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Swapchain image count: triple buffering with vsync, double without.
    pub fn swapchain_image_count(&self) -> u32 {
        if self.enable_vsync { 3 } else { 2 }
    }

    pub fn device_desc(&self) -> DeviceDesc {
        DeviceDesc {
            backend: self.backend,
            enable_validation: self.enable_validation,
            app_name: self.app_name.clone(),
            ..DeviceDesc::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        RendererConfig::default().validate().unwrap();
        RendererConfig::headless().validate().unwrap();
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        let zero = RendererConfig::headless().with_frames_in_flight(0);
        assert!(matches!(zero.validate(), Err(RendererError::Config(_))));

        let max = RendererConfig::headless().with_frames_in_flight(MAX_SUPPORTED_FRAMES_IN_FLIGHT);
        max.validate().unwrap();

        let too_many =
            RendererConfig::headless().with_frames_in_flight(MAX_SUPPORTED_FRAMES_IN_FLIGHT + 1);
        assert!(matches!(too_many.validate(), Err(RendererError::Config(_))));
    }

    #[test]
    fn test_zero_sized_framebuffer_is_rejected() {
        let config = RendererConfig::headless().with_size(0, 720);
        assert!(matches!(config.validate(), Err(RendererError::Config(_))));
    }

    #[test]
    fn test_empty_depth_preference_is_rejected() {
        let config = RendererConfig {
            depth_format_preference: Vec::new(),
            ..RendererConfig::headless()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_image_count_follows_vsync() {
        assert_eq!(RendererConfig::headless().swapchain_image_count(), 3);
        assert_eq!(
            RendererConfig::headless().with_vsync(false).swapchain_image_count(),
            2
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RendererConfig = mango_core::config::from_toml_str(
            r#"
                backend = "headless"
                width = 800
                max_frames_in_flight = 3
                depth_format_preference = ["depth24_stencil8"]
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Headless);
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 720);
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.depth_format_preference, vec![Format::Depth24Stencil8]);
        assert!(config.enable_vsync);
    }

    #[test]
    fn test_device_desc_carries_backend_and_validation() {
        let desc = RendererConfig::headless().device_desc();
        assert_eq!(desc.backend, Backend::Headless);
        assert!(!desc.enable_validation);
        assert_eq!(desc.app_name, "mango");
    }
}
