//! Window management using winit.
//!
//! This module provides window creation and the raw handles the renderer
//! needs to build a presentation surface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use mango_core::{Error, Result};
use mango_rhi::NativeWindow;

/// Window settings, usually the `[window]` table of the app config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "mango".to_string(),
            resizable: true,
        }
    }
}

/// A window wrapper that provides access to the underlying winit window
/// and the native handles for surface creation.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    /// Create a new window with the given title and dimensions.
    pub fn new(event_loop: &ActiveEventLoop, title: &str, width: u32, height: u32) -> Result<Self> {
        Self::with_config(
            event_loop,
            &WindowConfig {
                title: title.to_string(),
                ..WindowConfig::default()
            },
            width,
            height,
        )
    }

    pub fn with_config(
        event_loop: &ActiveEventLoop,
        config: &WindowConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: '{}' {}x{}", config.title, width, height);

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Get the current width of the window.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get the current height of the window.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Update the stored dimensions (call this when handling resize events).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Raw display and window handles for device creation.
    ///
    /// The window must outlive the device created from them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the platform does not expose the handles.
    pub fn native_window(&self) -> Result<NativeWindow> {
        NativeWindow::from_handles(self.window.as_ref())
            .map_err(|e| Error::Window(format!("Failed to get native handles: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_config_defaults() {
        let config: WindowConfig = mango_core::config::from_toml_str("title = \"demo\"").unwrap();
        assert_eq!(config.title, "demo");
        assert!(config.resizable);
    }
}
