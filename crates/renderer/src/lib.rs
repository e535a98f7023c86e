//! Frame orchestration on top of `mango-rhi`.
//!
//! The [`Renderer`] owns a swapchain and drives the frame loop with a fixed
//! number of frames in flight:
//!
//! - [`config`]: renderer settings, loadable from TOML
//! - [`frame_manager`]: per-slot command buffers, fences and semaphores
//! - [`depth_buffer`]: depth attachment sized to the swapchain
//! - [`frame`]: what a render callback sees of the current frame
//!
//! ```no_run
//! use mango_renderer::{Renderer, RendererConfig};
//!
//! # fn main() -> mango_renderer::Result<()> {
//! let mut renderer = Renderer::new(&RendererConfig::headless(), None)?;
//! renderer.set_render_callback(|frame| {
//!     frame.command_buffer().begin_debug_region("scene", [1.0, 1.0, 1.0, 1.0])?;
//!     frame.command_buffer().end_debug_region()
//! });
//! renderer.render_frame()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod depth_buffer;
pub mod error;
pub mod frame;
pub mod frame_manager;
pub mod renderer;

pub use config::{MAX_SUPPORTED_FRAMES_IN_FLIGHT, RendererConfig};
pub use depth_buffer::DepthBuffer;
pub use error::{RendererError, Result};
pub use frame::FrameContext;
pub use frame_manager::{FrameManager, FrameSlot};
pub use renderer::{RenderCallback, Renderer, RendererStats};
