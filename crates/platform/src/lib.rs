//! Platform layer for the mango renderer.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - Raw window handles for surface creation

mod window;

pub use window::{Window, WindowConfig};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
