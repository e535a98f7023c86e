//! Core utilities shared by the mango renderer crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - TOML configuration loading

pub mod config;
mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::{init_logging, try_init_logging};
pub use timer::Timer;
