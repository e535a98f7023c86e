//! Renderer error type.

use thiserror::Error;

use mango_rhi::RhiError;

/// Errors raised while building or driving a [`Renderer`](crate::Renderer).
#[derive(Error, Debug)]
pub enum RendererError {
    /// A GPU object could not be created or used
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Loading configuration or other core plumbing failed
    #[error(transparent)]
    Core(#[from] mango_core::Error),

    /// The renderer configuration is unusable
    #[error("Renderer configuration error: {0}")]
    Config(String),
}

/// Result type alias using [`RendererError`].
pub type Result<T> = std::result::Result<T, RendererError>;
