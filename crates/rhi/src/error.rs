//! RHI-specific error types.
//!
//! Every failure the hardware abstraction can report is a variant of
//! [`RhiError`]. Callers that only care about the broad failure class
//! (fatal configuration problem, transient presentation state, caller bug)
//! should match on [`RhiError::kind`] instead of individual variants.

use thiserror::Error;
use tracing::error;

use crate::types::Backend;

/// Broad classification of an [`RhiError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing window, unsupported backend or format, zero-sized framebuffer.
    /// Fatal at construction.
    Configuration,
    /// Swapchain out of date or suboptimal. Recovered by recreation.
    TransientPresentation,
    /// The caller used an object in a state that does not permit the call.
    /// The call had no effect.
    ProtocolViolation,
    /// Allocation or object creation failed.
    ResourceCreation,
    /// A fence or semaphore wait expired.
    Timeout,
    /// The device or driver failed in a way the caller cannot repair.
    Device,
}

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[cfg(feature = "vulkan")]
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[cfg(feature = "vulkan")]
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[cfg(feature = "vulkan")]
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The requested backend was not compiled into this build.
    #[error("Backend {0:?} is not available in this build")]
    BackendUnavailable(Backend),

    /// Two objects from different backends were combined in one call.
    #[error("Backend mismatch: expected {expected:?}, found {found:?}")]
    BackendMismatch { expected: Backend, found: Backend },

    /// A backend that presents to a window was created without one.
    #[error("A native window is required for this backend")]
    MissingWindow,

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    Surface(String),

    /// No candidate format is supported by the device.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A description passed to a factory is malformed.
    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    /// Resource creation error
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// Shader module error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// The swapchain no longer matches the surface and must be recreated.
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// An operation was called in a state that forbids it.
    #[error("Protocol violation in {operation}: {detail}")]
    ProtocolViolation {
        operation: &'static str,
        detail: String,
    },

    /// A barrier referenced a resource kind that has no state.
    #[error("Unsupported resource in barrier: {0}")]
    UnsupportedResource(&'static str),

    /// A command buffer handle outlived its slot.
    #[error("Stale command buffer handle (index {index}, generation {generation})")]
    StaleHandle { index: u32, generation: u32 },

    /// A fence or semaphore wait expired before the value was reached.
    #[error("Wait timed out")]
    Timeout,

    /// The feature exists in the API but is not provided by this build or device.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The device was lost.
    #[error("Device lost")]
    DeviceLost,
}

impl RhiError {
    /// Builds a [`RhiError::ProtocolViolation`] and logs it at error level.
    pub(crate) fn protocol_violation(operation: &'static str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        error!("Protocol violation in {}: {}", operation, detail);
        RhiError::ProtocolViolation { operation, detail }
    }

    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            #[cfg(feature = "vulkan")]
            RhiError::Vulkan(result) => match *result {
                ash::vk::Result::ERROR_OUT_OF_DATE_KHR | ash::vk::Result::SUBOPTIMAL_KHR => {
                    ErrorKind::TransientPresentation
                }
                ash::vk::Result::TIMEOUT => ErrorKind::Timeout,
                ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY
                | ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                | ash::vk::Result::ERROR_FRAGMENTED_POOL
                | ash::vk::Result::ERROR_OUT_OF_POOL_MEMORY => ErrorKind::ResourceCreation,
                ash::vk::Result::ERROR_FORMAT_NOT_SUPPORTED
                | ash::vk::Result::ERROR_FEATURE_NOT_PRESENT
                | ash::vk::Result::ERROR_EXTENSION_NOT_PRESENT
                | ash::vk::Result::ERROR_INCOMPATIBLE_DRIVER => ErrorKind::Configuration,
                _ => ErrorKind::Device,
            },
            #[cfg(feature = "vulkan")]
            RhiError::Loading(_) => ErrorKind::Configuration,
            #[cfg(feature = "vulkan")]
            RhiError::Allocator(_) => ErrorKind::ResourceCreation,
            RhiError::NoSuitableGpu
            | RhiError::BackendUnavailable(_)
            | RhiError::MissingWindow
            | RhiError::Surface(_)
            | RhiError::UnsupportedFormat(_)
            | RhiError::InvalidDescription(_)
            | RhiError::NotSupported(_) => ErrorKind::Configuration,
            RhiError::BackendMismatch { .. }
            | RhiError::ProtocolViolation { .. }
            | RhiError::UnsupportedResource(_)
            | RhiError::StaleHandle { .. } => ErrorKind::ProtocolViolation,
            RhiError::ResourceCreation(_)
            | RhiError::Shader(_)
            | RhiError::Pipeline(_)
            | RhiError::Swapchain(_) => ErrorKind::ResourceCreation,
            RhiError::SwapchainOutOfDate => ErrorKind::TransientPresentation,
            RhiError::Timeout => ErrorKind::Timeout,
            RhiError::DeviceLost => ErrorKind::Device,
        }
    }

    /// Returns true when the error only asks for swapchain recreation.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientPresentation
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            RhiError::SwapchainOutOfDate.kind(),
            ErrorKind::TransientPresentation
        );
        assert!(RhiError::SwapchainOutOfDate.is_transient());
        assert_eq!(RhiError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(RhiError::MissingWindow.kind(), ErrorKind::Configuration);
        assert_eq!(
            RhiError::StaleHandle {
                index: 0,
                generation: 1
            }
            .kind(),
            ErrorKind::ProtocolViolation
        );
        assert_eq!(
            RhiError::UnsupportedResource("sampler").kind(),
            ErrorKind::ProtocolViolation
        );
        assert_eq!(
            RhiError::ResourceCreation("oom".into()).kind(),
            ErrorKind::ResourceCreation
        );
    }

    #[test]
    fn test_protocol_violation_message() {
        let err = RhiError::protocol_violation("end", "not recording");
        assert_eq!(err.to_string(), "Protocol violation in end: not recording");
        assert!(!err.is_transient());
    }

    #[cfg(feature = "vulkan")]
    #[test]
    fn test_vulkan_result_kinds() {
        use ash::vk;
        assert_eq!(
            RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).kind(),
            ErrorKind::TransientPresentation
        );
        assert_eq!(
            RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).kind(),
            ErrorKind::ResourceCreation
        );
        assert_eq!(
            RhiError::from(vk::Result::ERROR_DEVICE_LOST).kind(),
            ErrorKind::Device
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RhiError>();
    }
}
