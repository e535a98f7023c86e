//! Render hardware interface.
//!
//! This crate provides a device-agnostic layer over an explicit graphics
//! API. It handles:
//! - Resource states and barriers
//! - Fences and semaphores
//! - Command buffer recording, command pools and queues
//! - Swapchain acquire/present and recreation
//! - A [`Device`] that creates every other object
//!
//! Every object wraps a closed enum with one variant per compiled backend.
//! `vulkan` (through `ash`) is enabled by the default feature; `headless` is
//! a CPU-simulated device that is always compiled and drives the tests.
//!
//! # Example
//!
//! ```
//! use mango_rhi::{CommandBufferLevel, CommandPoolFlags, Device, DeviceDesc, QueueType};
//!
//! # fn main() -> Result<(), mango_rhi::RhiError> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let mut pool = device.create_command_pool(QueueType::Graphics, CommandPoolFlags::RESET_COMMAND_BUFFER)?;
//! let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary)?;
//!
//! let cmd = pool.get_mut(handle)?;
//! cmd.begin()?;
//! cmd.end()?;
//!
//! let mut queue = device.create_command_queue(QueueType::Graphics)?;
//! let fence = device.create_fence(false)?;
//! let id = queue.submit(&mut [pool.get_mut(handle)?.into()], Some(&fence))?;
//! fence.wait(id.fence_value.unwrap_or(1), None)?;
//! # Ok(())
//! # }
//! ```

/// Declares the per-backend storage enum of a front-end object together with
/// checked accessors that unwrap one backend or report a mismatch.
macro_rules! backend_inner {
    ($(#[$meta:meta])* $name:ident { vulkan: $vk:ty, headless: $hl:ty $(,)? }) => {
        $(#[$meta])*
        pub(crate) enum $name {
            #[cfg(feature = "vulkan")]
            Vulkan($vk),
            Headless($hl),
        }

        #[allow(dead_code, unreachable_patterns)]
        impl $name {
            pub(crate) fn backend(&self) -> $crate::types::Backend {
                match self {
                    #[cfg(feature = "vulkan")]
                    Self::Vulkan(_) => $crate::types::Backend::Vulkan,
                    Self::Headless(_) => $crate::types::Backend::Headless,
                }
            }

            #[cfg(feature = "vulkan")]
            pub(crate) fn as_vulkan(&self) -> $crate::error::RhiResult<&$vk> {
                match self {
                    Self::Vulkan(inner) => Ok(inner),
                    other => Err($crate::error::RhiError::BackendMismatch {
                        expected: $crate::types::Backend::Vulkan,
                        found: other.backend(),
                    }),
                }
            }

            #[cfg(feature = "vulkan")]
            pub(crate) fn as_vulkan_mut(&mut self) -> $crate::error::RhiResult<&mut $vk> {
                let found = self.backend();
                match self {
                    Self::Vulkan(inner) => Ok(inner),
                    _ => Err($crate::error::RhiError::BackendMismatch {
                        expected: $crate::types::Backend::Vulkan,
                        found,
                    }),
                }
            }

            pub(crate) fn as_headless(&self) -> $crate::error::RhiResult<&$hl> {
                match self {
                    Self::Headless(inner) => Ok(inner),
                    other => Err($crate::error::RhiError::BackendMismatch {
                        expected: $crate::types::Backend::Headless,
                        found: other.backend(),
                    }),
                }
            }

            pub(crate) fn as_headless_mut(&mut self) -> $crate::error::RhiResult<&mut $hl> {
                let found = self.backend();
                match self {
                    Self::Headless(inner) => Ok(inner),
                    _ => Err($crate::error::RhiError::BackendMismatch {
                        expected: $crate::types::Backend::Headless,
                        found,
                    }),
                }
            }
        }
    };
}

mod error;

pub mod barrier;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod queue;
pub mod resource;
pub mod swapchain;
pub mod sync;
pub mod types;

#[cfg(feature = "vulkan")]
mod vulkan;

pub use barrier::{
    AccessFlags, Barrier, BarrierBatch, BarrierResource, ImageAspect, ImageLayout, MaskOverride,
    PipelineStages, QueueTransfer, ResolvedBarriers, ResourceState, SubresourceRange,
};
pub use command::{
    BeginInfo, BufferCopy, BufferTextureCopy, CommandBuffer, CommandBufferHandle,
    CommandBufferState, CommandPool, CommandPoolFlags, RenderPassInheritance,
};
pub use descriptor::{
    DescriptorBinding, DescriptorResource, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutDesc, DescriptorType, DescriptorWrite,
};
pub use device::{
    Device, DeviceDesc, NativeWindow, QueueCapabilities, QueueFamilyIndices, QueueFamilyInfo,
    discover_queue_families,
};
pub use error::{ErrorKind, RhiError, RhiResult};
pub use pipeline::{
    AttachmentDesc, BlendFactor, BlendOp, ColorBlendAttachment, ColorWriteMask, CompareOp,
    ComputePipelineDesc, CullMode, Framebuffer, FramebufferDesc, FrontFace,
    GraphicsPipelineDesc, Pipeline, PipelineLayout, PipelineLayoutDesc, PipelineLayoutInfo,
    PolygonMode, PrimitiveTopology, PushConstantRange, RenderPass, RenderPassDesc, SubpassDesc,
    VertexAttribute, VertexBinding, VertexInputRate,
};
pub use queue::{
    CommandQueue, PresentOutcome, QueueType, SemaphoreSignal, SemaphoreWait, SubmissionId,
    SubmitInfo,
};
pub use resource::{
    Buffer, BufferDesc, Sampler, SamplerDesc, Shader, ShaderDesc, Texture, TextureDesc,
};
pub use swapchain::{
    AcquiredImage, ColorSpace, PresentMode, SurfaceCapabilities, SurfaceFormat, SurfaceSupport,
    Swapchain, SwapchainDesc,
};
pub use sync::{Fence, Semaphore, SemaphoreType};
pub use types::*;
