//! Device creation, queue-family discovery and the object factory.
//!
//! # Overview
//!
//! The [`Device`] is the root of every other RHI object:
//! - Backend selection from a [`DeviceDesc`] (Vulkan needs a [`NativeWindow`])
//! - Queue-family discovery, with a fallback to the graphics family when no
//!   dedicated compute or transfer family exists
//! - `create_*` factories for synchronization, command, resource, pipeline
//!   and presentation objects
//!
//! # Example
//!
//! ```
//! use mango_rhi::{Device, DeviceDesc, Format, QueueType};
//!
//! # fn main() -> Result<(), mango_rhi::RhiError> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let depth = device.select_depth_format(&[Format::Depth32F, Format::Depth24Stencil8])?;
//! assert!(depth.is_depth());
//!
//! let queue = device.create_command_queue(QueueType::Graphics)?;
//! assert_eq!(queue.family_index(), device.queue_families().graphics);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bitflags::bitflags;
use raw_window_handle::{
    HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::command::{CommandPool, CommandPoolFlags, CommandPoolInner};
use crate::descriptor::{
    DescriptorSet, DescriptorSetInner, DescriptorSetLayout, DescriptorSetLayoutDesc,
    DescriptorSetLayoutInner,
};
use crate::error::{RhiError, RhiResult};
use crate::headless::{HeadlessConfig, HeadlessController, HeadlessDevice};
use crate::pipeline::{
    ComputePipelineDesc, Framebuffer, FramebufferDesc, FramebufferInner, GraphicsPipelineDesc,
    Pipeline, PipelineInner, PipelineLayout, PipelineLayoutDesc, PipelineLayoutInfo,
    PipelineLayoutInner, RenderPass, RenderPassDesc, RenderPassInner,
};
use crate::queue::{CommandQueue, CommandQueueInner, QueueType};
use crate::resource::{
    Buffer, BufferDesc, BufferInner, Sampler, SamplerDesc, SamplerInner, Shader, ShaderDesc,
    ShaderInner, Texture, TextureDesc, TextureInner,
};
use crate::swapchain::{Swapchain, SwapchainDesc, SwapchainInner, SwapchainParams};
use crate::sync::{Fence, FenceInner, Semaphore, SemaphoreInner, SemaphoreType};
use crate::types::{Backend, Format, PipelineBindPoint, TextureUsage};

#[cfg(feature = "vulkan")]
use crate::vulkan::device::VulkanDevice;

backend_inner!(DeviceInner {
    vulkan: VulkanDevice,
    headless: HeadlessDevice,
});

// =========================================================================
// Description
// =========================================================================

/// Device creation parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDesc {
    pub backend: Backend,
    /// Enables API validation layers and routes their messages to `tracing`.
    pub enable_validation: bool,
    pub enable_raytracing: bool,
    /// Index into the enumerated adapters; the best-scoring one if `None`.
    pub preferred_adapter_index: Option<usize>,
    pub app_name: String,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            enable_validation: cfg!(debug_assertions),
            enable_raytracing: false,
            preferred_adapter_index: None,
            app_name: "mango".to_string(),
        }
    }
}

impl DeviceDesc {
    /// Description of a headless device without validation.
    pub fn headless() -> Self {
        Self {
            backend: Backend::Headless,
            enable_validation: false,
            ..Self::default()
        }
    }
}

/// Raw handles of the window a device presents to.
///
/// The window must outlive the device and every swapchain created from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativeWindow {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

impl NativeWindow {
    pub fn new(display: RawDisplayHandle, window: RawWindowHandle) -> Self {
        Self { display, window }
    }

    /// Extracts the raw handles of any windowing object.
    pub fn from_handles<W>(window: &W) -> RhiResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| RhiError::Surface(format!("display handle unavailable: {}", e)))?
            .as_raw();
        let raw_window = window
            .window_handle()
            .map_err(|e| RhiError::Surface(format!("window handle unavailable: {}", e)))?
            .as_raw();
        Ok(Self::new(display, raw_window))
    }
}

// =========================================================================
// Queue Families
// =========================================================================

bitflags! {
    /// Operations a queue family supports.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueueCapabilities: u32 {
        const GRAPHICS = 0x1;
        const COMPUTE = 0x2;
        const TRANSFER = 0x4;
        /// Can present to the device's surface.
        const PRESENT = 0x8;
    }
}

/// One queue family as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub index: u32,
    pub queue_count: u32,
    pub capabilities: QueueCapabilities,
}

impl QueueFamilyInfo {
    #[inline]
    fn has(&self, capabilities: QueueCapabilities) -> bool {
        self.queue_count > 0 && self.capabilities.contains(capabilities)
    }
}

/// The family chosen for each queue role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    /// `None` when no family can present (no surface).
    pub present: Option<u32>,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Family that serves queues of `queue_type`.
    pub fn family_for(&self, queue_type: QueueType) -> u32 {
        match queue_type {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }

    /// Distinct family indices, sorted.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.transfer];
        families.extend(self.present);
        families.sort_unstable();
        families.dedup();
        families
    }

    #[inline]
    pub fn has_dedicated_compute(&self) -> bool {
        self.compute != self.graphics
    }

    #[inline]
    pub fn has_dedicated_transfer(&self) -> bool {
        self.transfer != self.graphics
    }
}

/// Picks one family per queue role.
///
/// Graphics prefers a family that can also present. Compute prefers a
/// family without graphics and transfer one with neither graphics nor
/// compute; both fall back to the graphics family.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no family supports graphics.
pub fn discover_queue_families(families: &[QueueFamilyInfo]) -> RhiResult<QueueFamilyIndices> {
    let graphics = families
        .iter()
        .find(|f| f.has(QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENT))
        .or_else(|| families.iter().find(|f| f.has(QueueCapabilities::GRAPHICS)))
        .ok_or(RhiError::NoSuitableGpu)?
        .index;

    let present = families
        .iter()
        .find(|f| f.index == graphics && f.has(QueueCapabilities::PRESENT))
        .or_else(|| families.iter().find(|f| f.has(QueueCapabilities::PRESENT)))
        .map(|f| f.index);

    let compute = families
        .iter()
        .find(|f| {
            f.has(QueueCapabilities::COMPUTE) && !f.capabilities.contains(QueueCapabilities::GRAPHICS)
        })
        .map_or(graphics, |f| f.index);

    let transfer = families
        .iter()
        .find(|f| {
            f.has(QueueCapabilities::TRANSFER)
                && !f
                    .capabilities
                    .intersects(QueueCapabilities::GRAPHICS | QueueCapabilities::COMPUTE)
        })
        .map_or(graphics, |f| f.index);

    let indices = QueueFamilyIndices {
        graphics,
        present,
        compute,
        transfer,
    };
    debug!("Queue families: {:?}", indices);
    Ok(indices)
}

// =========================================================================
// Device
// =========================================================================

/// Root object of the RHI. Shared as `Arc<Device>`.
pub struct Device {
    inner: DeviceInner,
    desc: DeviceDesc,
    families: Vec<QueueFamilyInfo>,
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates a device for `desc.backend`.
    ///
    /// # Errors
    ///
    /// - [`RhiError::BackendUnavailable`] if the backend was not compiled in
    /// - [`RhiError::MissingWindow`] if Vulkan is requested without a window
    /// - [`RhiError::NoSuitableGpu`] if no adapter has a graphics queue
    pub fn new(desc: &DeviceDesc, window: Option<NativeWindow>) -> RhiResult<Arc<Self>> {
        info!(
            "Creating {} device for '{}' (validation: {})",
            desc.backend, desc.app_name, desc.enable_validation
        );

        let inner = match desc.backend {
            #[cfg(feature = "vulkan")]
            Backend::Vulkan => {
                let window = window.ok_or(RhiError::MissingWindow)?;
                DeviceInner::Vulkan(VulkanDevice::new(desc, window)?)
            }
            #[cfg(not(feature = "vulkan"))]
            Backend::Vulkan => return Err(RhiError::BackendUnavailable(Backend::Vulkan)),
            Backend::Headless => {
                if window.is_some() {
                    debug!("Headless device ignores the native window");
                }
                DeviceInner::Headless(HeadlessDevice::new(HeadlessConfig::default()))
            }
        };

        Self::from_inner(inner, desc.clone())
    }

    /// Creates a headless device with custom simulated capabilities.
    pub fn new_headless(config: HeadlessConfig) -> RhiResult<Arc<Self>> {
        Self::from_inner(
            DeviceInner::Headless(HeadlessDevice::new(config)),
            DeviceDesc::headless(),
        )
    }

    fn from_inner(inner: DeviceInner, desc: DeviceDesc) -> RhiResult<Arc<Self>> {
        let families = match &inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => device.queue_family_infos().to_vec(),
            DeviceInner::Headless(device) => device.queue_family_infos().to_vec(),
        };
        let queue_families = discover_queue_families(&families)?;

        info!(
            "{} device ready: {} queue famil{}, graphics family {}",
            inner.backend(),
            families.len(),
            if families.len() == 1 { "y" } else { "ies" },
            queue_families.graphics
        );

        Ok(Arc::new(Self {
            inner,
            desc,
            families,
            queue_families,
        }))
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn desc(&self) -> &DeviceDesc {
        &self.desc
    }

    #[cfg(feature = "vulkan")]
    pub(crate) fn as_vulkan(&self) -> RhiResult<&VulkanDevice> {
        self.inner.as_vulkan()
    }

    /// Test controller of a headless device; `None` for other backends.
    pub fn headless_controller(&self) -> Option<HeadlessController> {
        self.inner.as_headless().ok().map(HeadlessDevice::controller)
    }

    // =====================================================================
    // Queries
    // =====================================================================

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    #[inline]
    pub fn queue_family_count(&self) -> usize {
        self.families.len()
    }

    /// Every queue family the device exposes.
    #[inline]
    pub fn queue_family_infos(&self) -> &[QueueFamilyInfo] {
        &self.families
    }

    /// Union of the capabilities of every queue family.
    pub fn supported_queues(&self) -> QueueCapabilities {
        self.families
            .iter()
            .filter(|f| f.queue_count > 0)
            .fold(QueueCapabilities::empty(), |caps, f| caps | f.capabilities)
    }

    /// Returns true if textures of `format` can be created with `usage`.
    pub fn supports_format(&self, format: Format, usage: TextureUsage) -> bool {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => device.supports_format(format, usage),
            DeviceInner::Headless(device) => device.supports_format(format, usage),
        }
    }

    /// Returns the first candidate usable as a depth attachment.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedFormat`] when no candidate qualifies.
    pub fn select_depth_format(&self, candidates: &[Format]) -> RhiResult<Format> {
        let selected = candidates
            .iter()
            .copied()
            .filter(|format| format.is_depth())
            .find(|&format| self.supports_format(format, TextureUsage::DEPTH_STENCIL));

        match selected {
            Some(format) => {
                debug!("Selected depth format: {:?}", format);
                Ok(format)
            }
            None => Err(RhiError::UnsupportedFormat(format!(
                "none of the depth formats {:?} is supported",
                candidates
            ))),
        }
    }

    /// Blocks until every queue of the device is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => device.wait_idle(),
            DeviceInner::Headless(device) => device.wait_idle(),
        }
    }

    // =====================================================================
    // Synchronization and Commands
    // =====================================================================

    /// Creates a fence. A signalled fence starts at value 1, otherwise 0.
    pub fn create_fence(&self, signaled: bool) -> RhiResult<Fence> {
        let initial_value = u64::from(signaled);
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => FenceInner::Vulkan(device.create_fence(initial_value)?),
            DeviceInner::Headless(device) => {
                FenceInner::Headless(device.create_fence(initial_value))
            }
        };
        debug!("Created fence (initial value {})", initial_value);
        Ok(Fence::from_inner(inner, initial_value))
    }

    /// Creates a semaphore. `initial_value` is ignored for binary ones.
    pub fn create_semaphore(&self, kind: SemaphoreType, initial_value: u64) -> RhiResult<Semaphore> {
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => {
                SemaphoreInner::Vulkan(device.create_semaphore(kind, initial_value)?)
            }
            DeviceInner::Headless(device) => {
                SemaphoreInner::Headless(device.create_semaphore(kind, initial_value))
            }
        };
        Ok(Semaphore::from_inner(inner, kind))
    }

    pub fn create_command_pool(
        &self,
        queue_type: QueueType,
        flags: CommandPoolFlags,
    ) -> RhiResult<CommandPool> {
        let family = self.queue_families.family_for(queue_type);
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => {
                CommandPoolInner::Vulkan(device.create_command_pool(family, flags)?)
            }
            DeviceInner::Headless(device) => {
                CommandPoolInner::Headless(device.create_command_pool(family, flags))
            }
        };
        Ok(CommandPool::from_inner(inner, queue_type, flags))
    }

    /// Returns a handle to queue 0 of the family serving `queue_type`.
    pub fn create_command_queue(&self, queue_type: QueueType) -> RhiResult<CommandQueue> {
        let family = self.queue_families.family_for(queue_type);
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => {
                CommandQueueInner::Vulkan(device.create_queue(queue_type, family)?)
            }
            DeviceInner::Headless(device) => {
                CommandQueueInner::Headless(device.create_queue(queue_type, family))
            }
        };
        debug!("{} queue retrieved from family {}", queue_type, family);
        Ok(CommandQueue::from_inner(inner, queue_type, family))
    }

    // =====================================================================
    // Resources
    // =====================================================================

    pub fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Buffer> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => BufferInner::Vulkan(device.create_buffer(desc)?),
            DeviceInner::Headless(device) => BufferInner::Headless(device.create_buffer(desc)),
        };
        Ok(Buffer::from_inner(inner, *desc))
    }

    pub fn create_texture(&self, desc: &TextureDesc) -> RhiResult<Texture> {
        desc.validate()?;
        if !self.supports_format(desc.format, desc.usage) {
            return Err(RhiError::UnsupportedFormat(format!(
                "{:?} with usage {:?}",
                desc.format, desc.usage
            )));
        }
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => TextureInner::Vulkan(device.create_texture(desc)?),
            DeviceInner::Headless(device) => TextureInner::Headless(device.create_texture(desc)),
        };
        Ok(Texture::from_inner(inner, desc.clone()))
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Sampler> {
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => SamplerInner::Vulkan(device.create_sampler(desc)?),
            DeviceInner::Headless(device) => SamplerInner::Headless(device.create_sampler(desc)),
        };
        Ok(Sampler::from_inner(inner, *desc))
    }

    pub fn create_shader(&self, desc: &ShaderDesc) -> RhiResult<Shader> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => ShaderInner::Vulkan(device.create_shader(desc)?),
            DeviceInner::Headless(device) => ShaderInner::Headless(device.create_shader(desc)),
        };
        Ok(Shader::from_inner(inner, desc))
    }

    // =====================================================================
    // Render Passes and Presentation
    // =====================================================================

    pub fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<RenderPass> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => RenderPassInner::Vulkan(device.create_render_pass(desc)?),
            DeviceInner::Headless(device) => {
                RenderPassInner::Headless(device.create_render_pass(desc))
            }
        };
        Ok(RenderPass::from_inner(inner, desc))
    }

    /// Binds textures to the attachments of a render pass.
    ///
    /// # Errors
    ///
    /// A zero-sized extent, a count or format mismatch, or an attachment
    /// smaller than the framebuffer is [`RhiError::InvalidDescription`].
    pub fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<Framebuffer> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => FramebufferInner::Vulkan(device.create_framebuffer(desc)?),
            DeviceInner::Headless(device) => {
                FramebufferInner::Headless(device.create_framebuffer(desc)?)
            }
        };
        Ok(Framebuffer::from_inner(inner, desc))
    }

    /// Creates a swapchain for the device's surface.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NotSupported`] when the device has no surface.
    pub fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<Swapchain> {
        let swapchain = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => {
                let params =
                    SwapchainParams::resolve(&device.surface_support()?, desc, desc.width, desc.height)?;
                let (swapchain, images) = device.create_swapchain(&params)?;
                Swapchain::from_inner(
                    SwapchainInner::Vulkan(swapchain),
                    desc.clone(),
                    params,
                    images.into_iter().map(TextureInner::Vulkan).collect(),
                )
            }
            DeviceInner::Headless(device) => {
                let params =
                    SwapchainParams::resolve(&device.surface_support(), desc, desc.width, desc.height)?;
                let (swapchain, images) = device.create_swapchain(&params);
                Swapchain::from_inner(
                    SwapchainInner::Headless(swapchain),
                    desc.clone(),
                    params,
                    images.into_iter().map(TextureInner::Headless).collect(),
                )
            }
        };
        Ok(swapchain)
    }

    // =====================================================================
    // Pipelines and Descriptors
    // =====================================================================

    pub fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> RhiResult<DescriptorSetLayout> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => {
                DescriptorSetLayoutInner::Vulkan(device.create_descriptor_set_layout(desc)?)
            }
            DeviceInner::Headless(device) => {
                DescriptorSetLayoutInner::Headless(device.create_descriptor_set_layout(desc))
            }
        };
        Ok(DescriptorSetLayout::from_inner(inner, desc))
    }

    pub fn create_descriptor_set(&self, layout: &DescriptorSetLayout) -> RhiResult<DescriptorSet> {
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => DescriptorSetInner::Vulkan(
                device.create_descriptor_set(layout.inner().as_vulkan()?, layout.bindings())?,
            ),
            DeviceInner::Headless(device) => {
                layout.inner().as_headless()?;
                DescriptorSetInner::Headless(device.create_descriptor_set())
            }
        };
        Ok(DescriptorSet::from_inner(inner, layout))
    }

    pub fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc<'_>) -> RhiResult<PipelineLayout> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => {
                PipelineLayoutInner::Vulkan(device.create_pipeline_layout(desc)?)
            }
            DeviceInner::Headless(device) => {
                PipelineLayoutInner::Headless(device.create_pipeline_layout(desc)?)
            }
        };
        let info = PipelineLayoutInfo {
            set_layout_count: desc.set_layouts.len() as u32,
            push_constant_ranges: desc.push_constant_ranges.clone(),
        };
        Ok(PipelineLayout::from_inner(inner, info))
    }

    pub fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<Pipeline> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => PipelineInner::Vulkan(device.create_graphics_pipeline(desc)?),
            DeviceInner::Headless(device) => {
                PipelineInner::Headless(device.create_graphics_pipeline(desc)?)
            }
        };
        Ok(Pipeline::from_inner(
            inner,
            PipelineBindPoint::Graphics,
            desc.layout.clone(),
        ))
    }

    pub fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> RhiResult<Pipeline> {
        desc.validate()?;
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            DeviceInner::Vulkan(device) => PipelineInner::Vulkan(device.create_compute_pipeline(desc)?),
            DeviceInner::Headless(device) => {
                PipelineInner::Headless(device.create_compute_pipeline(desc)?)
            }
        };
        Ok(Pipeline::from_inner(
            inner,
            PipelineBindPoint::Compute,
            desc.layout.clone(),
        ))
    }

    /// Raytracing pipelines are outside this crate.
    ///
    /// # Errors
    ///
    /// Always [`RhiError::NotSupported`]; the message says whether
    /// raytracing was requested at device creation.
    pub fn create_raytracing_pipeline(&self) -> RhiResult<Pipeline> {
        let reason = if self.desc.enable_raytracing {
            "raytracing pipelines are not implemented by this backend"
        } else {
            "raytracing was not enabled at device creation"
        };
        warn!("create_raytracing_pipeline: {}", reason);
        Err(RhiError::NotSupported(reason.to_string()))
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            tracing::error!("Failed to wait for device idle during drop: {:?}", e);
        }
        info!("{} device destroyed", self.backend());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, capabilities: QueueCapabilities) -> QueueFamilyInfo {
        QueueFamilyInfo {
            index,
            queue_count: 1,
            capabilities,
        }
    }

    #[test]
    fn test_discover_falls_back_to_graphics() {
        let families = [family(
            0,
            QueueCapabilities::GRAPHICS
                | QueueCapabilities::COMPUTE
                | QueueCapabilities::TRANSFER
                | QueueCapabilities::PRESENT,
        )];
        let indices = discover_queue_families(&families).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.compute, 0);
        assert_eq!(indices.transfer, 0);
        assert!(!indices.has_dedicated_compute());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_discover_prefers_dedicated_families() {
        let families = [
            family(
                0,
                QueueCapabilities::GRAPHICS | QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER,
            ),
            family(1, QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER),
            family(2, QueueCapabilities::TRANSFER),
            family(
                3,
                QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENT,
            ),
        ];
        let indices = discover_queue_families(&families).unwrap();
        assert_eq!(indices.graphics, 3);
        assert_eq!(indices.present, Some(3));
        assert_eq!(indices.compute, 1);
        assert_eq!(indices.transfer, 2);
        assert_eq!(indices.family_for(QueueType::Transfer), 2);
        assert_eq!(indices.unique_families(), vec![1, 2, 3]);
    }

    #[test]
    fn test_discover_separate_present_family() {
        let families = [
            family(0, QueueCapabilities::GRAPHICS | QueueCapabilities::COMPUTE),
            family(1, QueueCapabilities::PRESENT),
        ];
        let indices = discover_queue_families(&families).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn test_discover_skips_empty_families() {
        let families = [
            QueueFamilyInfo {
                index: 0,
                queue_count: 0,
                capabilities: QueueCapabilities::GRAPHICS,
            },
            family(1, QueueCapabilities::COMPUTE),
        ];
        assert!(matches!(
            discover_queue_families(&families),
            Err(RhiError::NoSuitableGpu)
        ));
    }

    #[cfg(not(feature = "vulkan"))]
    #[test]
    fn test_vulkan_unavailable_without_feature() {
        let desc = DeviceDesc {
            backend: Backend::Vulkan,
            ..DeviceDesc::default()
        };
        assert!(matches!(
            Device::new(&desc, None),
            Err(RhiError::BackendUnavailable(Backend::Vulkan))
        ));
    }

    #[cfg(feature = "vulkan")]
    #[test]
    fn test_vulkan_requires_window() {
        let desc = DeviceDesc {
            backend: Backend::Vulkan,
            ..DeviceDesc::default()
        };
        let err = Device::new(&desc, None).unwrap_err();
        assert!(matches!(err, RhiError::MissingWindow));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_select_depth_format() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        assert_eq!(
            device
                .select_depth_format(&[Format::Rgba8Unorm, Format::Depth32F])
                .unwrap(),
            Format::Depth32F
        );

        let limited = Device::new_headless(HeadlessConfig {
            depth_formats: vec![Format::Depth24Stencil8],
            ..HeadlessConfig::default()
        })
        .unwrap();
        assert_eq!(
            limited
                .select_depth_format(&[Format::Depth32F, Format::Depth24Stencil8])
                .unwrap(),
            Format::Depth24Stencil8
        );
        let err = limited.select_depth_format(&[Format::Depth32F]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_raytracing_not_supported() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        assert!(matches!(
            device.create_raytracing_pipeline(),
            Err(RhiError::NotSupported(_))
        ));
    }

    #[test]
    fn test_headless_controller_available() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        assert!(device.headless_controller().is_some());
        assert!(device.supported_queues().contains(QueueCapabilities::GRAPHICS));
        assert!(device.queue_family_count() >= 1);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
