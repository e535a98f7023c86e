//! CPU-simulated backend.
//!
//! The headless device implements every RHI operation without a GPU. Work
//! is queued on a simulated timeline and retired lazily, when a fence or
//! semaphore wait needs it, so submissions really are `Pending` until the
//! CPU observes them. A [`HeadlessController`] lets tests inspect what
//! happened and inject faults:
//!
//! - [`HeadlessController::inject_acquire_fault`] and
//!   [`HeadlessController::inject_present_fault`] force out-of-date or
//!   suboptimal results on the Nth acquire or present
//! - [`HeadlessController::inject_present_error`] makes the Nth present fail
//! - [`HeadlessController::set_stalled`] stops retirement so waits time out
//! - [`HeadlessController::set_surface_extent`] simulates a window resize
//!
//! # Example
//!
//! ```
//! use mango_rhi::headless::{AcquireFault, HeadlessConfig};
//! use mango_rhi::{Device, RhiError, SwapchainDesc};
//!
//! # fn main() -> Result<(), RhiError> {
//! let device = Device::new_headless(HeadlessConfig::default())?;
//! let controller = device.headless_controller().ok_or(RhiError::NoSuitableGpu)?;
//! controller.inject_acquire_fault(1, AcquireFault::OutOfDate);
//!
//! let mut swapchain = device.create_swapchain(&SwapchainDesc::new(640, 480))?;
//! assert!(matches!(swapchain.acquire_next_image(None), Err(RhiError::SwapchainOutOfDate)));
//! assert_eq!(controller.stats().acquire_failures, 1);
//! # Ok(())
//! # }
//! ```

mod command;
mod gpu;
mod objects;
mod swapchain;
mod sync;

use std::sync::Arc;

use tracing::{debug, info};

pub use command::RecordedCommand;
pub use gpu::HeadlessGpu;

pub(crate) use command::{HeadlessCommandBuffer, HeadlessCommandPool};
pub(crate) use objects::{
    HeadlessBuffer, HeadlessDescriptorSet, HeadlessDescriptorSetLayout, HeadlessFramebuffer,
    HeadlessPipeline, HeadlessPipelineLayout, HeadlessRenderPass, HeadlessSampler, HeadlessShader,
    HeadlessTexture,
};
pub(crate) use swapchain::HeadlessSwapchain;
pub(crate) use sync::{HeadlessFence, HeadlessQueue, HeadlessSemaphore};

use crate::command::CommandPoolFlags;
use crate::descriptor::DescriptorSetLayoutDesc;
use crate::device::{QueueCapabilities, QueueFamilyInfo};
use crate::error::RhiResult;
use crate::pipeline::{
    ComputePipelineDesc, FramebufferDesc, GraphicsPipelineDesc, PipelineLayoutDesc,
    RenderPassDesc,
};
use crate::queue::{PresentOutcome, QueueType};
use crate::resource::{BufferDesc, SamplerDesc, ShaderDesc, TextureDesc};
use crate::swapchain::{
    PresentMode, SurfaceCapabilities, SurfaceFormat, SurfaceSupport, SwapchainParams,
};
use crate::sync::SemaphoreType;
use crate::types::{Extent2D, Format, TextureUsage};

// =========================================================================
// Configuration, Statistics and Events
// =========================================================================

/// Events the controller keeps by default before dropping the oldest.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Simulated adapter and surface capabilities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadlessConfig {
    pub caps: SurfaceCapabilities,
    pub surface_formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
    /// Formats usable as depth attachments.
    pub depth_formats: Vec<Format>,
    pub queue_families: Vec<QueueFamilyInfo>,
    /// Size of the event ring buffer. Zero turns event recording off.
    pub event_capacity: usize,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            caps: SurfaceCapabilities {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: SurfaceCapabilities::UNDEFINED_EXTENT,
                min_extent: Extent2D::new(1, 1),
                max_extent: Extent2D::new(16384, 16384),
            },
            surface_formats: vec![
                SurfaceFormat::srgb(Format::Bgra8Srgb),
                SurfaceFormat::srgb(Format::Bgra8Unorm),
            ],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate],
            depth_formats: vec![
                Format::Depth32F,
                Format::Depth24Stencil8,
                Format::Depth32FStencil8,
            ],
            queue_families: vec![
                QueueFamilyInfo {
                    index: 0,
                    queue_count: 1,
                    capabilities: QueueCapabilities::all(),
                },
                QueueFamilyInfo {
                    index: 1,
                    queue_count: 1,
                    capabilities: QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER,
                },
                QueueFamilyInfo {
                    index: 2,
                    queue_count: 1,
                    capabilities: QueueCapabilities::TRANSFER,
                },
            ],
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Counters of everything the simulated device did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Acquire calls, including failed ones.
    pub acquires: u64,
    pub acquire_failures: u64,
    pub submits: u64,
    pub command_buffers_submitted: u64,
    /// Present calls, including out-of-date ones.
    pub presents: u64,
    pub waits: u64,
    pub retired_submissions: u64,
    /// Swapchain creations and recreations.
    pub swapchains_created: u64,
}

/// Forced result of an acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcquireFault {
    OutOfDate,
    Suboptimal,
}

/// One observable action of the simulated device, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadlessEvent {
    Acquire { image: u32, suboptimal: bool },
    AcquireOutOfDate,
    Submit { serial: u64, command_buffers: usize },
    Present { image: u32, outcome: PresentOutcome },
    /// A CPU wait on a fence or timeline semaphore.
    Wait { value: u64, reached: bool },
    Retired { serial: u64 },
    SwapchainCreated { extent: Extent2D, image_count: u32 },
}

// =========================================================================
// Controller
// =========================================================================

/// Test handle to a headless device's simulated GPU.
#[derive(Clone, Debug)]
pub struct HeadlessController {
    gpu: Arc<HeadlessGpu>,
}

impl HeadlessController {
    pub fn stats(&self) -> HeadlessStats {
        self.gpu.lock().stats
    }

    /// The most recent events, oldest first. Older events are dropped once
    /// [`HeadlessConfig::event_capacity`] is reached.
    pub fn events(&self) -> Vec<HeadlessEvent> {
        self.gpu.lock().events.iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.gpu.lock().events.clear();
    }

    /// While stalled nothing retires and every wait returns `Timeout`.
    pub fn set_stalled(&self, stalled: bool) {
        debug!("headless: GPU stalled = {}", stalled);
        self.gpu.lock().stalled = stalled;
    }

    /// Forces the `nth` acquire (1-based, counted over the device lifetime).
    pub fn inject_acquire_fault(&self, nth: u64, fault: AcquireFault) {
        self.gpu.lock().acquire_faults.insert(nth, fault);
    }

    /// Forces the outcome of the `nth` present (1-based).
    pub fn inject_present_fault(&self, nth: u64, outcome: PresentOutcome) {
        self.gpu.lock().present_faults.insert(nth, outcome);
    }

    /// Makes the `nth` present (1-based) fail with [`crate::RhiError::DeviceLost`].
    /// Its semaphore waits still happen.
    pub fn inject_present_error(&self, nth: u64) {
        self.gpu.lock().present_errors.insert(nth);
    }

    /// Sets the current surface extent. A swapchain of a different size is
    /// out of date until recreated; `None` lets the swapchain decide.
    pub fn set_surface_extent(&self, extent: Option<Extent2D>) {
        self.gpu.lock().surface_extent = extent;
    }

    /// Retires all queued work that can complete.
    pub fn retire_all(&self) -> RhiResult<()> {
        self.gpu.wait_idle()
    }

    /// Number of queued, unretired operations.
    pub fn pending_submissions(&self) -> usize {
        self.gpu.lock().pending.len()
    }

    pub fn completed_serial(&self) -> u64 {
        self.gpu.completed_serial()
    }
}

// =========================================================================
// Device
// =========================================================================

pub(crate) struct HeadlessDevice {
    gpu: Arc<HeadlessGpu>,
    config: Arc<HeadlessConfig>,
}

impl HeadlessDevice {
    pub(crate) fn new(config: HeadlessConfig) -> Self {
        info!(
            "Headless device created: {} queue famil{}, {} depth format(s)",
            config.queue_families.len(),
            if config.queue_families.len() == 1 { "y" } else { "ies" },
            config.depth_formats.len()
        );
        Self {
            gpu: Arc::new(HeadlessGpu::with_event_capacity(config.event_capacity)),
            config: Arc::new(config),
        }
    }

    pub(crate) fn controller(&self) -> HeadlessController {
        HeadlessController {
            gpu: self.gpu.clone(),
        }
    }

    pub(crate) fn queue_family_infos(&self) -> &[QueueFamilyInfo] {
        &self.config.queue_families
    }

    pub(crate) fn supports_format(&self, format: Format, usage: TextureUsage) -> bool {
        if usage.contains(TextureUsage::DEPTH_STENCIL) || format.is_depth() {
            self.config.depth_formats.contains(&format)
        } else {
            true
        }
    }

    pub(crate) fn wait_idle(&self) -> RhiResult<()> {
        self.gpu.wait_idle()
    }

    /// Surface support as reported right now, including a simulated resize.
    pub(crate) fn surface_support(&self) -> SurfaceSupport {
        surface_support(&self.gpu, &self.config)
    }

    pub(crate) fn create_fence(&self, initial_value: u64) -> HeadlessFence {
        HeadlessFence::new(self.gpu.clone(), initial_value)
    }

    pub(crate) fn create_semaphore(&self, kind: SemaphoreType, initial_value: u64) -> HeadlessSemaphore {
        HeadlessSemaphore::new(self.gpu.clone(), kind, initial_value)
    }

    pub(crate) fn create_command_pool(&self, family: u32, flags: CommandPoolFlags) -> HeadlessCommandPool {
        HeadlessCommandPool::new(family, flags)
    }

    pub(crate) fn create_queue(&self, queue_type: QueueType, family: u32) -> HeadlessQueue {
        HeadlessQueue::new(self.gpu.clone(), queue_type, family)
    }

    pub(crate) fn create_buffer(&self, desc: &BufferDesc) -> HeadlessBuffer {
        HeadlessBuffer::new(desc.size)
    }

    pub(crate) fn create_texture(&self, _desc: &TextureDesc) -> HeadlessTexture {
        HeadlessTexture::new(self.gpu.next_id())
    }

    pub(crate) fn create_sampler(&self, _desc: &SamplerDesc) -> HeadlessSampler {
        HeadlessSampler
    }

    pub(crate) fn create_shader(&self, desc: &ShaderDesc) -> HeadlessShader {
        HeadlessShader::new(desc.code.len())
    }

    pub(crate) fn create_render_pass(&self, _desc: &RenderPassDesc) -> HeadlessRenderPass {
        HeadlessRenderPass
    }

    pub(crate) fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<HeadlessFramebuffer> {
        HeadlessFramebuffer::new(desc)
    }

    pub(crate) fn create_swapchain(
        &self,
        params: &SwapchainParams,
    ) -> (HeadlessSwapchain, Vec<HeadlessTexture>) {
        HeadlessSwapchain::new(self.gpu.clone(), self.config.clone(), params)
    }

    pub(crate) fn create_descriptor_set_layout(
        &self,
        _desc: &DescriptorSetLayoutDesc,
    ) -> HeadlessDescriptorSetLayout {
        HeadlessDescriptorSetLayout
    }

    pub(crate) fn create_descriptor_set(&self) -> HeadlessDescriptorSet {
        HeadlessDescriptorSet::default()
    }

    pub(crate) fn create_pipeline_layout(
        &self,
        desc: &PipelineLayoutDesc<'_>,
    ) -> RhiResult<HeadlessPipelineLayout> {
        HeadlessPipelineLayout::new(desc)
    }

    pub(crate) fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> RhiResult<HeadlessPipeline> {
        HeadlessPipeline::graphics(desc)
    }

    pub(crate) fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_>,
    ) -> RhiResult<HeadlessPipeline> {
        HeadlessPipeline::compute(desc)
    }
}

/// Configured surface support with the simulated current extent applied.
fn surface_support(gpu: &HeadlessGpu, config: &HeadlessConfig) -> SurfaceSupport {
    let mut capabilities = config.caps;
    if let Some(extent) = gpu.lock().surface_extent {
        capabilities.current_extent = extent;
    }
    SurfaceSupport {
        capabilities,
        formats: config.surface_formats.clone(),
        present_modes: config.present_modes.clone(),
    }
}
