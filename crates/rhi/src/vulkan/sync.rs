use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::sync::{SemaphoreType, timeout_nanos};

use super::VulkanContext;

fn create_semaphore(ctx: &VulkanContext, kind: SemaphoreType, initial_value: u64) -> RhiResult<vk::Semaphore> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = match kind {
        SemaphoreType::Binary => vk::SemaphoreCreateInfo::default(),
        SemaphoreType::Timeline => vk::SemaphoreCreateInfo::default().push_next(&mut type_info),
    };
    let semaphore = unsafe { ctx.device().create_semaphore(&create_info, None)? };
    Ok(semaphore)
}

fn counter_value(ctx: &VulkanContext, semaphore: vk::Semaphore) -> RhiResult<u64> {
    let value = unsafe { ctx.device().get_semaphore_counter_value(semaphore)? };
    Ok(value)
}

fn wait_value(
    ctx: &VulkanContext,
    semaphore: vk::Semaphore,
    value: u64,
    timeout: Option<Duration>,
) -> RhiResult<()> {
    let semaphores = [semaphore];
    let values = [value];
    let wait_info = vk::SemaphoreWaitInfo::default()
        .semaphores(&semaphores)
        .values(&values);
    match unsafe { ctx.device().wait_semaphores(&wait_info, timeout_nanos(timeout)) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
        Err(e) => Err(e.into()),
    }
}

fn signal_value(ctx: &VulkanContext, semaphore: vk::Semaphore, value: u64) -> RhiResult<()> {
    let signal_info = vk::SemaphoreSignalInfo::default()
        .semaphore(semaphore)
        .value(value);
    unsafe { ctx.device().signal_semaphore(&signal_info)? };
    Ok(())
}

// =========================================================================
// Timeline
// =========================================================================

/// A timeline semaphore owned by the backend: the per-queue submission
/// timeline and the storage behind fences.
pub(crate) struct VulkanTimeline {
    ctx: Arc<VulkanContext>,
    semaphore: vk::Semaphore,
}

impl VulkanTimeline {
    pub(crate) fn new(ctx: Arc<VulkanContext>, initial_value: u64) -> RhiResult<Self> {
        let semaphore = create_semaphore(&ctx, SemaphoreType::Timeline, initial_value)?;
        Ok(Self { ctx, semaphore })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    pub(crate) fn value(&self) -> RhiResult<u64> {
        counter_value(&self.ctx, self.semaphore)
    }

    pub(crate) fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<()> {
        wait_value(&self.ctx, self.semaphore, value, timeout)
    }

    pub(crate) fn signal(&self, value: u64) -> RhiResult<()> {
        signal_value(&self.ctx, self.semaphore, value)
    }
}

impl Drop for VulkanTimeline {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_semaphore(self.semaphore, None) };
    }
}

// =========================================================================
// Fence
// =========================================================================

pub(crate) struct VulkanFence {
    timeline: VulkanTimeline,
}

impl VulkanFence {
    pub(crate) fn new(ctx: Arc<VulkanContext>, initial_value: u64) -> RhiResult<Self> {
        let timeline = VulkanTimeline::new(ctx, initial_value)?;
        debug!("Fence created at value {}", initial_value);
        Ok(Self { timeline })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Semaphore {
        self.timeline.handle()
    }

    pub(crate) fn completed_value(&self) -> RhiResult<u64> {
        self.timeline.value()
    }

    pub(crate) fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<()> {
        self.timeline.wait(value, timeout)
    }

    pub(crate) fn signal(&self, value: u64) -> RhiResult<()> {
        self.timeline.signal(value)
    }
}

// =========================================================================
// Semaphore
// =========================================================================

pub(crate) struct VulkanSemaphore {
    ctx: Arc<VulkanContext>,
    semaphore: vk::Semaphore,
}

impl VulkanSemaphore {
    pub(crate) fn new(ctx: Arc<VulkanContext>, kind: SemaphoreType, initial_value: u64) -> RhiResult<Self> {
        let semaphore = create_semaphore(&ctx, kind, initial_value)?;
        Ok(Self { ctx, semaphore })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    // The front-end only calls these on timeline semaphores.

    pub(crate) fn value(&self) -> RhiResult<u64> {
        counter_value(&self.ctx, self.semaphore)
    }

    pub(crate) fn signal(&self, value: u64) -> RhiResult<()> {
        signal_value(&self.ctx, self.semaphore, value)
    }

    pub(crate) fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<()> {
        wait_value(&self.ctx, self.semaphore, value, timeout)
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_semaphore(self.semaphore, None) };
    }
}
