use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::queue::{PresentOutcome, QueueType, SubmitInfo};
use crate::sync::{Fence, Semaphore};

use super::VulkanContext;
use super::command::VulkanCommandBuffer;
use super::conv;
use super::swapchain::VulkanSwapchain;
use super::sync::VulkanTimeline;

/// Handles and values of one `vkQueueSubmit` batch, kept alive while the
/// submit infos borrow them.
#[derive(Default)]
struct Batch {
    waits: Vec<vk::Semaphore>,
    wait_values: Vec<u64>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    command_buffers: Vec<vk::CommandBuffer>,
    signals: Vec<vk::Semaphore>,
    signal_values: Vec<u64>,
}

impl Batch {
    fn from_submit(submit: &SubmitInfo<'_>) -> RhiResult<Self> {
        let mut batch = Self::default();
        for wait in &submit.wait_semaphores {
            batch.waits.push(wait.semaphore.inner().as_vulkan()?.handle());
            batch.wait_values.push(wait.value);
            batch.wait_stages.push(conv::pipeline_stages(wait.stages_or_default()));
        }
        for cmd in &submit.command_buffers {
            batch
                .command_buffers
                .push(cmd.inner().as_vulkan().map(VulkanCommandBuffer::handle)?);
        }
        for signal in &submit.signal_semaphores {
            batch.signals.push(signal.semaphore.inner().as_vulkan()?.handle());
            batch.signal_values.push(signal.value);
        }
        Ok(batch)
    }

    fn signal(&mut self, semaphore: vk::Semaphore, value: u64) {
        self.signals.push(semaphore);
        self.signal_values.push(value);
    }
}

pub(crate) struct VulkanQueue {
    ctx: Arc<VulkanContext>,
    queue: vk::Queue,
    queue_type: QueueType,
    timeline: Arc<VulkanTimeline>,
    next_serial: AtomicU64,
}

impl VulkanQueue {
    pub(crate) fn new(ctx: Arc<VulkanContext>, queue_type: QueueType, family: u32) -> RhiResult<Self> {
        let queue = unsafe { ctx.device().get_device_queue(family, 0) };
        let timeline = Arc::new(VulkanTimeline::new(ctx.clone(), 0)?);
        Ok(Self {
            ctx,
            queue,
            queue_type,
            timeline,
            next_serial: AtomicU64::new(1),
        })
    }

    pub(crate) fn timeline(&self) -> Arc<VulkanTimeline> {
        self.timeline.clone()
    }

    /// Submits every batch in one call and returns the serial the queue
    /// timeline reaches when the last batch completes.
    ///
    /// The fence and the queue timeline are signalled by the last batch, so
    /// they complete only after every earlier batch has.
    pub(crate) fn submit(
        &self,
        submits: &[SubmitInfo<'_>],
        fence: Option<(&Fence, u64)>,
    ) -> RhiResult<u64> {
        let mut batches = submits
            .iter()
            .map(Batch::from_submit)
            .collect::<RhiResult<Vec<_>>>()?;
        if batches.is_empty() {
            batches.push(Batch::default());
        }

        let _queues = self.ctx.lock_queues();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);

        if let Some(last) = batches.last_mut() {
            last.signal(self.timeline.handle(), serial);
            if let Some((fence, value)) = fence {
                last.signal(fence.inner().as_vulkan()?.handle(), value);
            }
        }

        let mut timeline_infos = batches
            .iter()
            .map(|batch| {
                vk::TimelineSemaphoreSubmitInfo::default()
                    .wait_semaphore_values(&batch.wait_values)
                    .signal_semaphore_values(&batch.signal_values)
            })
            .collect::<Vec<_>>();
        let submit_infos = batches
            .iter()
            .zip(timeline_infos.iter_mut())
            .map(|(batch, timeline_info)| {
                vk::SubmitInfo::default()
                    .wait_semaphores(&batch.waits)
                    .wait_dst_stage_mask(&batch.wait_stages)
                    .command_buffers(&batch.command_buffers)
                    .signal_semaphores(&batch.signals)
                    .push_next(timeline_info)
            })
            .collect::<Vec<_>>();

        match unsafe {
            self.ctx
                .device()
                .queue_submit(self.queue, &submit_infos, vk::Fence::null())
        } {
            Ok(()) => {}
            Err(vk::Result::ERROR_DEVICE_LOST) => return Err(RhiError::DeviceLost),
            Err(e) => return Err(e.into()),
        }
        debug!(
            "{} queue: submitted {} batch(es) as serial {}",
            self.queue_type,
            submit_infos.len(),
            serial
        );
        Ok(serial)
    }

    /// Presents on the device's present queue after `wait_semaphores`.
    pub(crate) fn present(
        &self,
        swapchain: &VulkanSwapchain,
        image_index: u32,
        wait_semaphores: &[&Semaphore],
    ) -> RhiResult<PresentOutcome> {
        let waits = wait_semaphores
            .iter()
            .map(|semaphore| semaphore.inner().as_vulkan().map(|s| s.handle()))
            .collect::<RhiResult<Vec<_>>>()?;
        let swapchains = [swapchain.handle()];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let _queues = self.ctx.lock_queues();
        let result = unsafe {
            self.ctx
                .swapchain_loader()
                .queue_present(self.ctx.present_queue(), &present_info)
        };
        present_outcome(result)
    }

    pub(crate) fn wait_idle(&self) -> RhiResult<()> {
        let _queues = self.ctx.lock_queues();
        unsafe { self.ctx.device().queue_wait_idle(self.queue)? };
        Ok(())
    }
}

fn present_outcome(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Success),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
        Err(e) => Err(e.into()),
    }
}
