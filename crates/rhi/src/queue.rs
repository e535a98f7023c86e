//! Command queues: submission, presentation and idle waits.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::barrier::PipelineStages;
use crate::command::CommandBuffer;
use crate::error::{RhiError, RhiResult};
use crate::headless::{HeadlessGpu, HeadlessQueue};
use crate::swapchain::Swapchain;
use crate::sync::{Fence, Semaphore};
use crate::types::Backend;

#[cfg(feature = "vulkan")]
use crate::vulkan::queue::VulkanQueue;
#[cfg(feature = "vulkan")]
use crate::vulkan::sync::VulkanTimeline;

backend_inner!(CommandQueueInner {
    vulkan: VulkanQueue,
    headless: HeadlessQueue,
});

/// Kind of work a queue accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

impl QueueType {
    pub fn name(&self) -> &'static str {
        match self {
            QueueType::Graphics => "graphics",
            QueueType::Compute => "compute",
            QueueType::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for QueueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A semaphore the submission waits on before the given stages run.
#[derive(Clone, Copy, Debug)]
pub struct SemaphoreWait<'a> {
    pub semaphore: &'a Semaphore,
    /// Defaults to all commands.
    pub stages: Option<PipelineStages>,
    /// Timeline value to wait for. Ignored for binary semaphores.
    pub value: u64,
}

impl<'a> SemaphoreWait<'a> {
    pub fn binary(semaphore: &'a Semaphore, stages: PipelineStages) -> Self {
        Self {
            semaphore,
            stages: Some(stages),
            value: 0,
        }
    }

    pub fn timeline(semaphore: &'a Semaphore, value: u64) -> Self {
        Self {
            semaphore,
            stages: None,
            value,
        }
    }

    #[inline]
    pub fn stages_or_default(&self) -> PipelineStages {
        self.stages.unwrap_or(PipelineStages::ALL_COMMANDS)
    }
}

/// A semaphore the submission signals once its command buffers complete.
#[derive(Clone, Copy, Debug)]
pub struct SemaphoreSignal<'a> {
    pub semaphore: &'a Semaphore,
    /// Timeline value to signal. Ignored for binary semaphores.
    pub value: u64,
}

impl<'a> SemaphoreSignal<'a> {
    pub fn binary(semaphore: &'a Semaphore) -> Self {
        Self {
            semaphore,
            value: 0,
        }
    }

    pub fn timeline(semaphore: &'a Semaphore, value: u64) -> Self {
        Self { semaphore, value }
    }
}

/// One batch of a [`CommandQueue::submit`] call.
#[derive(Default)]
pub struct SubmitInfo<'a> {
    pub command_buffers: Vec<&'a mut CommandBuffer>,
    pub wait_semaphores: Vec<SemaphoreWait<'a>>,
    pub signal_semaphores: Vec<SemaphoreSignal<'a>>,
}

impl<'a> SubmitInfo<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_buffer(mut self, command_buffer: &'a mut CommandBuffer) -> Self {
        self.command_buffers.push(command_buffer);
        self
    }

    pub fn wait(mut self, wait: SemaphoreWait<'a>) -> Self {
        self.wait_semaphores.push(wait);
        self
    }

    pub fn signal(mut self, signal: SemaphoreSignal<'a>) -> Self {
        self.signal_semaphores.push(signal);
        self
    }
}

impl<'a> From<&'a mut CommandBuffer> for SubmitInfo<'a> {
    fn from(command_buffer: &'a mut CommandBuffer) -> Self {
        Self::new().command_buffer(command_buffer)
    }
}

/// Identifies a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubmissionId {
    /// Position on the queue's internal submission timeline.
    pub serial: u64,
    /// Value the fence will reach, when a fence was passed.
    pub fence_value: Option<u64>,
}

/// Result of presenting an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentOutcome {
    Success,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented; the swapchain must be recreated.
    OutOfDate,
}

impl PresentOutcome {
    /// Returns true when the swapchain should be recreated.
    #[inline]
    pub fn needs_recreation(&self) -> bool {
        !matches!(self, PresentOutcome::Success)
    }
}

/// Serial counter that completes in submission order; pending command
/// buffers observe their completion through it.
#[derive(Clone)]
pub(crate) enum SubmissionTimeline {
    #[cfg(feature = "vulkan")]
    Vulkan(Arc<VulkanTimeline>),
    Headless(Arc<HeadlessGpu>),
}

impl SubmissionTimeline {
    pub(crate) fn completed(&self) -> u64 {
        match self {
            #[cfg(feature = "vulkan")]
            SubmissionTimeline::Vulkan(timeline) => timeline.value().unwrap_or_else(|e| {
                warn!("Failed to query submission timeline: {}", e);
                0
            }),
            SubmissionTimeline::Headless(gpu) => gpu.completed_serial(),
        }
    }
}

/// A device queue of one [`QueueType`].
pub struct CommandQueue {
    inner: CommandQueueInner,
    queue_type: QueueType,
    family_index: u32,
    last_serial: u64,
}

impl CommandQueue {
    pub(crate) fn from_inner(inner: CommandQueueInner, queue_type: QueueType, family_index: u32) -> Self {
        debug!(
            "Created {} queue (family {}, {})",
            queue_type,
            family_index,
            inner.backend()
        );
        Self {
            inner,
            queue_type,
            family_index,
            last_serial: 0,
        }
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Serial of the most recent submission on this queue.
    #[inline]
    pub fn last_submitted_serial(&self) -> u64 {
        self.last_serial
    }

    /// Highest submission serial known to be complete.
    pub fn completed_serial(&self) -> u64 {
        self.timeline().completed()
    }

    fn timeline(&self) -> SubmissionTimeline {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            CommandQueueInner::Vulkan(queue) => SubmissionTimeline::Vulkan(queue.timeline()),
            CommandQueueInner::Headless(queue) => SubmissionTimeline::Headless(queue.gpu().clone()),
        }
    }

    /// Submits batches of command buffers.
    ///
    /// Every command buffer must be primary and `Executable`; afterwards it
    /// is `Pending` until the GPU finishes. If `fence` is given it is
    /// signalled with [`Fence::next_signal_value`] once all batches finish.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation and submits nothing if any command
    /// buffer is in the wrong state.
    pub fn submit(
        &mut self,
        submits: &mut [SubmitInfo<'_>],
        fence: Option<&Fence>,
    ) -> RhiResult<SubmissionId> {
        const OP: &str = "CommandQueue::submit";
        let backend = self.backend();

        for submit in submits.iter_mut() {
            for (i, cmd) in submit.command_buffers.iter_mut().enumerate() {
                if cmd.backend() != backend {
                    return Err(RhiError::BackendMismatch {
                        expected: backend,
                        found: cmd.backend(),
                    });
                }
                cmd.validate_for_submit(i)?;
            }
            for signal in &submit.signal_semaphores {
                if signal.semaphore.is_timeline() && signal.value <= signal.semaphore.value()? {
                    return Err(RhiError::protocol_violation(
                        OP,
                        format!(
                            "timeline signal value {} does not exceed the current value",
                            signal.value
                        ),
                    ));
                }
            }
        }

        let fence_value = fence.map(Fence::next_signal_value).transpose()?;
        let fence_target = fence.zip(fence_value);

        let serial = match &self.inner {
            #[cfg(feature = "vulkan")]
            CommandQueueInner::Vulkan(queue) => queue.submit(submits, fence_target)?,
            CommandQueueInner::Headless(queue) => queue.submit(submits, fence_target)?,
        };

        let timeline = self.timeline();
        let mut count = 0;
        for submit in submits.iter_mut() {
            for cmd in submit.command_buffers.iter_mut() {
                cmd.mark_pending(timeline.clone(), serial);
                count += 1;
            }
        }
        if let Some((fence, value)) = fence_target {
            fence.mark_signal_target(value);
        }
        self.last_serial = serial;

        debug!(
            "Submitted {} command buffer(s) in {} batch(es) to {} queue (serial {}, fence {:?})",
            count,
            submits.len(),
            self.queue_type,
            serial,
            fence_value
        );
        Ok(SubmissionId {
            serial,
            fence_value,
        })
    }

    /// Presents an acquired swapchain image after the binary semaphores in
    /// `wait_semaphores` are signalled.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation for a timeline semaphore in the wait
    /// list or an image that was not acquired.
    pub fn present(
        &mut self,
        swapchain: &mut Swapchain,
        image_index: u32,
        wait_semaphores: &[&Semaphore],
    ) -> RhiResult<PresentOutcome> {
        const OP: &str = "CommandQueue::present";
        if wait_semaphores.iter().any(|s| s.is_timeline()) {
            return Err(RhiError::protocol_violation(
                OP,
                "presentation can only wait on binary semaphores",
            ));
        }
        swapchain.release_acquired(image_index)?;

        let outcome = match &self.inner {
            #[cfg(feature = "vulkan")]
            CommandQueueInner::Vulkan(queue) => {
                queue.present(swapchain.inner().as_vulkan()?, image_index, wait_semaphores)?
            }
            CommandQueueInner::Headless(queue) => {
                queue.present(swapchain.inner().as_headless()?, image_index, wait_semaphores)?
            }
        };

        match outcome {
            PresentOutcome::Success => {}
            PresentOutcome::Suboptimal => warn!("Present of image {} was suboptimal", image_index),
            PresentOutcome::OutOfDate => warn!("Swapchain out of date during present"),
        }
        Ok(outcome)
    }

    /// Blocks until every submission on this queue has completed.
    pub fn wait_idle(&self) -> RhiResult<()> {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            CommandQueueInner::Vulkan(queue) => queue.wait_idle(),
            CommandQueueInner::Headless(queue) => queue.wait_idle(),
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("backend", &self.backend())
            .field("queue_type", &self.queue_type)
            .field("family_index", &self.family_index)
            .field("last_serial", &self.last_serial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandBufferState, CommandPoolFlags};
    use crate::device::{Device, DeviceDesc};
    use crate::sync::SemaphoreType;
    use crate::types::CommandBufferLevel;

    #[test]
    fn test_submit_marks_pending_until_fence_wait() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let mut pool = device
            .create_command_pool(QueueType::Graphics, CommandPoolFlags::RESET_COMMAND_BUFFER)
            .unwrap();
        let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
        let fence = device.create_fence(false).unwrap();

        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();

        let id = queue.submit(&mut [cmd.into()], Some(&fence)).unwrap();
        assert_eq!(id.fence_value, Some(1));
        assert_eq!(fence.last_signaled_value(), 1);
        assert_eq!(pool.get(handle).unwrap().state(), CommandBufferState::Pending);

        fence.wait(1, None).unwrap();
        assert_eq!(pool.get(handle).unwrap().state(), CommandBufferState::Initial);
        assert!(queue.completed_serial() >= id.serial);
    }

    #[test]
    fn test_submit_rejects_non_executable() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let mut pool = device
            .create_command_pool(QueueType::Graphics, CommandPoolFlags::empty())
            .unwrap();
        let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();

        let result = queue.submit(&mut [cmd.into()], None);
        assert!(matches!(result, Err(RhiError::ProtocolViolation { .. })));
        assert_eq!(
            pool.get(handle).unwrap().state(),
            CommandBufferState::Recording
        );
    }

    #[test]
    fn test_submit_rejects_secondary() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let mut pool = device
            .create_command_pool(QueueType::Graphics, CommandPoolFlags::empty())
            .unwrap();
        let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Secondary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
        assert!(queue.submit(&mut [cmd.into()], None).is_err());
    }

    #[test]
    fn test_present_rejects_timeline_semaphore() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
        let mut swapchain = device
            .create_swapchain(&crate::swapchain::SwapchainDesc::new(64, 64))
            .unwrap();
        let timeline = device.create_semaphore(SemaphoreType::Timeline, 0).unwrap();
        let image = swapchain.acquire_next_image(None).unwrap();
        let result = queue.present(&mut swapchain, image.index, &[&timeline]);
        assert!(matches!(result, Err(RhiError::ProtocolViolation { .. })));
    }

    #[test]
    fn test_present_outcome_needs_recreation() {
        assert!(!PresentOutcome::Success.needs_recreation());
        assert!(PresentOutcome::Suboptimal.needs_recreation());
        assert!(PresentOutcome::OutOfDate.needs_recreation());
    }
}
