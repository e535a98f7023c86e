//! Frame-in-flight slots and their synchronization.
//!
//! The [`FrameManager`] owns `N` frame slots. Each slot has its own primary
//! command buffer, a fence and two binary semaphores, so the CPU can record
//! slot `i + 1` while the GPU still executes slot `i`:
//!
//! 1. While the GPU renders frame N, the CPU prepares frame N+1
//! 2. Each slot has its own resources to avoid contention
//! 3. Fences ensure the CPU doesn't overwrite resources still in use
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on the slot fence for the value of its previous submission
//! 2. Acquire swapchain image (signals image_available)
//! 3. Record commands into the slot command buffer
//! 4. Submit:
//!    - wait on image_available at COLOR_ATTACHMENT_OUTPUT
//!    - signal render_finished
//!    - signal the slot fence with its next value
//! 5. Present (waits on render_finished)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mango_renderer::frame_manager::FrameManager;
//! use mango_rhi::{Device, DeviceDesc, QueueType, SwapchainDesc};
//!
//! # fn example() -> mango_rhi::RhiResult<()> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let mut queue = device.create_command_queue(QueueType::Graphics)?;
//! let mut swapchain = device.create_swapchain(&SwapchainDesc::new(1280, 720))?;
//! let mut frames = FrameManager::new(device.clone(), 2)?;
//!
//! loop {
//!     // Wait for the previous frame using this slot to complete
//!     frames.wait_for_frame()?;
//!
//!     let Some(image) = frames.acquire_next_image(&mut swapchain)? else {
//!         // Swapchain out of date: recreate it and try again
//!         break;
//!     };
//!
//!     let cmd = frames.command_buffer_mut()?;
//!     cmd.begin()?;
//!     // Record rendering commands...
//!     cmd.end()?;
//!
//!     frames.submit(&mut queue)?;
//!     let outcome = frames.present(&mut queue, &mut swapchain, image.index)?;
//!     frames.next_frame();
//!     if outcome.needs_recreation() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use mango_rhi::{
    AcquiredImage, CommandBuffer, CommandBufferHandle, CommandBufferLevel, CommandBufferState,
    CommandPool, CommandPoolFlags, CommandQueue, Device, Fence, PipelineStages, PresentOutcome,
    QueueType, RhiError, RhiResult, SemaphoreSignal, SemaphoreType, SemaphoreWait, Semaphore,
    SubmissionId, SubmitInfo, Swapchain,
};

/// Resources owned by one frame-in-flight slot.
pub struct FrameSlot {
    /// Primary command buffer in the manager's pool.
    command_buffer: CommandBufferHandle,
    /// Signalled by the GPU when this slot's submission finishes.
    fence: Fence,
    /// Fence value of the last submission from this slot; 0 before the
    /// first one.
    fence_value: u64,
    /// Signalled when the acquired swapchain image is ready.
    image_available: Semaphore,
    /// Signalled when rendering is complete; presentation waits on it.
    render_finished: Semaphore,
}

impl FrameSlot {
    fn new(device: &Device, pool: &mut CommandPool) -> RhiResult<Self> {
        let command_buffer = pool.allocate_command_buffer(CommandBufferLevel::Primary)?;
        // Unsignalled: the first wait is skipped via fence_value == 0.
        let fence = device.create_fence(false)?;
        let image_available = device.create_semaphore(SemaphoreType::Binary, 0)?;
        let render_finished = device.create_semaphore(SemaphoreType::Binary, 0)?;

        Ok(Self {
            command_buffer,
            fence,
            fence_value: 0,
            image_available,
            render_finished,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Fence value the next reuse of this slot has to wait for.
    #[inline]
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }
}

/// Rotates through frame slots and drives their synchronization.
pub struct FrameManager {
    slots: Vec<FrameSlot>,
    pool: CommandPool,
    current: usize,
    device: Arc<Device>,
}

impl FrameManager {
    /// Creates `frames_in_flight` slots with command buffers from a new
    /// graphics pool.
    ///
    /// # Errors
    ///
    /// Returns an error if `frames_in_flight` is zero or any resource
    /// creation fails.
    pub fn new(device: Arc<Device>, frames_in_flight: usize) -> RhiResult<Self> {
        if frames_in_flight == 0 {
            return Err(RhiError::InvalidDescription(
                "at least one frame in flight is required".to_string(),
            ));
        }

        let mut pool = device.create_command_pool(
            QueueType::Graphics,
            CommandPoolFlags::RESET_COMMAND_BUFFER,
        )?;
        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot::new(&device, &mut pool))
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Frame manager initialized with {} frames in flight", frames_in_flight);

        Ok(Self {
            slots,
            pool,
            current: 0,
            device,
        })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the current slot, in `0..frames_in_flight`.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    #[inline]
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    #[inline]
    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }

    /// Blocks until the previous submission from the current slot has
    /// finished. Returns immediately for a slot that was never submitted.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] when the GPU does not finish, or the
    /// device error that interrupted the wait.
    pub fn wait_for_frame(&self) -> RhiResult<()> {
        let slot = &self.slots[self.current];
        if slot.fence_value == 0 {
            return Ok(());
        }
        debug!("Waiting for frame {} (fence value {})", self.current, slot.fence_value);
        slot.fence.wait(slot.fence_value, None)
    }

    /// Acquires the next swapchain image, signalling the current slot's
    /// `image_available` semaphore.
    ///
    /// Returns `None` when the swapchain is out of date and must be
    /// recreated before another acquire.
    pub fn acquire_next_image(&mut self, swapchain: &mut Swapchain) -> RhiResult<Option<AcquiredImage>> {
        let slot = &self.slots[self.current];
        match swapchain.acquire_next_image(Some(&slot.image_available)) {
            Ok(image) => Ok(Some(image)),
            Err(RhiError::SwapchainOutOfDate) => {
                debug!("Swapchain out of date during acquire");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Command buffer of the current slot.
    pub fn command_buffer_mut(&mut self) -> RhiResult<&mut CommandBuffer> {
        let handle = self.slots[self.current].command_buffer;
        self.pool.get_mut(handle)
    }

    /// Submits the current slot's command buffer.
    ///
    /// Waits on `image_available` at the color attachment output stage,
    /// signals `render_finished` and the slot fence. The fence value is
    /// remembered for the next [`FrameManager::wait_for_frame`] on this slot.
    pub fn submit(&mut self, queue: &mut CommandQueue) -> RhiResult<SubmissionId> {
        let slot = &mut self.slots[self.current];
        let cmd = self.pool.get_mut(slot.command_buffer)?;

        let mut submits = [SubmitInfo::new()
            .command_buffer(cmd)
            .wait(SemaphoreWait::binary(
                &slot.image_available,
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            ))
            .signal(SemaphoreSignal::binary(&slot.render_finished))];
        let id = queue.submit(&mut submits, Some(&slot.fence))?;

        if let Some(value) = id.fence_value {
            slot.fence_value = value;
        }
        debug!(
            "Frame {} submitted (serial {}, fence value {})",
            self.current, id.serial, slot.fence_value
        );
        Ok(id)
    }

    /// Presents `image_index` once the current slot's rendering finished.
    pub fn present(
        &mut self,
        queue: &mut CommandQueue,
        swapchain: &mut Swapchain,
        image_index: u32,
    ) -> RhiResult<PresentOutcome> {
        let slot = &self.slots[self.current];
        queue.present(swapchain, image_index, &[&slot.render_finished])
    }

    /// Advances to the next slot.
    #[inline]
    pub fn next_frame(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Drops whatever the current slot's command buffer recorded.
    ///
    /// Used when a frame is abandoned between begin and submit.
    pub fn abandon_current(&mut self) -> RhiResult<()> {
        let index = self.current;
        let cmd = self.command_buffer_mut()?;
        match cmd.state() {
            CommandBufferState::Recording | CommandBufferState::Executable => {
                warn!("Abandoning frame {}", index);
                cmd.reset()
            }
            _ => Ok(()),
        }
    }

    /// Replaces every slot's binary semaphores.
    ///
    /// An acquire whose frame was never submitted leaves `image_available`
    /// signalled with no waiter. The device must be idle.
    pub fn recreate_semaphores(&mut self) -> RhiResult<()> {
        for slot in &mut self.slots {
            slot.image_available = self.device.create_semaphore(SemaphoreType::Binary, 0)?;
            slot.render_finished = self.device.create_semaphore(SemaphoreType::Binary, 0)?;
        }
        debug!("Recreated semaphores for {} frame slots", self.slots.len());
        Ok(())
    }
}

impl Drop for FrameManager {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("Failed to wait for device idle while dropping frame manager: {}", e);
        }
        debug!("Frame manager destroyed");
    }
}

#[cfg(test)]
mod tests {
    use mango_rhi::{DeviceDesc, ErrorKind, SwapchainDesc};

    use super::*;

    fn record_empty(frames: &mut FrameManager) {
        let cmd = frames.command_buffer_mut().unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
    }

    #[test]
    fn test_zero_frames_is_rejected() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let err = FrameManager::new(device, 0).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_slots_rotate_and_remember_fence_values() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
        let mut swapchain = device.create_swapchain(&SwapchainDesc::new(640, 480)).unwrap();
        let mut frames = FrameManager::new(device.clone(), 2).unwrap();
        assert_eq!(frames.pool().live_count(), 2);

        for expected_slot in [0, 1, 0] {
            assert_eq!(frames.current_index(), expected_slot);
            frames.wait_for_frame().unwrap();
            let image = frames.acquire_next_image(&mut swapchain).unwrap().unwrap();
            record_empty(&mut frames);
            frames.submit(&mut queue).unwrap();
            let outcome = frames.present(&mut queue, &mut swapchain, image.index).unwrap();
            assert_eq!(outcome, PresentOutcome::Success);
            frames.next_frame();
        }

        assert_eq!(frames.slots()[0].fence_value(), 2);
        assert_eq!(frames.slots()[1].fence_value(), 1);
    }

    #[test]
    fn test_out_of_date_acquire_returns_none() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let controller = device.headless_controller().unwrap();
        let mut swapchain = device.create_swapchain(&SwapchainDesc::new(640, 480)).unwrap();
        let mut frames = FrameManager::new(device.clone(), 2).unwrap();

        controller.inject_acquire_fault(1, mango_rhi::headless::AcquireFault::OutOfDate);
        assert!(frames.acquire_next_image(&mut swapchain).unwrap().is_none());
        assert!(frames.acquire_next_image(&mut swapchain).unwrap().is_some());
    }

    #[test]
    fn test_abandon_resets_recorded_commands() {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let mut frames = FrameManager::new(device, 1).unwrap();
        frames.command_buffer_mut().unwrap().begin().unwrap();

        frames.abandon_current().unwrap();
        assert_eq!(
            frames.command_buffer_mut().unwrap().state(),
            CommandBufferState::Initial
        );
        // Nothing to abandon the second time.
        frames.abandon_current().unwrap();
    }
}
