//! Headless fences, semaphores and queues.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use super::HeadlessEvent;
use super::gpu::{BinaryState, Counter, HeadlessGpu, PendingOp, SignalOp, WaitOp};
use super::swapchain::HeadlessSwapchain;
use crate::error::{RhiError, RhiResult};
use crate::queue::{PresentOutcome, QueueType, SubmitInfo};
use crate::sync::{Fence, Semaphore, SemaphoreType};

pub(crate) struct HeadlessFence {
    gpu: Arc<HeadlessGpu>,
    counter: Arc<Counter>,
}

impl HeadlessFence {
    pub(crate) fn new(gpu: Arc<HeadlessGpu>, initial_value: u64) -> Self {
        Self {
            gpu,
            counter: Arc::new(Counter::new(initial_value)),
        }
    }

    pub(crate) fn counter(&self) -> &Arc<Counter> {
        &self.counter
    }

    pub(crate) fn completed_value(&self) -> u64 {
        self.counter.get()
    }

    pub(crate) fn wait(&self, value: u64) -> RhiResult<()> {
        self.gpu.wait_counter(&self.counter, value, "fence")
    }

    pub(crate) fn signal(&self, value: u64) {
        self.counter.raise(value);
    }
}

pub(crate) struct HeadlessSemaphore {
    gpu: Arc<HeadlessGpu>,
    kind: SemaphoreType,
    counter: Arc<Counter>,
    binary: Arc<BinaryState>,
}

impl HeadlessSemaphore {
    pub(crate) fn new(gpu: Arc<HeadlessGpu>, kind: SemaphoreType, initial_value: u64) -> Self {
        Self {
            gpu,
            kind,
            counter: Arc::new(Counter::new(initial_value)),
            binary: Arc::new(BinaryState::default()),
        }
    }

    pub(crate) fn binary_state(&self) -> &Arc<BinaryState> {
        &self.binary
    }

    pub(crate) fn value(&self) -> u64 {
        self.counter.get()
    }

    pub(crate) fn signal(&self, value: u64) {
        self.counter.raise(value);
    }

    pub(crate) fn wait(&self, value: u64) -> RhiResult<()> {
        self.gpu.wait_counter(&self.counter, value, "timeline semaphore")
    }

    fn wait_op(&self, value: u64) -> WaitOp {
        match self.kind {
            SemaphoreType::Binary => WaitOp::Binary(self.binary.clone()),
            SemaphoreType::Timeline => WaitOp::Timeline(self.counter.clone(), value),
        }
    }

    fn signal_op(&self, value: u64) -> SignalOp {
        match self.kind {
            SemaphoreType::Binary => SignalOp::Binary(self.binary.clone()),
            SemaphoreType::Timeline => SignalOp::Timeline(self.counter.clone(), value),
        }
    }
}

/// Binary semaphore flags set while building a queue operation, undone if
/// the operation is rejected.
struct BinaryMarks {
    operation: &'static str,
    marked: Vec<(Arc<BinaryState>, bool)>,
}

impl BinaryMarks {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            marked: Vec::new(),
        }
    }

    fn wait(&mut self, state: &Arc<BinaryState>) -> RhiResult<()> {
        if !state.can_wait() {
            return Err(RhiError::protocol_violation(
                self.operation,
                "wait on a binary semaphore that has no signal pending",
            ));
        }
        state.wait_pending.store(true, Ordering::Release);
        self.marked.push((state.clone(), false));
        Ok(())
    }

    fn signal(&mut self, state: &Arc<BinaryState>) -> RhiResult<()> {
        if state.signaled.load(Ordering::Acquire) || state.signal_pending.load(Ordering::Acquire) {
            return Err(RhiError::protocol_violation(
                self.operation,
                "signal of a binary semaphore that is already signalled",
            ));
        }
        state.signal_pending.store(true, Ordering::Release);
        self.marked.push((state.clone(), true));
        Ok(())
    }

    fn rollback(self) {
        for (state, was_signal) in self.marked.into_iter().rev() {
            if was_signal {
                state.signal_pending.store(false, Ordering::Release);
            } else {
                state.wait_pending.store(false, Ordering::Release);
            }
        }
    }
}

pub(crate) struct HeadlessQueue {
    gpu: Arc<HeadlessGpu>,
    queue_type: QueueType,
    family: u32,
}

impl HeadlessQueue {
    pub(crate) fn new(gpu: Arc<HeadlessGpu>, queue_type: QueueType, family: u32) -> Self {
        Self {
            gpu,
            queue_type,
            family,
        }
    }

    pub(crate) fn gpu(&self) -> &Arc<HeadlessGpu> {
        &self.gpu
    }

    fn build_ops(
        submits: &[SubmitInfo<'_>],
        fence: Option<(&Fence, u64)>,
        marks: &mut BinaryMarks,
    ) -> RhiResult<Vec<PendingOp>> {
        let mut ops = Vec::with_capacity(submits.len().max(1));
        for submit in submits {
            let mut waits = Vec::with_capacity(submit.wait_semaphores.len());
            for wait in &submit.wait_semaphores {
                let semaphore = wait.semaphore.inner().as_headless()?;
                if !wait.semaphore.is_timeline() {
                    marks.wait(semaphore.binary_state())?;
                }
                waits.push(semaphore.wait_op(wait.value));
            }
            let mut signals = Vec::with_capacity(submit.signal_semaphores.len());
            for signal in &submit.signal_semaphores {
                let semaphore = signal.semaphore.inner().as_headless()?;
                if !signal.semaphore.is_timeline() {
                    marks.signal(semaphore.binary_state())?;
                }
                signals.push(semaphore.signal_op(signal.value));
            }
            ops.push(PendingOp {
                serial: None,
                is_present: false,
                waits,
                signals,
            });
        }
        if ops.is_empty() {
            ops.push(PendingOp {
                serial: None,
                is_present: false,
                waits: Vec::new(),
                signals: Vec::new(),
            });
        }
        if let Some((fence, value)) = fence {
            let counter = fence.inner().as_headless()?.counter().clone();
            if let Some(last) = ops.last_mut() {
                last.signals.push(SignalOp::Timeline(counter, value));
            }
        }
        Ok(ops)
    }

    pub(crate) fn submit(
        &self,
        submits: &[SubmitInfo<'_>],
        fence: Option<(&Fence, u64)>,
    ) -> RhiResult<u64> {
        let mut marks = BinaryMarks::new("CommandQueue::submit");
        let mut ops = match Self::build_ops(submits, fence, &mut marks) {
            Ok(ops) => ops,
            Err(e) => {
                marks.rollback();
                return Err(e);
            }
        };

        let command_buffers: usize = submits.iter().map(|s| s.command_buffers.len()).sum();
        let mut state = self.gpu.lock();
        let serial = state.allocate_serial();
        if let Some(last) = ops.last_mut() {
            last.serial = Some(serial);
        }
        state.pending.extend(ops);
        state.stats.submits += 1;
        state.stats.command_buffers_submitted += command_buffers as u64;
        state.record(HeadlessEvent::Submit {
            serial,
            command_buffers,
        });
        debug!(
            "headless: {} queue (family {}) accepted submission {}",
            self.queue_type, self.family, serial
        );
        Ok(serial)
    }

    pub(crate) fn present(
        &self,
        swapchain: &HeadlessSwapchain,
        image_index: u32,
        wait_semaphores: &[&Semaphore],
    ) -> RhiResult<PresentOutcome> {
        let mut marks = BinaryMarks::new("CommandQueue::present");
        let result = wait_semaphores
            .iter()
            .map(|semaphore| {
                let state = semaphore.inner().as_headless()?.binary_state().clone();
                marks.wait(&state)?;
                Ok(WaitOp::Binary(state))
            })
            .collect::<RhiResult<Vec<_>>>();
        let waits = match result {
            Ok(waits) => waits,
            Err(e) => {
                marks.rollback();
                return Err(e);
            }
        };

        let mut state = self.gpu.lock();
        state.stats.presents += 1;
        let nth = state.stats.presents;
        let outcome = match state.present_faults.remove(&nth) {
            Some(outcome) => outcome,
            None if swapchain.is_stale(&state) => PresentOutcome::OutOfDate,
            None => PresentOutcome::Success,
        };

        // The waits happen whatever the outcome.
        state.pending.push_back(PendingOp {
            serial: None,
            is_present: true,
            waits,
            signals: Vec::new(),
        });
        state.retire_ready_presents();
        if state.present_errors.remove(&nth) {
            warn!("headless: present {} of image {} failed", nth, image_index);
            return Err(RhiError::DeviceLost);
        }
        state.record(HeadlessEvent::Present {
            image: image_index,
            outcome,
        });
        Ok(outcome)
    }

    pub(crate) fn wait_idle(&self) -> RhiResult<()> {
        self.gpu.wait_idle()
    }
}
