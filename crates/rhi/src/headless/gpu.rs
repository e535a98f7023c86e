//! Simulated GPU timeline shared by every headless object of one device.
//!
//! Submissions and presents are queued in order and retired lazily: a
//! CPU wait retires the front of the queue until its condition holds. An
//! operation whose semaphore waits cannot be satisfied blocks the queue, and
//! the CPU wait reports [`RhiError::Timeout`] instead of hanging.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{AcquireFault, HeadlessEvent, HeadlessStats};
use crate::error::{RhiError, RhiResult};
use crate::queue::PresentOutcome;
use crate::types::Extent2D;

/// Monotonic counter backing fences and timeline semaphores.
#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    #[inline]
    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn raise(&self, value: u64) {
        self.0.fetch_max(value, Ordering::AcqRel);
    }
}

/// Signal bookkeeping of a binary semaphore.
#[derive(Debug, Default)]
pub(crate) struct BinaryState {
    pub(crate) signaled: AtomicBool,
    /// A queued operation will signal it.
    pub(crate) signal_pending: AtomicBool,
    /// A queued operation will consume the signal.
    pub(crate) wait_pending: AtomicBool,
}

impl BinaryState {
    /// No signal or wait is outstanding, so the semaphore may be signalled.
    pub(crate) fn is_idle(&self) -> bool {
        !self.signaled.load(Ordering::Acquire)
            && !self.signal_pending.load(Ordering::Acquire)
            && !self.wait_pending.load(Ordering::Acquire)
    }

    /// A signal exists or is queued, so a wait can be enqueued.
    pub(crate) fn can_wait(&self) -> bool {
        (self.signaled.load(Ordering::Acquire) || self.signal_pending.load(Ordering::Acquire))
            && !self.wait_pending.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum WaitOp {
    Binary(Arc<BinaryState>),
    Timeline(Arc<Counter>, u64),
}

impl WaitOp {
    fn is_satisfied(&self) -> bool {
        match self {
            WaitOp::Binary(state) => state.signaled.load(Ordering::Acquire),
            WaitOp::Timeline(counter, value) => counter.get() >= *value,
        }
    }

    fn consume(&self) {
        if let WaitOp::Binary(state) = self {
            state.signaled.store(false, Ordering::Release);
            state.wait_pending.store(false, Ordering::Release);
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum SignalOp {
    Binary(Arc<BinaryState>),
    Timeline(Arc<Counter>, u64),
}

impl SignalOp {
    fn apply(&self) {
        match self {
            SignalOp::Binary(state) => {
                state.signal_pending.store(false, Ordering::Release);
                state.signaled.store(true, Ordering::Release);
            }
            SignalOp::Timeline(counter, value) => counter.raise(*value),
        }
    }
}

/// One queued unit of simulated GPU work.
#[derive(Debug)]
pub(crate) struct PendingOp {
    /// Submission serial, on the last batch of a submit only.
    pub(crate) serial: Option<u64>,
    pub(crate) is_present: bool,
    pub(crate) waits: Vec<WaitOp>,
    pub(crate) signals: Vec<SignalOp>,
}

impl PendingOp {
    fn is_ready(&self) -> bool {
        self.waits.iter().all(WaitOp::is_satisfied)
    }

    fn retire(self) -> Option<u64> {
        for wait in &self.waits {
            wait.consume();
        }
        for signal in &self.signals {
            signal.apply();
        }
        self.serial
    }
}

/// Mutable simulator state.
#[derive(Debug, Default)]
pub(crate) struct GpuState {
    pub(crate) next_serial: u64,
    pub(crate) completed_serial: u64,
    pub(crate) pending: VecDeque<PendingOp>,
    pub(crate) stalled: bool,
    pub(crate) stats: HeadlessStats,
    /// Most recent events, oldest first, at most `event_capacity` long.
    pub(crate) events: VecDeque<HeadlessEvent>,
    pub(crate) event_capacity: usize,
    pub(crate) acquire_faults: BTreeMap<u64, AcquireFault>,
    pub(crate) present_faults: BTreeMap<u64, PresentOutcome>,
    pub(crate) present_errors: BTreeSet<u64>,
    pub(crate) surface_extent: Option<Extent2D>,
    pub(crate) next_object_id: u64,
}

impl GpuState {
    pub(crate) fn record(&mut self, event: HeadlessEvent) {
        debug!("headless: {:?}", event);
        if self.event_capacity == 0 {
            return;
        }
        if self.events.len() == self.event_capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub(crate) fn allocate_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_object_id += 1;
        self.next_object_id
    }

    fn retire_front(&mut self) {
        if let Some(op) = self.pending.pop_front() {
            if let Some(serial) = op.retire() {
                self.completed_serial = serial;
                self.stats.retired_submissions += 1;
                self.record(HeadlessEvent::Retired { serial });
            }
        }
        self.retire_ready_presents();
    }

    /// Presents complete as soon as the work they wait on has.
    pub(crate) fn retire_ready_presents(&mut self) {
        if self.stalled {
            return;
        }
        while self
            .pending
            .front()
            .is_some_and(|op| op.is_present && op.is_ready())
        {
            if let Some(op) = self.pending.pop_front() {
                op.retire();
            }
        }
    }

    /// Retires queued operations in order until `done` holds.
    ///
    /// Returns false when the queue is stalled, empty or blocked on an
    /// unsatisfiable wait before `done` holds.
    pub(crate) fn retire_until(&mut self, mut done: impl FnMut(&GpuState) -> bool) -> bool {
        loop {
            if done(self) {
                return true;
            }
            if self.stalled {
                return false;
            }
            match self.pending.front() {
                Some(op) if op.is_ready() => self.retire_front(),
                Some(_) => {
                    warn!("headless: queued operation waits on a semaphore that is never signalled");
                    return false;
                }
                None => return false,
            }
        }
    }
}

/// The simulated GPU of one headless device.
#[derive(Debug)]
pub struct HeadlessGpu {
    state: Mutex<GpuState>,
}

impl HeadlessGpu {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::with_event_capacity(super::DEFAULT_EVENT_CAPACITY)
    }

    /// Keeps at most `event_capacity` events; zero disables the event log.
    pub(crate) fn with_event_capacity(event_capacity: usize) -> Self {
        Self {
            state: Mutex::new(GpuState {
                event_capacity,
                ..GpuState::default()
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Highest submission serial that has retired.
    pub fn completed_serial(&self) -> u64 {
        self.lock().completed_serial
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.lock().next_id()
    }

    /// Retires work until `counter` reaches `value`.
    pub(crate) fn wait_counter(&self, counter: &Counter, value: u64, what: &str) -> RhiResult<()> {
        let mut state = self.lock();
        let reached = state.retire_until(|_| counter.get() >= value);
        state.stats.waits += 1;
        state.record(HeadlessEvent::Wait {
            value,
            reached,
        });
        if reached {
            Ok(())
        } else {
            if !state.stalled {
                warn!(
                    "headless: {} wait for value {} can never complete (current {})",
                    what,
                    value,
                    counter.get()
                );
            }
            Err(RhiError::Timeout)
        }
    }

    /// Retires everything queued.
    pub(crate) fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.lock();
        if state.retire_until(|s| s.pending.is_empty()) {
            Ok(())
        } else {
            Err(RhiError::Timeout)
        }
    }
}
