//! Synchronization primitives.
//!
//! This module provides the two ways GPU work is ordered:
//! - [`Fence`]: a monotonically increasing completion counter the CPU can
//!   wait on. Each submission that carries a fence signals it with the next
//!   value, so "submission done" is simply "counter reached value".
//! - [`Semaphore`]: either binary (orders exactly one signal/wait pair on
//!   the GPU and is consumed by the wait) or timeline (a `u64` counter that
//!   can be queried, signalled and waited like a fence and also used inside
//!   submissions).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mango_rhi::{Device, DeviceDesc, RhiError};
//!
//! # fn main() -> Result<(), RhiError> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let fence = device.create_fence(false)?;
//! assert_eq!(fence.completed_value()?, 0);
//!
//! fence.signal(1)?;
//! fence.wait(1, Some(Duration::from_millis(10)))?;
//! assert_eq!(fence.next_signal_value()?, 2);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::headless::{HeadlessFence, HeadlessSemaphore};
use crate::types::Backend;

#[cfg(feature = "vulkan")]
use crate::vulkan::sync::{VulkanFence, VulkanSemaphore};

backend_inner!(FenceInner {
    vulkan: VulkanFence,
    headless: HeadlessFence,
});

backend_inner!(SemaphoreInner {
    vulkan: VulkanSemaphore,
    headless: HeadlessSemaphore,
});

/// CPU-waitable, GPU-signalled monotonic counter.
pub struct Fence {
    inner: FenceInner,
    /// Highest value any submission or CPU signal has targeted.
    last_signaled: AtomicU64,
}

impl Fence {
    pub(crate) fn from_inner(inner: FenceInner, initial_value: u64) -> Self {
        Self {
            inner,
            last_signaled: AtomicU64::new(initial_value),
        }
    }

    pub(crate) fn inner(&self) -> &FenceInner {
        &self.inner
    }

    /// Returns the backend this fence belongs to.
    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    /// Returns the value the GPU has reached.
    pub fn completed_value(&self) -> RhiResult<u64> {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            FenceInner::Vulkan(fence) => fence.completed_value(),
            FenceInner::Headless(fence) => Ok(fence.completed_value()),
        }
    }

    /// Blocks until the fence reaches `value`.
    ///
    /// `None` waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] if the timeout expires first.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<()> {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            FenceInner::Vulkan(fence) => fence.wait(value, timeout),
            FenceInner::Headless(fence) => fence.wait(value),
        }
    }

    /// Signals the fence from the CPU.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation unless `value` exceeds every value
    /// already reached or targeted.
    pub fn signal(&self, value: u64) -> RhiResult<()> {
        let floor = self.completed_value()?.max(self.last_signaled_value());
        if value <= floor {
            return Err(RhiError::protocol_violation(
                "Fence::signal",
                format!("value {} does not exceed current value {}", value, floor),
            ));
        }

        match &self.inner {
            #[cfg(feature = "vulkan")]
            FenceInner::Vulkan(fence) => fence.signal(value)?,
            FenceInner::Headless(fence) => fence.signal(value),
        }
        self.mark_signal_target(value);
        Ok(())
    }

    /// Highest value any submission or signal has targeted.
    #[inline]
    pub fn last_signaled_value(&self) -> u64 {
        self.last_signaled.load(Ordering::Acquire)
    }

    /// Value the next submission carrying this fence will signal.
    ///
    /// This is `completed + 1` whenever nothing is outstanding.
    pub fn next_signal_value(&self) -> RhiResult<u64> {
        Ok(self.completed_value()?.max(self.last_signaled_value()) + 1)
    }

    pub(crate) fn mark_signal_target(&self, value: u64) {
        self.last_signaled.fetch_max(value, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("backend", &self.backend())
            .field("last_signaled", &self.last_signaled_value())
            .finish()
    }
}

/// Semaphore flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemaphoreType {
    /// One signal, one wait, no value.
    Binary,
    /// `u64` counter usable from CPU and GPU.
    Timeline,
}

/// GPU-GPU (and, for timeline semaphores, CPU-GPU) ordering primitive.
pub struct Semaphore {
    inner: SemaphoreInner,
    kind: SemaphoreType,
}

impl Semaphore {
    pub(crate) fn from_inner(inner: SemaphoreInner, kind: SemaphoreType) -> Self {
        debug!("Created {:?} semaphore ({})", kind, inner.backend());
        Self { inner, kind }
    }

    pub(crate) fn inner(&self) -> &SemaphoreInner {
        &self.inner
    }

    #[inline]
    pub fn kind(&self) -> SemaphoreType {
        self.kind
    }

    #[inline]
    pub fn is_timeline(&self) -> bool {
        self.kind == SemaphoreType::Timeline
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    fn require_timeline(&self, operation: &'static str) -> RhiResult<()> {
        if self.is_timeline() {
            Ok(())
        } else {
            Err(RhiError::protocol_violation(
                operation,
                "binary semaphores have no value",
            ))
        }
    }

    /// Current counter value of a timeline semaphore.
    pub fn value(&self) -> RhiResult<u64> {
        self.require_timeline("Semaphore::value")?;
        match &self.inner {
            #[cfg(feature = "vulkan")]
            SemaphoreInner::Vulkan(semaphore) => semaphore.value(),
            SemaphoreInner::Headless(semaphore) => Ok(semaphore.value()),
        }
    }

    /// Signals a timeline semaphore from the CPU.
    pub fn signal(&self, value: u64) -> RhiResult<()> {
        self.require_timeline("Semaphore::signal")?;
        let current = self.value()?;
        if value <= current {
            return Err(RhiError::protocol_violation(
                "Semaphore::signal",
                format!("value {} does not exceed current value {}", value, current),
            ));
        }
        match &self.inner {
            #[cfg(feature = "vulkan")]
            SemaphoreInner::Vulkan(semaphore) => semaphore.signal(value),
            SemaphoreInner::Headless(semaphore) => {
                semaphore.signal(value);
                Ok(())
            }
        }
    }

    /// Blocks until a timeline semaphore reaches `value`.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<()> {
        self.require_timeline("Semaphore::wait")?;
        match &self.inner {
            #[cfg(feature = "vulkan")]
            SemaphoreInner::Vulkan(semaphore) => semaphore.wait(value, timeout),
            SemaphoreInner::Headless(semaphore) => {
                let _ = timeout;
                semaphore.wait(value)
            }
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("backend", &self.backend())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Converts an optional timeout into the nanosecond form the backends use.
#[cfg_attr(not(feature = "vulkan"), allow(dead_code))]
pub(crate) fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout
        .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceDesc};

    fn device() -> std::sync::Arc<Device> {
        Device::new(&DeviceDesc::headless(), None).unwrap()
    }

    #[test]
    fn test_fence_initial_values() {
        let device = device();
        let unsignaled = device.create_fence(false).unwrap();
        assert_eq!(unsignaled.completed_value().unwrap(), 0);
        assert_eq!(unsignaled.next_signal_value().unwrap(), 1);

        let signaled = device.create_fence(true).unwrap();
        assert_eq!(signaled.completed_value().unwrap(), 1);
        assert_eq!(signaled.next_signal_value().unwrap(), 2);
    }

    #[test]
    fn test_fence_cpu_signal_must_increase() {
        let device = device();
        let fence = device.create_fence(false).unwrap();
        fence.signal(3).unwrap();
        assert_eq!(fence.completed_value().unwrap(), 3);
        assert!(matches!(
            fence.signal(3),
            Err(RhiError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            fence.signal(2),
            Err(RhiError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_fence_wait_on_unreachable_value_times_out() {
        let device = device();
        let fence = device.create_fence(false).unwrap();
        let result = fence.wait(1, Some(Duration::from_millis(1)));
        assert!(matches!(result, Err(RhiError::Timeout)));
    }

    #[test]
    fn test_binary_semaphore_has_no_value() {
        let device = device();
        let semaphore = device.create_semaphore(SemaphoreType::Binary, 0).unwrap();
        assert!(matches!(
            semaphore.value(),
            Err(RhiError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            semaphore.signal(1),
            Err(RhiError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            semaphore.wait(1, None),
            Err(RhiError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_timeline_semaphore_signal_and_wait() {
        let device = device();
        let semaphore = device.create_semaphore(SemaphoreType::Timeline, 5).unwrap();
        assert_eq!(semaphore.value().unwrap(), 5);
        semaphore.signal(7).unwrap();
        semaphore.wait(6, None).unwrap();
        assert_eq!(semaphore.value().unwrap(), 7);
    }

    #[test]
    fn test_timeout_nanos() {
        assert_eq!(timeout_nanos(None), u64::MAX);
        assert_eq!(timeout_nanos(Some(Duration::from_micros(2))), 2_000);
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
        assert_send_sync::<Semaphore>();
    }
}
