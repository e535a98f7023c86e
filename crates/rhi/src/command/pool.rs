use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use tracing::debug;

use super::buffer::{CommandBuffer, CommandBufferInner};
use crate::error::{RhiError, RhiResult};
use crate::headless::HeadlessCommandPool;
use crate::queue::QueueType;
use crate::types::{Backend, CommandBufferLevel};

#[cfg(feature = "vulkan")]
use crate::vulkan::command::VulkanCommandPool;

backend_inner!(CommandPoolInner {
    vulkan: VulkanCommandPool,
    headless: HeadlessCommandPool,
});

bitflags! {
    /// Creation flags of a [`CommandPool`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CommandPoolFlags: u32 {
        /// Buffers are short-lived and re-recorded often.
        const TRANSIENT = 0x1;
        /// Buffers may be reset (explicitly or by `begin`) one at a time.
        const RESET_COMMAND_BUFFER = 0x2;
    }
}

/// Source of unique pool ids, so handles from one pool are rejected by
/// every other pool.
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Generation-checked reference to a command buffer inside a [`CommandPool`].
///
/// Handles are plain values. Freeing the buffer bumps the slot generation,
/// so a handle kept past `free_command_buffer` is reported as stale instead
/// of reaching whichever buffer reuses the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommandBufferHandle {
    pool: u32,
    index: u32,
    generation: u32,
}

impl CommandBufferHandle {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct PoolSlot {
    generation: u32,
    buffer: Option<CommandBuffer>,
}

/// Arena of command buffers allocated from one backend pool.
pub struct CommandPool {
    // Declared before `inner` so buffers drop before the backend pool.
    slots: Vec<PoolSlot>,
    free_list: Vec<u32>,
    inner: CommandPoolInner,
    id: u32,
    queue_type: QueueType,
    flags: CommandPoolFlags,
    reset_epoch: u64,
}

impl CommandPool {
    pub(crate) fn from_inner(
        inner: CommandPoolInner,
        queue_type: QueueType,
        flags: CommandPoolFlags,
    ) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Created command pool #{} for {:?} queue ({:?})",
            id, queue_type, flags
        );
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            inner,
            id,
            queue_type,
            flags,
            reset_epoch: 0,
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
    pub fn flags(&self) -> CommandPoolFlags {
        self.flags
    }

    /// Number of pool-wide resets performed so far.
    #[inline]
    pub fn reset_epoch(&self) -> u64 {
        self.reset_epoch
    }

    /// Number of allocated (not freed) command buffers.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.buffer.is_some()).count()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocates a command buffer in the `Initial` state.
    pub fn allocate_command_buffer(
        &mut self,
        level: CommandBufferLevel,
    ) -> RhiResult<CommandBufferHandle> {
        let inner = match &self.inner {
            #[cfg(feature = "vulkan")]
            CommandPoolInner::Vulkan(pool) => CommandBufferInner::Vulkan(pool.allocate(level)?),
            CommandPoolInner::Headless(pool) => CommandBufferInner::Headless(pool.allocate(level)),
        };
        let resettable = self.flags.contains(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let buffer = CommandBuffer::new(inner, level, resettable);

        let index = match self.free_list.pop() {
            Some(index) => {
                self.slots[index as usize].buffer = Some(buffer);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| {
                    RhiError::ResourceCreation("command pool slot space exhausted".to_string())
                })?;
                self.slots.push(PoolSlot {
                    generation: 0,
                    buffer: Some(buffer),
                });
                index
            }
        };

        let handle = CommandBufferHandle {
            pool: self.id,
            index,
            generation: self.slots[index as usize].generation,
        };
        debug!(
            "Allocated {:?} command buffer {}:{} in pool #{}",
            level, handle.index, handle.generation, self.id
        );
        Ok(handle)
    }

    /// Frees a command buffer and invalidates every copy of its handle.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StaleHandle`] for a freed or foreign handle and a
    /// protocol violation while the buffer is `Pending`.
    pub fn free_command_buffer(&mut self, handle: CommandBufferHandle) -> RhiResult<()> {
        self.get_mut(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        if slot.buffer.as_mut().is_some_and(CommandBuffer::is_pending) {
            return Err(RhiError::protocol_violation(
                "CommandPool::free_command_buffer",
                "command buffer is still pending on the GPU",
            ));
        }

        if let Some(buffer) = slot.buffer.take() {
            match (&self.inner, buffer) {
                #[cfg(feature = "vulkan")]
                (CommandPoolInner::Vulkan(pool), buffer) => {
                    pool.free(buffer.inner().as_vulkan()?);
                }
                (CommandPoolInner::Headless(_), _) => {}
            }
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        debug!(
            "Freed command buffer {}:{} in pool #{}",
            handle.index, handle.generation, self.id
        );
        Ok(())
    }

    // =========================================================================
    // Access
    // =========================================================================

    fn check(&self, handle: CommandBufferHandle) -> RhiResult<usize> {
        let stale = RhiError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
        };
        if handle.pool != self.id {
            return Err(stale);
        }
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.buffer.is_some() => {
                Ok(handle.index as usize)
            }
            _ => Err(stale),
        }
    }

    /// Returns the command buffer behind `handle`.
    pub fn get(&self, handle: CommandBufferHandle) -> RhiResult<&CommandBuffer> {
        let index = self.check(handle)?;
        self.slots[index].buffer.as_ref().ok_or(RhiError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
        })
    }

    /// Returns the command buffer behind `handle` for recording.
    pub fn get_mut(&mut self, handle: CommandBufferHandle) -> RhiResult<&mut CommandBuffer> {
        let index = self.check(handle)?;
        let buffer = self.slots[index].buffer.as_mut().ok_or(RhiError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
        })?;
        buffer.refresh();
        Ok(buffer)
    }

    /// Returns several distinct command buffers at once, for example to
    /// record secondaries and the primary that executes them.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StaleHandle`] for any invalid handle and a
    /// protocol violation when the same handle appears twice.
    pub fn get_many_mut<const N: usize>(
        &mut self,
        handles: [CommandBufferHandle; N],
    ) -> RhiResult<[&mut CommandBuffer; N]> {
        for (i, handle) in handles.iter().enumerate() {
            self.check(*handle)?;
            if handles[..i].iter().any(|other| other.index == handle.index) {
                return Err(RhiError::protocol_violation(
                    "CommandPool::get_many_mut",
                    format!("handle for slot {} requested twice", handle.index),
                ));
            }
        }

        let mut found: Vec<Option<&mut CommandBuffer>> = (0..N).map(|_| None).collect();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(position) = handles.iter().position(|h| h.index as usize == index) {
                found[position] = slot.buffer.as_mut();
            }
        }

        let buffers: Vec<&mut CommandBuffer> = found
            .into_iter()
            .zip(handles.iter())
            .map(|(buffer, handle)| {
                buffer.ok_or(RhiError::StaleHandle {
                    index: handle.index,
                    generation: handle.generation,
                })
            })
            .collect::<RhiResult<_>>()?;

        let mut buffers: [&mut CommandBuffer; N] = buffers.try_into().map_err(|_| {
            RhiError::protocol_violation("CommandPool::get_many_mut", "handle count mismatch")
        })?;
        for buffer in buffers.iter_mut() {
            buffer.refresh();
        }
        Ok(buffers)
    }

    /// Iterates over every live command buffer with its handle.
    pub fn iter(&self) -> impl Iterator<Item = (CommandBufferHandle, &CommandBuffer)> {
        let pool = self.id;
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            slot.buffer.as_ref().map(|buffer| {
                (
                    CommandBufferHandle {
                        pool,
                        index: index as u32,
                        generation: slot.generation,
                    },
                    buffer,
                )
            })
        })
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Resets the whole pool: every live buffer returns to `Initial` and
    /// forgets its bound state. Handles stay valid.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation while any buffer is `Pending`.
    pub fn reset(&mut self) -> RhiResult<()> {
        let pending = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.buffer.as_mut())
            .filter_map(|buffer| buffer.is_pending().then_some(()))
            .count();
        if pending > 0 {
            return Err(RhiError::protocol_violation(
                "CommandPool::reset",
                format!("{} command buffer(s) still pending", pending),
            ));
        }

        match &self.inner {
            #[cfg(feature = "vulkan")]
            CommandPoolInner::Vulkan(pool) => pool.reset()?,
            CommandPoolInner::Headless(_) => {}
        }

        for buffer in self.slots.iter_mut().filter_map(|slot| slot.buffer.as_mut()) {
            buffer.reset_by_pool();
        }
        self.reset_epoch += 1;
        debug!(
            "Reset command pool #{} (epoch {})",
            self.id, self.reset_epoch
        );
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        debug!(
            "Destroying command pool #{} ({} live buffers)",
            self.id,
            self.live_count()
        );
    }
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("id", &self.id)
            .field("backend", &self.backend())
            .field("queue_type", &self.queue_type)
            .field("flags", &self.flags)
            .field("live", &self.live_count())
            .field("reset_epoch", &self.reset_epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBufferState;
    use crate::device::{Device, DeviceDesc};

    fn pool(flags: CommandPoolFlags) -> (std::sync::Arc<Device>, CommandPool) {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let pool = device.create_command_pool(QueueType::Graphics, flags).unwrap();
        (device, pool)
    }

    #[test]
    fn test_allocate_and_get() {
        let (_device, mut pool) = pool(CommandPoolFlags::empty());
        let a = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let b = pool.allocate_command_buffer(CommandBufferLevel::Secondary).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.get(a).unwrap().level(), CommandBufferLevel::Primary);
        assert_eq!(pool.get(b).unwrap().level(), CommandBufferLevel::Secondary);
        assert_eq!(pool.get(a).unwrap().state(), CommandBufferState::Initial);
    }

    #[test]
    fn test_freed_handle_is_stale_after_slot_reuse() {
        let (_device, mut pool) = pool(CommandPoolFlags::empty());
        let old = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        pool.free_command_buffer(old).unwrap();
        assert!(matches!(pool.get(old), Err(RhiError::StaleHandle { .. })));

        let new = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(matches!(pool.get_mut(old), Err(RhiError::StaleHandle { .. })));
        assert!(pool.get(new).is_ok());

        // Double free is also caught.
        assert!(matches!(
            pool.free_command_buffer(old),
            Err(RhiError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let (device, mut first) = pool(CommandPoolFlags::empty());
        let mut second = device
            .create_command_pool(QueueType::Graphics, CommandPoolFlags::empty())
            .unwrap();
        let handle = first.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        second.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        assert!(matches!(second.get(handle), Err(RhiError::StaleHandle { .. })));
    }

    #[test]
    fn test_reset_returns_buffers_to_initial() {
        let (_device, mut pool) = pool(CommandPoolFlags::empty());
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        {
            let cmd = pool.get_mut(handle).unwrap();
            cmd.begin().unwrap();
            cmd.end().unwrap();
        }
        assert_eq!(pool.reset_epoch(), 0);
        pool.reset().unwrap();
        assert_eq!(pool.reset_epoch(), 1);

        let cmd = pool.get_mut(handle).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        cmd.begin().unwrap();
    }

    #[test]
    fn test_get_many_mut_rejects_duplicates() {
        let (_device, mut pool) = pool(CommandPoolFlags::empty());
        let a = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let b = pool.allocate_command_buffer(CommandBufferLevel::Secondary).unwrap();

        let [primary, secondary] = pool.get_many_mut([a, b]).unwrap();
        assert_eq!(primary.level(), CommandBufferLevel::Primary);
        assert_eq!(secondary.level(), CommandBufferLevel::Secondary);

        assert!(matches!(
            pool.get_many_mut([a, a]),
            Err(RhiError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_iter_yields_live_buffers() {
        let (_device, mut pool) = pool(CommandPoolFlags::empty());
        let a = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let b = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        pool.free_command_buffer(a).unwrap();
        let handles: Vec<_> = pool.iter().map(|(handle, _)| handle).collect();
        assert_eq!(handles, vec![b]);
    }
}
