//! Vulkan backend over `ash`, with memory from `gpu-allocator`.
//!
//! Every object keeps an `Arc<VulkanContext>` so the logical device, the
//! allocator and the surface outlive whatever was created from them. Fences
//! and queue timelines are Vulkan 1.2 timeline semaphores.

pub(crate) mod command;
pub(crate) mod conv;
pub(crate) mod descriptor;
pub(crate) mod device;
pub(crate) mod instance;
pub(crate) mod physical_device;
pub(crate) mod pipeline;
pub(crate) mod queue;
pub(crate) mod resource;
pub(crate) mod swapchain;
pub(crate) mod sync;

use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use tracing::{error, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SurfaceSupport;

use instance::Instance;
use physical_device::PhysicalDevice;

/// State shared by every Vulkan object of one device.
pub(crate) struct VulkanContext {
    instance: Instance,
    physical: PhysicalDevice,
    device: ash::Device,
    allocator: Mutex<Option<Allocator>>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    present_queue: vk::Queue,
    // vkQueueSubmit, vkQueuePresentKHR and vkDeviceWaitIdle need external
    // synchronization of the queues they touch.
    queue_lock: Mutex<()>,
}

// Safety: every Vulkan handle here is externally synchronized through
// `queue_lock`, the allocator mutex, or the `&mut` receivers of the objects
// that own it.
unsafe impl Send for VulkanContext {}
unsafe impl Sync for VulkanContext {}

impl VulkanContext {
    #[inline]
    pub(crate) fn device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub(crate) fn instance(&self) -> &ash::Instance {
        self.instance.handle()
    }

    #[inline]
    pub(crate) fn physical(&self) -> &PhysicalDevice {
        &self.physical
    }

    #[inline]
    pub(crate) fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    pub(crate) fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    #[inline]
    pub(crate) fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    #[inline]
    pub(crate) fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub(crate) fn lock_queues(&self) -> MutexGuard<'_, ()> {
        self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn surface_capabilities(&self) -> RhiResult<vk::SurfaceCapabilitiesKHR> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical.handle, self.surface)?
        };
        Ok(caps)
    }

    /// Queries what the surface supports right now.
    ///
    /// Surface formats and present modes the neutral layer does not model
    /// are left out.
    pub(crate) fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        let caps = self.surface_capabilities()?;
        let (formats, present_modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_formats(self.physical.handle, self.surface)?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(self.physical.handle, self.surface)?,
            )
        };
        Ok(SurfaceSupport {
            capabilities: conv::surface_capabilities_from_vk(&caps),
            formats: formats
                .into_iter()
                .filter_map(conv::surface_format_from_vk)
                .collect(),
            present_modes: present_modes
                .into_iter()
                .filter_map(conv::present_mode_from_vk)
                .collect(),
        })
    }

    /// Allocates memory satisfying `requirements` from the shared allocator.
    pub(crate) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RhiResult<Allocation> {
        let mut guard = self.allocator.lock().unwrap_or_else(PoisonError::into_inner);
        let allocator = guard
            .as_mut()
            .ok_or_else(|| RhiError::ResourceCreation("allocator already shut down".to_string()))?;
        let allocation = allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(allocation)
    }

    /// Returns an allocation to the allocator, logging failures.
    pub(crate) fn free(&self, allocation: Allocation) {
        let mut guard = self.allocator.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    error!("Failed to free GPU allocation: {}", e);
                }
            }
            None => warn!("GPU allocation outlived its allocator"),
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during cleanup: {:?}", e);
            }
        }

        // The allocator releases its memory blocks through the device.
        let allocator = self
            .allocator
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(allocator);

        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        info!("Vulkan device destroyed");
        // `instance` drops after this body, last of all.
    }
}
