use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info, warn};

use crate::command::CommandPoolFlags;
use crate::descriptor::{DescriptorBinding, DescriptorSetLayoutDesc};
use crate::device::{DeviceDesc, NativeWindow, QueueFamilyInfo};
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{
    ComputePipelineDesc, FramebufferDesc, GraphicsPipelineDesc, PipelineLayoutDesc,
    RenderPassDesc,
};
use crate::queue::QueueType;
use crate::resource::{BufferDesc, SamplerDesc, ShaderDesc, TextureDesc};
use crate::swapchain::{SurfaceSupport, SwapchainParams};
use crate::sync::SemaphoreType;
use crate::types::{Format, TextureUsage};

use super::VulkanContext;
use super::command::VulkanCommandPool;
use super::conv;
use super::descriptor::{VulkanDescriptorSet, VulkanDescriptorSetLayout};
use super::instance::Instance;
use super::physical_device::{PhysicalDevice, select_physical_device};
use super::pipeline::{VulkanFramebuffer, VulkanPipeline, VulkanPipelineLayout, VulkanRenderPass};
use super::queue::VulkanQueue;
use super::resource::{VulkanBuffer, VulkanSampler, VulkanShader, VulkanTexture};
use super::swapchain::VulkanSwapchain;
use super::sync::{VulkanFence, VulkanSemaphore};

/// Object factory of the Vulkan backend.
pub(crate) struct VulkanDevice {
    ctx: Arc<VulkanContext>,
}

impl VulkanDevice {
    /// Creates the instance, the window surface, and a logical device on the
    /// best (or preferred) adapter that can present to it.
    pub(crate) fn new(desc: &DeviceDesc, window: NativeWindow) -> RhiResult<Self> {
        if desc.enable_raytracing {
            warn!("Ray tracing was requested but is not provided by this backend; ignoring");
        }

        let surface_extensions = ash_window::enumerate_required_extensions(window.display)?;
        let instance = Instance::new(&desc.app_name, desc.enable_validation, surface_extensions)?;

        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                window.display,
                window.window,
                None,
            )
        }
        .map_err(|e| RhiError::Surface(format!("surface creation failed: {}", e)))?;
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let physical = match select_physical_device(
            instance.handle(),
            &surface_loader,
            surface,
            desc.preferred_adapter_index,
        ) {
            Ok(physical) => physical,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let device = match create_logical_device(instance.handle(), &physical) {
            Ok(device) => device,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.handle,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    surface_loader.destroy_surface(surface, None);
                }
                return Err(e.into());
            }
        };
        debug!("GPU memory allocator initialized");

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);
        let debug_utils = instance
            .has_validation()
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), &device));
        let present_family = physical
            .queue_families
            .present
            .unwrap_or(physical.queue_families.graphics);
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        info!(
            "Vulkan device ready on {} (graphics family {}, present family {})",
            physical.name(),
            physical.queue_families.graphics,
            present_family
        );

        let ctx = VulkanContext {
            instance,
            physical,
            device,
            allocator: Mutex::new(Some(allocator)),
            surface_loader,
            surface,
            swapchain_loader,
            debug_utils,
            present_queue,
            queue_lock: Mutex::new(()),
        };
        Ok(Self { ctx: Arc::new(ctx) })
    }

    pub(crate) fn queue_family_infos(&self) -> &[QueueFamilyInfo] {
        &self.ctx.physical().families
    }

    pub(crate) fn supports_format(&self, format: Format, usage: TextureUsage) -> bool {
        let properties = unsafe {
            self.ctx
                .instance()
                .get_physical_device_format_properties(self.ctx.physical().handle, conv::format(format))
        };
        properties
            .optimal_tiling_features
            .contains(conv::required_format_features(usage))
    }

    pub(crate) fn wait_idle(&self) -> RhiResult<()> {
        let _queues = self.ctx.lock_queues();
        unsafe { self.ctx.device().device_wait_idle()? };
        Ok(())
    }

    pub(crate) fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        self.ctx.surface_support()
    }

    // =========================================================================
    // Factories
    // =========================================================================

    pub(crate) fn create_fence(&self, initial_value: u64) -> RhiResult<VulkanFence> {
        VulkanFence::new(self.ctx.clone(), initial_value)
    }

    pub(crate) fn create_semaphore(&self, kind: SemaphoreType, initial_value: u64) -> RhiResult<VulkanSemaphore> {
        VulkanSemaphore::new(self.ctx.clone(), kind, initial_value)
    }

    pub(crate) fn create_command_pool(&self, family: u32, flags: CommandPoolFlags) -> RhiResult<VulkanCommandPool> {
        VulkanCommandPool::new(self.ctx.clone(), family, flags)
    }

    pub(crate) fn create_queue(&self, queue_type: QueueType, family: u32) -> RhiResult<VulkanQueue> {
        VulkanQueue::new(self.ctx.clone(), queue_type, family)
    }

    pub(crate) fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<VulkanBuffer> {
        VulkanBuffer::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_texture(&self, desc: &TextureDesc) -> RhiResult<VulkanTexture> {
        VulkanTexture::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<VulkanSampler> {
        VulkanSampler::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_shader(&self, desc: &ShaderDesc) -> RhiResult<VulkanShader> {
        VulkanShader::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<VulkanRenderPass> {
        VulkanRenderPass::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<VulkanFramebuffer> {
        VulkanFramebuffer::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_swapchain(
        &self,
        params: &SwapchainParams,
    ) -> RhiResult<(VulkanSwapchain, Vec<VulkanTexture>)> {
        VulkanSwapchain::new(self.ctx.clone(), params)
    }

    pub(crate) fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> RhiResult<VulkanDescriptorSetLayout> {
        VulkanDescriptorSetLayout::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_descriptor_set(
        &self,
        layout: &VulkanDescriptorSetLayout,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<VulkanDescriptorSet> {
        VulkanDescriptorSet::new(self.ctx.clone(), layout, bindings)
    }

    pub(crate) fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc<'_>) -> RhiResult<VulkanPipelineLayout> {
        VulkanPipelineLayout::new(self.ctx.clone(), desc)
    }

    pub(crate) fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<VulkanPipeline> {
        VulkanPipeline::graphics(self.ctx.clone(), desc)
    }

    pub(crate) fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> RhiResult<VulkanPipeline> {
        VulkanPipeline::compute(self.ctx.clone(), desc)
    }
}

/// One queue per distinct family, the swapchain extension, and Vulkan 1.2
/// timeline semaphores.
fn create_logical_device(instance: &ash::Instance, physical: &PhysicalDevice) -> RhiResult<ash::Device> {
    let priorities = [1.0f32];
    let queue_infos = physical
        .queue_families
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect::<Vec<_>>();

    let extensions = [ash::khr::swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();
    let mut features_12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut features_12);

    let device = unsafe { instance.create_device(physical.handle, &create_info, None)? };
    debug!("Logical device created with {} queue family(ies)", queue_infos.len());
    Ok(device)
}
