use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use tracing::debug;

use crate::barrier::ImageAspect;
use crate::error::{RhiError, RhiResult};
use crate::resource::{BufferDesc, SamplerDesc, ShaderDesc, TextureDesc};
use crate::types::{Format, TextureDimension, TextureUsage};

use super::VulkanContext;
use super::conv;

// =========================================================================
// Buffer
// =========================================================================

pub(crate) struct VulkanBuffer {
    ctx: Arc<VulkanContext>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl VulkanBuffer {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &BufferDesc) -> RhiResult<Self> {
        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(conv::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let device = ctx.device();
        let buffer = unsafe { device.create_buffer(&create_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match ctx.allocate("buffer", requirements, conv::memory_location(desc.memory), true)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) } {
            unsafe { device.destroy_buffer(buffer, None) };
            ctx.free(allocation);
            return Err(e.into());
        }

        debug!(
            "Buffer created: {} bytes, {:?}, {:?}",
            desc.size, desc.usage, desc.memory
        );
        Ok(Self {
            ctx,
            buffer,
            allocation: Some(allocation),
        })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    fn mapped(&self) -> RhiResult<NonNull<u8>> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(NonNull::cast)
            .ok_or_else(|| RhiError::protocol_violation("Buffer::write", "buffer memory is not host-visible"))
    }

    /// Range checks happen in the front-end.
    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        let base = self.mapped()?;
        let offset = usize::try_from(offset)
            .map_err(|_| RhiError::InvalidDescription(format!("offset {} overflows usize", offset)))?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    pub(crate) fn read(&self, offset: u64, len: usize) -> RhiResult<Vec<u8>> {
        let base = self.mapped()?;
        let offset = usize::try_from(offset)
            .map_err(|_| RhiError::InvalidDescription(format!("offset {} overflows usize", offset)))?;
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(base.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            self.ctx.free(allocation);
        }
    }
}

// =========================================================================
// Texture
// =========================================================================

/// An image and its default view.
///
/// Swapchain images are owned by the swapchain: only the view is destroyed
/// for them.
pub(crate) struct VulkanTexture {
    ctx: Arc<VulkanContext>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    owns_image: bool,
}

impl VulkanTexture {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &TextureDesc) -> RhiResult<Self> {
        let flags = if desc.dimension == TextureDimension::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(conv::image_type(desc.dimension))
            .format(conv::format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: desc.depth.max(1),
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(desc.array_layers.max(1))
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(conv::texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let device = ctx.device();
        let image = unsafe { device.create_image(&create_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = match ctx.allocate("texture", requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) } {
            unsafe { device.destroy_image(image, None) };
            ctx.free(allocation);
            return Err(e.into());
        }

        let view = match create_view(
            device,
            image,
            desc.format,
            view_aspect(desc.format, desc.usage),
            conv::image_view_type(desc.dimension, desc.array_layers),
        ) {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                ctx.free(allocation);
                return Err(e);
            }
        };

        debug!(
            "Texture created: {}x{}x{} {:?}, {} mips, {} layers",
            desc.width, desc.height, desc.depth, desc.format, desc.mip_levels, desc.array_layers
        );
        Ok(Self {
            ctx,
            image,
            view,
            allocation: Some(allocation),
            owns_image: true,
        })
    }

    /// Wraps an image owned by a swapchain.
    pub(crate) fn from_swapchain_image(
        ctx: Arc<VulkanContext>,
        image: vk::Image,
        format: Format,
    ) -> RhiResult<Self> {
        let view = create_view(
            ctx.device(),
            image,
            format,
            ImageAspect::COLOR,
            vk::ImageViewType::TYPE_2D,
        )?;
        Ok(Self {
            ctx,
            image,
            view,
            allocation: None,
            owns_image: false,
        })
    }

    #[inline]
    pub(crate) fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub(crate) fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_image_view(self.view, None);
            if self.owns_image {
                self.ctx.device().destroy_image(self.image, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            self.ctx.free(allocation);
        }
    }
}

/// Sampled views of combined depth-stencil formats may only expose depth.
fn view_aspect(format: Format, usage: TextureUsage) -> ImageAspect {
    let aspect = ImageAspect::from_format(format);
    if usage.contains(TextureUsage::SAMPLED) && aspect.contains(ImageAspect::DEPTH) {
        ImageAspect::DEPTH
    } else {
        aspect
    }
}

fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: Format,
    aspect: ImageAspect,
    view_type: vk::ImageViewType,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(conv::format(format))
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: conv::image_aspect(aspect),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        });
    let view = unsafe { device.create_image_view(&create_info, None)? };
    Ok(view)
}

// =========================================================================
// Sampler
// =========================================================================

pub(crate) struct VulkanSampler {
    ctx: Arc<VulkanContext>,
    sampler: vk::Sampler,
}

impl VulkanSampler {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &SamplerDesc) -> RhiResult<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .min_filter(conv::filter(desc.min_filter))
            .mag_filter(conv::filter(desc.mag_filter))
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(conv::address_mode(desc.address_u))
            .address_mode_v(conv::address_mode(desc.address_v))
            .address_mode_w(conv::address_mode(desc.address_w))
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { ctx.device().create_sampler(&create_info, None)? };
        Ok(Self { ctx, sampler })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_sampler(self.sampler, None) };
    }
}

// =========================================================================
// Shader
// =========================================================================

pub(crate) struct VulkanShader {
    ctx: Arc<VulkanContext>,
    module: vk::ShaderModule,
    entry_point: CString,
}

impl VulkanShader {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &ShaderDesc) -> RhiResult<Self> {
        let entry_point = CString::new(desc.entry_point.as_str())
            .map_err(|_| RhiError::Shader("entry point contains a NUL byte".to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&desc.code);
        let module = unsafe { ctx.device().create_shader_module(&create_info, None) }
            .map_err(|e| RhiError::Shader(format!("shader module creation failed: {}", e)))?;
        debug!(
            "{:?} shader module created ({} words, entry '{}')",
            desc.stage,
            desc.code.len(),
            desc.entry_point
        );
        Ok(Self {
            ctx,
            module,
            entry_point,
        })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub(crate) fn entry_point(&self) -> &std::ffi::CStr {
        &self.entry_point
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_shader_module(self.module, None) };
    }
}
