use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::{AcquiredImage, SurfaceSupport, SwapchainParams};
use crate::sync::Semaphore;

use super::VulkanContext;
use super::conv;
use super::resource::VulkanTexture;

pub(crate) struct VulkanSwapchain {
    ctx: Arc<VulkanContext>,
    swapchain: vk::SwapchainKHR,
}

impl VulkanSwapchain {
    pub(crate) fn new(
        ctx: Arc<VulkanContext>,
        params: &SwapchainParams,
    ) -> RhiResult<(Self, Vec<VulkanTexture>)> {
        let swapchain = create_swapchain(&ctx, params, vk::SwapchainKHR::null())?;
        let chain = Self { ctx, swapchain };
        let images = chain.images(params)?;
        Ok((chain, images))
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub(crate) fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        self.ctx.surface_support()
    }

    /// Acquires the next image, signalling `semaphore` when it is ready.
    pub(crate) fn acquire(&self, semaphore: Option<&Semaphore>) -> RhiResult<AcquiredImage> {
        let semaphore = match semaphore {
            Some(semaphore) => semaphore.inner().as_vulkan()?.handle(),
            None => vk::Semaphore::null(),
        };
        let result = unsafe {
            self.ctx.swapchain_loader().acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::SwapchainOutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
            Err(e) => Err(e.into()),
        }
    }

    /// Builds a new swapchain from the old one, then destroys the old one.
    ///
    /// The caller has already dropped every view of the old images.
    pub(crate) fn recreate(&mut self, params: &SwapchainParams) -> RhiResult<Vec<VulkanTexture>> {
        let old = self.swapchain;
        let new = create_swapchain(&self.ctx, params, old)?;
        unsafe { self.ctx.swapchain_loader().destroy_swapchain(old, None) };
        self.swapchain = new;
        debug!("Old swapchain destroyed");
        self.images(params)
    }

    fn images(&self, params: &SwapchainParams) -> RhiResult<Vec<VulkanTexture>> {
        let images = unsafe { self.ctx.swapchain_loader().get_swapchain_images(self.swapchain)? };
        images
            .into_iter()
            .map(|image| {
                VulkanTexture::from_swapchain_image(
                    self.ctx.clone(),
                    image,
                    params.surface_format.format,
                )
            })
            .collect()
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .swapchain_loader()
                .destroy_swapchain(self.swapchain, None)
        };
        debug!("Swapchain destroyed");
    }
}

fn create_swapchain(
    ctx: &VulkanContext,
    params: &SwapchainParams,
    old: vk::SwapchainKHR,
) -> RhiResult<vk::SwapchainKHR> {
    let caps = ctx.surface_capabilities()?;
    let families = ctx.physical().queue_families;
    let graphics = families.graphics;
    let present = families.present.unwrap_or(graphics);
    let family_indices = [graphics, present];

    let mut create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(ctx.surface())
        .min_image_count(params.image_count)
        .image_format(conv::format(params.surface_format.format))
        .image_color_space(conv::color_space(params.surface_format.color_space))
        .image_extent(conv::extent(params.extent))
        .image_array_layers(1)
        .image_usage(
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | (caps.supported_usage_flags & vk::ImageUsageFlags::TRANSFER_DST),
        )
        .pre_transform(caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(conv::present_mode(params.present_mode))
        .clipped(true)
        .old_swapchain(old);
    create_info = if graphics != present {
        create_info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&family_indices)
    } else {
        create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    };

    let swapchain = unsafe { ctx.swapchain_loader().create_swapchain(&create_info, None) }
        .map_err(|e| RhiError::Swapchain(format!("swapchain creation failed: {}", e)))?;
    info!(
        "Vulkan swapchain created: {}x{}, {} images requested",
        params.extent.width, params.extent.height, params.image_count
    );
    Ok(swapchain)
}
