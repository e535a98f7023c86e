//! Headless swapchain.
//!
//! Images are handed out round-robin. The swapchain goes stale when the
//! controller's simulated surface extent stops matching its own extent.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use super::gpu::{GpuState, HeadlessGpu};
use super::{AcquireFault, HeadlessConfig, HeadlessEvent, HeadlessTexture};
use crate::error::{RhiError, RhiResult};
use crate::swapchain::{AcquiredImage, SurfaceSupport, SwapchainParams};
use crate::sync::Semaphore;
use crate::types::Extent2D;

#[derive(Debug)]
struct ChainState {
    extent: Extent2D,
    image_count: u32,
    next_image: u32,
}

pub(crate) struct HeadlessSwapchain {
    gpu: Arc<HeadlessGpu>,
    config: Arc<HeadlessConfig>,
    state: Mutex<ChainState>,
}

impl HeadlessSwapchain {
    pub(crate) fn new(
        gpu: Arc<HeadlessGpu>,
        config: Arc<HeadlessConfig>,
        params: &SwapchainParams,
    ) -> (Self, Vec<HeadlessTexture>) {
        let swapchain = Self {
            gpu,
            config,
            state: Mutex::new(ChainState {
                extent: params.extent,
                image_count: params.image_count,
                next_image: 0,
            }),
        };
        let images = swapchain.build_images(params);
        (swapchain, images)
    }

    fn build_images(&self, params: &SwapchainParams) -> Vec<HeadlessTexture> {
        let mut gpu = self.gpu.lock();
        gpu.stats.swapchains_created += 1;
        gpu.record(HeadlessEvent::SwapchainCreated {
            extent: params.extent,
            image_count: params.image_count,
        });
        (0..params.image_count)
            .map(|_| HeadlessTexture::new(gpu.next_id()))
            .collect()
    }

    fn chain(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn surface_support(&self) -> SurfaceSupport {
        super::surface_support(&self.gpu, &self.config)
    }

    /// The simulated surface no longer matches the swapchain.
    pub(crate) fn is_stale(&self, gpu: &GpuState) -> bool {
        let extent = self.chain().extent;
        gpu.surface_extent.is_some_and(|surface| surface != extent)
    }

    pub(crate) fn acquire(&self, semaphore: Option<&Semaphore>) -> RhiResult<AcquiredImage> {
        let binary = semaphore
            .map(|s| s.inner().as_headless().map(|h| h.binary_state().clone()))
            .transpose()?;

        let mut gpu = self.gpu.lock();
        gpu.stats.acquires += 1;
        let nth = gpu.stats.acquires;
        let fault = gpu.acquire_faults.remove(&nth);
        if fault == Some(AcquireFault::OutOfDate) || self.is_stale(&gpu) {
            gpu.stats.acquire_failures += 1;
            gpu.record(HeadlessEvent::AcquireOutOfDate);
            return Err(RhiError::SwapchainOutOfDate);
        }

        if let Some(binary) = &binary {
            if !binary.is_idle() {
                return Err(RhiError::protocol_violation(
                    "Swapchain::acquire_next_image",
                    "semaphore still has a signal or wait outstanding",
                ));
            }
            binary.signaled.store(true, Ordering::Release);
        }

        let index = {
            let mut chain = self.chain();
            let index = chain.next_image;
            chain.next_image = (index + 1) % chain.image_count.max(1);
            index
        };
        let suboptimal = fault == Some(AcquireFault::Suboptimal);
        gpu.record(HeadlessEvent::Acquire {
            image: index,
            suboptimal,
        });
        Ok(AcquiredImage { index, suboptimal })
    }

    pub(crate) fn recreate(&mut self, params: &SwapchainParams) -> Vec<HeadlessTexture> {
        {
            let mut chain = self.chain();
            chain.extent = params.extent;
            chain.image_count = params.image_count;
            chain.next_image = 0;
        }
        self.build_images(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::{PresentMode, SurfaceFormat};
    use crate::types::Format;

    fn params(width: u32, height: u32, image_count: u32) -> SwapchainParams {
        SwapchainParams {
            extent: Extent2D::new(width, height),
            surface_format: SurfaceFormat::srgb(Format::Bgra8Srgb),
            present_mode: PresentMode::Fifo,
            image_count,
        }
    }

    fn swapchain(image_count: u32) -> (Arc<HeadlessGpu>, HeadlessSwapchain) {
        let gpu = Arc::new(HeadlessGpu::new());
        let (swapchain, images) = HeadlessSwapchain::new(
            gpu.clone(),
            Arc::new(HeadlessConfig::default()),
            &params(64, 64, image_count),
        );
        assert_eq!(images.len(), image_count as usize);
        (gpu, swapchain)
    }

    #[test]
    fn test_round_robin_images() {
        let (_gpu, swapchain) = swapchain(3);
        let indices: Vec<u32> = (0..5)
            .map(|_| swapchain.acquire(None).unwrap().index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_injected_faults() {
        let (gpu, swapchain) = swapchain(2);
        gpu.lock().acquire_faults.insert(1, AcquireFault::OutOfDate);
        gpu.lock().acquire_faults.insert(2, AcquireFault::Suboptimal);

        assert!(matches!(swapchain.acquire(None), Err(RhiError::SwapchainOutOfDate)));
        let image = swapchain.acquire(None).unwrap();
        assert!(image.suboptimal);
        assert_eq!(image.index, 0);
        assert!(!swapchain.acquire(None).unwrap().suboptimal);
        assert_eq!(gpu.lock().stats.acquire_failures, 1);
    }

    #[test]
    fn test_stale_until_recreated() {
        let (gpu, mut swapchain) = swapchain(2);
        gpu.lock().surface_extent = Some(Extent2D::new(128, 96));
        assert!(matches!(swapchain.acquire(None), Err(RhiError::SwapchainOutOfDate)));

        let images = swapchain.recreate(&params(128, 96, 3));
        assert_eq!(images.len(), 3);
        assert!(!swapchain.is_stale(&gpu.lock()));
        assert_eq!(swapchain.acquire(None).unwrap().index, 0);
        assert_eq!(gpu.lock().stats.swapchains_created, 2);
    }
}
