//! Swapchain management.
//!
//! A [`Swapchain`] owns the presentable images of a window surface. Frames
//! acquire an image, render into it, and hand it back through
//! [`CommandQueue::present`](crate::CommandQueue::present).
//!
//! When the surface changes (resize, display change) acquire returns
//! [`RhiError::SwapchainOutOfDate`] and present returns
//! [`PresentOutcome::OutOfDate`](crate::PresentOutcome::OutOfDate). Both are
//! recovered by waiting for the device to go idle and calling
//! [`Swapchain::recreate`].
//!
//! The selection rules for format, present mode, extent and image count are
//! plain functions shared by every backend.
//!
//! # Example
//!
//! ```
//! use mango_rhi::{Device, DeviceDesc, SemaphoreType, SwapchainDesc};
//!
//! # fn main() -> Result<(), mango_rhi::RhiError> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let mut swapchain = device.create_swapchain(&SwapchainDesc::new(800, 600))?;
//! let image_available = device.create_semaphore(SemaphoreType::Binary, 0)?;
//!
//! let image = swapchain.acquire_next_image(Some(&image_available))?;
//! assert!(image.index < swapchain.image_count());
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::headless::HeadlessSwapchain;
use crate::resource::{Texture, TextureDesc, TextureInner};
use crate::sync::Semaphore;
use crate::types::{Backend, Extent2D, Format, TextureUsage};

#[cfg(feature = "vulkan")]
use crate::vulkan::swapchain::VulkanSwapchain;

backend_inner!(SwapchainInner {
    vulkan: VulkanSwapchain,
    headless: HeadlessSwapchain,
});

/// Color space of a surface format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    SrgbNonlinear,
    DisplayP3Nonlinear,
    ExtendedSrgbLinear,
    Hdr10St2084,
}

/// Format and color space pair a surface can present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: Format,
    pub color_space: ColorSpace,
}

impl SurfaceFormat {
    pub const fn srgb(format: Format) -> Self {
        Self {
            format,
            color_space: ColorSpace::SrgbNonlinear,
        }
    }
}

/// How presented images are queued for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    /// No vsync; may tear.
    Immediate,
    /// Triple buffering: newest image replaces the queued one.
    Mailbox,
    /// Vsync. Always supported.
    Fifo,
    FifoRelaxed,
}

/// Limits reported by a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// Zero means no upper limit.
    pub max_image_count: u32,
    /// [`SurfaceCapabilities::UNDEFINED_EXTENT`] when the swapchain decides.
    pub current_extent: Extent2D,
    pub min_extent: Extent2D,
    pub max_extent: Extent2D,
}

impl SurfaceCapabilities {
    /// Sentinel current extent meaning "the swapchain extent decides".
    pub const UNDEFINED_EXTENT: Extent2D = Extent2D::new(u32::MAX, u32::MAX);
}

/// Everything a surface supports for swapchain creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSupport {
    pub capabilities: SurfaceCapabilities,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

impl SurfaceSupport {
    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Parameters for [`Device::create_swapchain`](crate::Device::create_swapchain).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    /// Requested image count, clamped to the surface limits.
    pub image_count: u32,
    pub vsync: bool,
    /// Formats tried in order before the built-in preference.
    pub format_preference: Vec<SurfaceFormat>,
}

impl SwapchainDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            image_count: 2,
            vsync: true,
            format_preference: Vec::new(),
        }
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = image_count;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_format_preference(mut self, formats: Vec<SurfaceFormat>) -> Self {
        self.format_preference = formats;
        self
    }
}

/// Result of a successful acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image is usable but the swapchain should be recreated soon.
    pub suboptimal: bool,
}

/// Settings resolved from a [`SwapchainDesc`] against [`SurfaceSupport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SwapchainParams {
    pub extent: Extent2D,
    pub surface_format: SurfaceFormat,
    pub present_mode: PresentMode,
    pub image_count: u32,
}

impl SwapchainParams {
    pub(crate) fn resolve(
        support: &SurfaceSupport,
        desc: &SwapchainDesc,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        if !support.is_adequate() {
            return Err(RhiError::Swapchain(
                "inadequate surface support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = desc
            .format_preference
            .iter()
            .find(|preferred| support.formats.contains(preferred))
            .copied()
            .or_else(|| choose_surface_format(&support.formats))
            .ok_or_else(|| RhiError::UnsupportedFormat("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&support.present_modes, desc.vsync);
        let extent = choose_extent(&support.capabilities, width, height);
        if extent.is_zero() {
            return Err(RhiError::InvalidDescription(format!(
                "swapchain extent {} is zero-sized",
                extent
            )));
        }
        let image_count = choose_image_count(&support.capabilities, desc.image_count);

        Ok(Self {
            extent,
            surface_format,
            present_mode,
            image_count,
        })
    }
}

// =========================================================================
// Swapchain
// =========================================================================

/// Presentable images of a window surface.
pub struct Swapchain {
    // Image textures hold views of the swapchain's images, so they drop first.
    images: Vec<Texture>,
    inner: SwapchainInner,
    desc: SwapchainDesc,
    params: SwapchainParams,
    acquired: Vec<bool>,
    generation: u64,
}

impl Swapchain {
    pub(crate) fn from_inner(
        inner: SwapchainInner,
        desc: SwapchainDesc,
        params: SwapchainParams,
        images: Vec<TextureInner>,
    ) -> Self {
        info!(
            "Swapchain created: {}, {:?} {:?}, {:?}, {} images",
            params.extent,
            params.surface_format.format,
            params.surface_format.color_space,
            params.present_mode,
            images.len()
        );
        let mut swapchain = Self {
            images: Vec::new(),
            inner,
            desc,
            params,
            acquired: Vec::new(),
            generation: 0,
        };
        swapchain.adopt_images(images);
        swapchain
    }

    fn adopt_images(&mut self, images: Vec<TextureInner>) {
        let desc = TextureDesc::new_2d(
            self.params.surface_format.format,
            self.params.extent.width,
            self.params.extent.height,
            TextureUsage::RENDER_TARGET,
        );
        self.acquired = vec![false; images.len()];
        self.images = images
            .into_iter()
            .map(|inner| Texture::from_inner(inner, desc.clone()))
            .collect();
    }

    pub(crate) fn inner(&self) -> &SwapchainInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    /// Current extent. May differ from the requested size.
    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.params.extent
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.params.surface_format.format
    }

    #[inline]
    pub fn surface_format(&self) -> SurfaceFormat {
        self.params.surface_format
    }

    #[inline]
    pub fn present_mode(&self) -> PresentMode {
        self.params.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Swapchain images as textures, usable as framebuffer attachments.
    #[inline]
    pub fn images(&self) -> &[Texture] {
        &self.images
    }

    /// Number of completed recreations.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    /// Queries the surface as it is now.
    pub fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            SwapchainInner::Vulkan(swapchain) => swapchain.surface_support(),
            SwapchainInner::Headless(swapchain) => Ok(swapchain.surface_support()),
        }
    }

    /// Acquires the next image. `semaphore` (binary) is signalled when the
    /// image is ready to be rendered to.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainOutOfDate`] when the swapchain must be
    /// recreated; no semaphore is signalled in that case.
    pub fn acquire_next_image(&mut self, semaphore: Option<&Semaphore>) -> RhiResult<AcquiredImage> {
        if semaphore.is_some_and(Semaphore::is_timeline) {
            return Err(RhiError::protocol_violation(
                "Swapchain::acquire_next_image",
                "acquire can only signal a binary semaphore",
            ));
        }

        let acquired = match &self.inner {
            #[cfg(feature = "vulkan")]
            SwapchainInner::Vulkan(swapchain) => swapchain.acquire(semaphore)?,
            SwapchainInner::Headless(swapchain) => swapchain.acquire(semaphore)?,
        };

        if let Some(slot) = self.acquired.get_mut(acquired.index as usize) {
            *slot = true;
        }
        if acquired.suboptimal {
            warn!("Acquired image {} from a suboptimal swapchain", acquired.index);
        }
        Ok(acquired)
    }

    /// Marks an acquired image as handed to presentation.
    pub(crate) fn release_acquired(&mut self, image_index: u32) -> RhiResult<()> {
        match self.acquired.get_mut(image_index as usize) {
            Some(slot) if *slot => {
                *slot = false;
                Ok(())
            }
            Some(_) => Err(RhiError::protocol_violation(
                "CommandQueue::present",
                format!("image {} was not acquired", image_index),
            )),
            None => Err(RhiError::protocol_violation(
                "CommandQueue::present",
                format!(
                    "image index {} out of range ({} images)",
                    image_index,
                    self.images.len()
                ),
            )),
        }
    }

    /// Rebuilds the swapchain for a new size.
    ///
    /// The caller must wait for the device to go idle first: no submission
    /// may still reference the old images. The old swapchain is passed to
    /// the new one for resource reuse, and the extent actually chosen is
    /// available from [`Swapchain::extent`] afterwards.
    pub fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        info!("Recreating swapchain for new size: {}x{}", width, height);
        let support = self.surface_support()?;
        let params = SwapchainParams::resolve(&support, &self.desc, width, height)?;

        // Views of the old images go before the old swapchain does.
        self.images.clear();
        self.acquired.clear();

        let images = match &mut self.inner {
            #[cfg(feature = "vulkan")]
            SwapchainInner::Vulkan(swapchain) => swapchain
                .recreate(&params)?
                .into_iter()
                .map(TextureInner::Vulkan)
                .collect(),
            SwapchainInner::Headless(swapchain) => swapchain
                .recreate(&params)
                .into_iter()
                .map(TextureInner::Headless)
                .collect(),
        };

        self.params = params;
        self.desc.width = width;
        self.desc.height = height;
        self.generation += 1;
        self.adopt_images(images);
        info!(
            "Swapchain recreated: {} ({} images, generation {})",
            self.params.extent,
            self.images.len(),
            self.generation
        );
        Ok(())
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("backend", &self.backend())
            .field("extent", &self.params.extent)
            .field("format", &self.params.surface_format)
            .field("present_mode", &self.params.present_mode)
            .field("images", &self.images.len())
            .field("generation", &self.generation)
            .finish()
    }
}

// =========================================================================
// Selection
// =========================================================================

/// Chooses the surface format.
///
/// Prefers `Bgra8Srgb`, then `Bgra8Unorm` (both with sRGB nonlinear color
/// space), then the first available format.
pub fn choose_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    let preferred = SurfaceFormat::srgb(Format::Bgra8Srgb);
    if formats.contains(&preferred) {
        debug!("Selected preferred surface format: Bgra8Srgb with SrgbNonlinear");
        return Some(preferred);
    }

    let alternative = SurfaceFormat::srgb(Format::Bgra8Unorm);
    if formats.contains(&alternative) {
        warn!("Using fallback surface format: Bgra8Unorm with SrgbNonlinear");
        return Some(alternative);
    }

    let first = formats.first().copied();
    if let Some(first) = first {
        warn!("Using first available surface format: {:?}", first.format);
    }
    first
}

/// Chooses the present mode.
///
/// With vsync this is always FIFO. Without it, mailbox is preferred, then
/// immediate, falling back to FIFO which every surface supports.
pub fn choose_present_mode(present_modes: &[PresentMode], vsync: bool) -> PresentMode {
    if vsync {
        debug!("Selected FIFO present mode (vsync)");
        return PresentMode::Fifo;
    }
    if present_modes.contains(&PresentMode::Mailbox) {
        debug!("Selected MAILBOX present mode (triple buffering)");
        return PresentMode::Mailbox;
    }
    if present_modes.contains(&PresentMode::Immediate) {
        debug!("Selected IMMEDIATE present mode");
        return PresentMode::Immediate;
    }
    debug!("Selected FIFO present mode (fallback)");
    PresentMode::Fifo
}

/// Chooses the swapchain extent.
///
/// Uses the surface's current extent when defined; otherwise clamps the
/// requested size to the surface limits.
pub fn choose_extent(capabilities: &SurfaceCapabilities, width: u32, height: u32) -> Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}",
            capabilities.current_extent
        );
        return capabilities.current_extent;
    }

    let extent =
        Extent2D::new(width, height).clamp(capabilities.min_extent, capabilities.max_extent);
    debug!(
        "Calculated extent: {} (requested: {}x{}, min: {}, max: {})",
        extent, width, height, capabilities.min_extent, capabilities.max_extent
    );
    extent
}

/// Clamps the requested image count to the surface limits. A maximum of
/// zero means unlimited.
pub fn choose_image_count(capabilities: &SurfaceCapabilities, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}
