//! Main renderer orchestration.
//!
//! This module provides the [`Renderer`], which owns the device objects a
//! window needs to show frames and drives the per-frame loop on top of a
//! [`FrameManager`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use mango_rhi::{
    AttachmentDesc, ClearValue, CommandBuffer, CommandQueue, Device, Extent2D, Format,
    Framebuffer, FramebufferDesc, NativeWindow, QueueType, Rect2D, RenderPass, RenderPassDesc,
    RhiError, RhiResult, SubpassContents, SubpassDesc, Swapchain, SwapchainDesc, Viewport,
};

use crate::config::RendererConfig;
use crate::depth_buffer::DepthBuffer;
use crate::error::Result;
use crate::frame::FrameContext;
use crate::frame_manager::FrameManager;

/// Callback that records the contents of a frame.
pub type RenderCallback = Box<dyn FnMut(&mut FrameContext<'_>) -> RhiResult<()>>;

/// Counters describing what the frame loop did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RendererStats {
    /// Frames submitted and handed to presentation.
    pub frames_rendered: u64,
    /// Frames dropped for recreation, an out-of-date acquire or an abandoned
    /// recording.
    pub frames_skipped: u64,
    pub swapchain_recreations: u64,
}

/// Owns the swapchain and everything rendered into it.
///
/// # Frame Loop
///
/// [`Renderer::begin_frame`] waits for the current slot, acquires an image
/// and opens the render pass; [`Renderer::end_frame`] closes it, submits and
/// presents. [`Renderer::render_frame`] wraps both around the installed
/// render callback. A frame that cannot start (the swapchain is being
/// recreated or the acquire reported it out of date) is dropped for this
/// iteration, and the caller simply tries again on the next one.
///
/// # Resource Destruction Order
///
/// Fields are declared in reverse creation order so that, after `Drop`
/// waits for the device to go idle:
/// 1. Frame slots (semaphores, fences, command pool)
/// 2. Framebuffers
/// 3. Depth buffer
/// 4. Render pass
/// 5. Swapchain
/// 6. Queue
/// 7. Device (last reference held by the renderer)
pub struct Renderer {
    render_callback: Option<RenderCallback>,
    frames: FrameManager,
    /// One per swapchain image, indexed by the acquired image index.
    framebuffers: Vec<Framebuffer>,
    /// `None` only while the swapchain is being recreated.
    depth_buffer: Option<DepthBuffer>,
    render_pass: RenderPass,
    swapchain: Swapchain,
    queue: CommandQueue,
    device: Arc<Device>,

    color_format: Format,
    depth_format: Format,
    clear_color: [f32; 4],

    // State
    /// Image acquired by the frame being recorded.
    acquired_image: Option<u32>,
    frame_started: bool,
    swapchain_needs_recreation: bool,
    minimized: bool,
    /// Size the next recreation asks for.
    requested_width: u32,
    requested_height: u32,
    stats: RendererStats,
}

impl Renderer {
    /// Creates the device and a renderer for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the Vulkan backend
    /// gets no window, or any resource creation fails.
    pub fn new(config: &RendererConfig, window: Option<NativeWindow>) -> Result<Self> {
        config.validate()?;
        let device = Device::new(&config.device_desc(), window)?;
        Self::with_device(device, config)
    }

    /// Creates a renderer on an existing device.
    pub fn with_device(device: Arc<Device>, config: &RendererConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing renderer ({}x{}, {} backend, {} frames in flight)",
            config.width,
            config.height,
            device.backend(),
            config.max_frames_in_flight
        );

        let queue = device.create_command_queue(QueueType::Graphics)?;

        let swapchain = device.create_swapchain(
            &SwapchainDesc::new(config.width, config.height)
                .with_image_count(config.swapchain_image_count())
                .with_vsync(config.enable_vsync),
        )?;
        let extent = swapchain.extent();
        let color_format = swapchain.format();

        let depth_format = DepthBuffer::select_format(&device, &config.depth_format_preference)?;
        let depth_buffer = DepthBuffer::new(&device, depth_format, extent)?;

        let render_pass = create_render_pass(&device, color_format, depth_format)?;
        let framebuffers = create_framebuffers(&device, &render_pass, &swapchain, &depth_buffer)?;

        let frames = FrameManager::new(device.clone(), config.max_frames_in_flight)?;

        info!(
            "Renderer initialized: {} {:?}, {} swapchain images",
            extent,
            color_format,
            swapchain.image_count()
        );

        Ok(Self {
            render_callback: None,
            frames,
            framebuffers,
            depth_buffer: Some(depth_buffer),
            render_pass,
            swapchain,
            queue,
            device,
            color_format,
            depth_format,
            clear_color: config.clear_color,
            acquired_image: None,
            frame_started: false,
            swapchain_needs_recreation: false,
            minimized: false,
            requested_width: config.width,
            requested_height: config.height,
            stats: RendererStats::default(),
        })
    }

    // =========================================================================
    // Frame Loop
    // =========================================================================

    /// Starts a frame.
    ///
    /// Returns `Ok(true)` when a frame is being recorded and `Ok(false)`
    /// when it was skipped: the window is minimized, the swapchain was just
    /// recreated, or the acquire reported it out of date.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] if the GPU never finished the slot's
    /// previous frame, or the error of a failed recreation or recording.
    pub fn begin_frame(&mut self) -> RhiResult<bool> {
        if self.frame_started {
            warn!("begin_frame called while frame {} is already started", self.current_frame_index());
            return Ok(true);
        }
        if self.minimized {
            return Ok(false);
        }
        if self.swapchain_needs_recreation {
            self.recreate_swapchain()?;
            self.stats.frames_skipped += 1;
            return Ok(false);
        }

        // The slot's previous frame may still use its command buffer and the
        // image it rendered to.
        self.frames.wait_for_frame()?;

        let Some(image) = self.frames.acquire_next_image(&mut self.swapchain)? else {
            self.swapchain_needs_recreation = true;
            self.stats.frames_skipped += 1;
            return Ok(false);
        };
        if image.suboptimal {
            self.swapchain_needs_recreation = true;
        }

        // From here the image is acquired: a failure must abandon the frame.
        self.acquired_image = Some(image.index);
        self.frame_started = true;
        if let Err(e) = self.record_frame_start(image.index) {
            self.abandon_frame();
            return Err(e);
        }

        debug!("Frame {} started on image {}", self.current_frame_index(), image.index);
        Ok(true)
    }

    fn record_frame_start(&mut self, image_index: u32) -> RhiResult<()> {
        let extent = self.swapchain.extent();
        let framebuffer = self.framebuffers.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidDescription(format!(
                "no framebuffer for swapchain image {} ({} framebuffers)",
                image_index,
                self.framebuffers.len()
            ))
        })?;
        let clear_values = [ClearValue::Color(self.clear_color), ClearValue::DEFAULT_DEPTH];
        let area = Rect2D::from_extent(extent);

        let cmd = self.frames.command_buffer_mut()?;
        cmd.begin()?;
        cmd.begin_render_pass_with_clears(
            &self.render_pass,
            framebuffer,
            area,
            SubpassContents::Inline,
            &clear_values,
        )?;
        cmd.set_viewport(Viewport::from_extent(extent))?;
        cmd.set_scissor(area)?;
        Ok(())
    }

    /// Ends the frame started by [`Renderer::begin_frame`]: closes the render
    /// pass, submits and presents. Without a started frame this only warns.
    ///
    /// An out-of-date or suboptimal present schedules swapchain recreation
    /// for the next `begin_frame`.
    ///
    /// # Errors
    ///
    /// A failure before the submit abandons the frame. A failed present
    /// comes after the frame is in flight: it still counts as rendered and
    /// only schedules swapchain recreation.
    pub fn end_frame(&mut self) -> RhiResult<()> {
        if !self.frame_started {
            warn!("end_frame called without a started frame");
            return Ok(());
        }
        let Some(image_index) = self.acquired_image else {
            warn!("Started frame has no acquired image");
            self.frame_started = false;
            return Ok(());
        };

        if let Err(e) = self.submit_frame() {
            error!("Failed to submit frame: {}", e);
            self.abandon_frame();
            return Err(e);
        }

        // Submitted: the slot is in flight whatever presentation reports.
        let outcome = self.frames.present(&mut self.queue, &mut self.swapchain, image_index);
        self.frames.next_frame();
        self.stats.frames_rendered += 1;
        self.acquired_image = None;
        self.frame_started = false;

        match outcome {
            Ok(outcome) => {
                if outcome.needs_recreation() {
                    debug!("Swapchain recreation scheduled after present");
                    self.swapchain_needs_recreation = true;
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to present image {}: {}", image_index, e);
                self.swapchain_needs_recreation = true;
                Err(e)
            }
        }
    }

    fn submit_frame(&mut self) -> RhiResult<()> {
        let cmd = self.frames.command_buffer_mut()?;
        cmd.end_render_pass()?;
        cmd.end()?;
        self.frames.submit(&mut self.queue)?;
        Ok(())
    }

    /// Records one frame with the installed render callback, or an empty
    /// frame (just the clear) without one.
    ///
    /// A frame skipped by [`Renderer::begin_frame`] is not an error.
    ///
    /// # Errors
    ///
    /// A callback error abandons the frame, schedules swapchain recreation
    /// and is returned.
    pub fn render_frame(&mut self) -> RhiResult<()> {
        let mut callback = self.render_callback.take();
        let result = match callback.as_mut() {
            Some(callback) => self.run_frame(&mut **callback),
            None => self.run_frame(&mut clear_only),
        };
        self.render_callback = callback;
        result
    }

    /// Like [`Renderer::render_frame`], with a one-off callback.
    pub fn render_frame_with<F>(&mut self, mut callback: F) -> RhiResult<()>
    where
        F: FnMut(&mut FrameContext<'_>) -> RhiResult<()>,
    {
        self.run_frame(&mut callback)
    }

    fn run_frame(
        &mut self,
        callback: &mut dyn FnMut(&mut FrameContext<'_>) -> RhiResult<()>,
    ) -> RhiResult<()> {
        if !self.begin_frame()? {
            return Ok(());
        }
        let Some(image_index) = self.acquired_image else {
            return Ok(());
        };
        let frame_index = self.frames.current_index();
        let extent = self.swapchain.extent();

        let result = self.frames.command_buffer_mut().and_then(|cmd| {
            let mut frame = FrameContext::new(cmd, image_index, frame_index, extent);
            callback(&mut frame)
        });
        if let Err(e) = result {
            warn!("Render callback failed on frame {}: {}", frame_index, e);
            self.abandon_frame();
            return Err(e);
        }

        self.end_frame()
    }

    /// Drops the frame being recorded.
    ///
    /// The acquired image is never presented and its semaphore stays
    /// signalled, so the swapchain and the slot semaphores are rebuilt
    /// before the next frame.
    fn abandon_frame(&mut self) {
        if let Err(e) = self.frames.abandon_current() {
            warn!("Failed to reset abandoned command buffer: {}", e);
        }
        if self.frame_started {
            self.stats.frames_skipped += 1;
        }
        self.acquired_image = None;
        self.frame_started = false;
        self.swapchain_needs_recreation = true;
    }

    // =========================================================================
    // Swapchain
    // =========================================================================

    /// Records a new window size.
    ///
    /// A zero dimension means the window is minimized: frames are skipped
    /// until a nonzero size arrives, which then schedules recreation.
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            if !self.minimized {
                info!("Window minimized, rendering paused");
            }
            self.minimized = true;
            return;
        }
        if !self.minimized && width == self.requested_width && height == self.requested_height {
            return;
        }

        debug!("Window resized to {}x{}", width, height);
        self.minimized = false;
        self.requested_width = width;
        self.requested_height = height;
        self.swapchain_needs_recreation = true;
    }

    fn recreate_swapchain(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;

        // Views of the old images go before the swapchain rebuilds them.
        self.framebuffers.clear();
        self.depth_buffer = None;

        self.swapchain.recreate(self.requested_width, self.requested_height)?;
        let extent = self.swapchain.extent();

        let color_format = self.swapchain.format();
        if color_format != self.color_format {
            info!("Swapchain format changed: {:?} -> {:?}", self.color_format, color_format);
            self.render_pass = create_render_pass(&self.device, color_format, self.depth_format)?;
            self.color_format = color_format;
        }

        let depth_buffer = DepthBuffer::new(&self.device, self.depth_format, extent)?;
        self.framebuffers =
            create_framebuffers(&self.device, &self.render_pass, &self.swapchain, &depth_buffer)?;
        self.depth_buffer = Some(depth_buffer);

        self.frames.recreate_semaphores()?;

        self.swapchain_needs_recreation = false;
        self.stats.swapchain_recreations += 1;
        info!(
            "Swapchain resources recreated at {} (recreation {})",
            extent, self.stats.swapchain_recreations
        );
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Installs the callback [`Renderer::render_frame`] records frames with.
    pub fn set_render_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut FrameContext<'_>) -> RhiResult<()> + 'static,
    {
        self.render_callback = Some(Box::new(callback));
    }

    pub fn clear_render_callback(&mut self) {
        self.render_callback = None;
    }

    /// Color the next frames clear to.
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    #[inline]
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Command buffer of the frame being recorded.
    ///
    /// Outside `begin_frame`/`end_frame` this warns and returns `None`.
    pub fn current_command_buffer(&mut self) -> Option<&mut CommandBuffer> {
        if !self.frame_started {
            warn!("current_command_buffer requested outside a frame");
            return None;
        }
        match self.frames.command_buffer_mut() {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                warn!("Current command buffer unavailable: {}", e);
                None
            }
        }
    }

    /// Blocks until the device has finished all submitted work.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    #[inline]
    pub fn frame_started(&self) -> bool {
        self.frame_started
    }

    #[inline]
    pub fn swapchain_needs_recreation(&self) -> bool {
        self.swapchain_needs_recreation
    }

    /// Frame-in-flight slot the next frame uses.
    #[inline]
    pub fn current_frame_index(&self) -> usize {
        self.frames.current_index()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.frames_in_flight()
    }

    /// Extent of the swapchain images.
    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn swapchain_format(&self) -> Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn swapchain_image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    #[inline]
    pub fn depth_format(&self) -> Format {
        self.depth_format
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn stats(&self) -> RendererStats {
        self.stats
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        info!("Destroying renderer");

        // Wait for all GPU work to complete before any field is released.
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle: {}", e);
        }

        debug!(
            "Renderer stats: {} rendered, {} skipped, {} swapchain recreations",
            self.stats.frames_rendered, self.stats.frames_skipped, self.stats.swapchain_recreations
        );
    }
}

fn clear_only(_frame: &mut FrameContext<'_>) -> RhiResult<()> {
    Ok(())
}

/// Color cleared to the present layout plus a cleared depth attachment, in
/// a single subpass.
fn create_render_pass(device: &Device, color_format: Format, depth_format: Format) -> RhiResult<RenderPass> {
    device.create_render_pass(&RenderPassDesc {
        attachments: vec![
            AttachmentDesc::color_present(color_format).with_clear(ClearValue::DEFAULT_COLOR),
            AttachmentDesc::depth(depth_format).with_clear(ClearValue::DEFAULT_DEPTH),
        ],
        subpasses: vec![SubpassDesc {
            color_attachments: vec![0],
            depth_stencil_attachment: Some(1),
        }],
    })
}

fn create_framebuffers(
    device: &Device,
    render_pass: &RenderPass,
    swapchain: &Swapchain,
    depth_buffer: &DepthBuffer,
) -> RhiResult<Vec<Framebuffer>> {
    let extent = swapchain.extent();
    swapchain
        .images()
        .iter()
        .map(|image| {
            device.create_framebuffer(&FramebufferDesc {
                render_pass,
                attachments: vec![image, depth_buffer.texture()],
                width: extent.width,
                height: extent.height,
                layers: 1,
            })
        })
        .collect()
}
