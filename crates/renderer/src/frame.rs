//! What a render callback sees of the frame being recorded.

use mango_rhi::{CommandBuffer, Extent2D};

/// The frame currently being recorded.
///
/// Handed to the render callback between `begin_frame` and `end_frame`. The
/// command buffer is already recording inside the frame's render pass with
/// viewport and scissor set to [`FrameContext::extent`].
pub struct FrameContext<'a> {
    command_buffer: &'a mut CommandBuffer,
    image_index: u32,
    frame_index: usize,
    extent: Extent2D,
}

impl<'a> FrameContext<'a> {
    pub(crate) fn new(
        command_buffer: &'a mut CommandBuffer,
        image_index: u32,
        frame_index: usize,
        extent: Extent2D,
    ) -> Self {
        Self {
            command_buffer,
            image_index,
            frame_index,
            extent,
        }
    }

    #[inline]
    pub fn command_buffer(&mut self) -> &mut CommandBuffer {
        self.command_buffer
    }

    /// Swapchain image being rendered to.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Frame-in-flight slot, in `0..max_frames_in_flight`.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.extent
    }
}
