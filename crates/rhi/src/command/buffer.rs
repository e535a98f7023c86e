use tracing::{debug, error, warn};

use super::Command;
use crate::barrier::{Barrier, BarrierBatch};
use crate::descriptor::DescriptorSet;
use crate::error::{RhiError, RhiResult};
use crate::headless::{HeadlessCommandBuffer, RecordedCommand};
use crate::pipeline::{Framebuffer, Pipeline, PipelineLayout, RenderPass};
use crate::queue::SubmissionTimeline;
use crate::resource::{Buffer, Texture};
use crate::types::{
    Backend, BufferUsage, ClearValue, CommandBufferLevel, Format, IndexType, PipelineBindPoint,
    Rect2D, ShaderStages, SubpassContents, Viewport,
};

#[cfg(feature = "vulkan")]
use crate::vulkan::command::VulkanCommandBuffer;

backend_inner!(CommandBufferInner {
    vulkan: VulkanCommandBuffer,
    headless: HeadlessCommandBuffer,
});

/// Recording state of a [`CommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Allocated or reset; nothing recorded.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Recorded and ready to submit.
    Executable,
    /// Submitted; the GPU may still be executing it.
    Pending,
    /// Unusable until reset (or until its pool is reset).
    Invalid,
}

/// Options for [`CommandBuffer::begin_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BeginInfo {
    /// The buffer will be submitted once and then re-recorded.
    pub one_time_submit: bool,
}

/// Render pass a secondary command buffer continues, given to
/// [`CommandBuffer::begin_secondary`].
///
/// The secondary records into `subpass` of a compatible render pass begun
/// by the primary that executes it. `framebuffer` is optional.
#[derive(Clone, Copy)]
pub struct RenderPassInheritance<'a> {
    pub render_pass: &'a RenderPass,
    pub subpass: u32,
    pub framebuffer: Option<&'a Framebuffer>,
}

impl<'a> RenderPassInheritance<'a> {
    pub fn new(render_pass: &'a RenderPass, subpass: u32) -> Self {
        Self {
            render_pass,
            subpass,
            framebuffer: None,
        }
    }

    pub fn with_framebuffer(mut self, framebuffer: &'a Framebuffer) -> Self {
        self.framebuffer = Some(framebuffer);
        self
    }
}

/// Region of a buffer-to-buffer copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Region of a buffer-to-texture copy. The texture is expected in the
/// copy-destination state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferTextureCopy {
    pub buffer_offset: u64,
    pub width: u32,
    pub height: u32,
    pub mip_level: u32,
    pub array_layer: u32,
}

#[derive(Clone)]
struct BoundPipeline {
    bind_point: PipelineBindPoint,
    layout: PipelineLayout,
}

#[derive(Clone)]
struct ActiveRenderPass {
    subpass: u32,
    subpass_count: u32,
    contents: SubpassContents,
    /// Attachment formats, for compatibility checks against secondaries.
    formats: Vec<Format>,
    /// Continued from the executing primary rather than begun here.
    inherited: bool,
}

/// Render pass state a secondary was begun with.
#[derive(Clone)]
struct InheritedPass {
    subpass: u32,
    formats: Vec<Format>,
}

fn attachment_formats(render_pass: &RenderPass) -> Vec<Format> {
    render_pass
        .attachments()
        .iter()
        .map(|attachment| attachment.format)
        .collect()
}

struct InFlight {
    timeline: SubmissionTimeline,
    serial: u64,
}

/// A recorded sequence of GPU commands.
///
/// Command buffers live inside the [`CommandPool`](super::CommandPool) that
/// allocated them and are reached through a handle.
pub struct CommandBuffer {
    inner: CommandBufferInner,
    level: CommandBufferLevel,
    state: CommandBufferState,
    /// Whether the owning pool permits resetting this buffer on its own.
    resettable: bool,
    bound: Option<BoundPipeline>,
    render_pass: Option<ActiveRenderPass>,
    inherited: Option<InheritedPass>,
    viewport_set: bool,
    scissor_set: bool,
    debug_depth: u32,
    one_time_submit: bool,
    commands_recorded: u64,
    submit_count: u64,
    in_flight: Option<InFlight>,
}

impl CommandBuffer {
    pub(crate) fn new(inner: CommandBufferInner, level: CommandBufferLevel, resettable: bool) -> Self {
        Self {
            inner,
            level,
            state: CommandBufferState::Initial,
            resettable,
            bound: None,
            render_pass: None,
            inherited: None,
            viewport_set: false,
            scissor_set: false,
            debug_depth: 0,
            one_time_submit: false,
            commands_recorded: 0,
            submit_count: 0,
            in_flight: None,
        }
    }

    pub(crate) fn inner(&self) -> &CommandBufferInner {
        &self.inner
    }

    pub(crate) fn inner_mut(&mut self) -> &mut CommandBufferInner {
        &mut self.inner
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Returns the current state, observing GPU completion of a pending
    /// submission.
    pub fn state(&self) -> CommandBufferState {
        match &self.in_flight {
            Some(flight)
                if self.state == CommandBufferState::Pending
                    && flight.timeline.completed() >= flight.serial =>
            {
                self.completion_state()
            }
            _ => self.state,
        }
    }

    fn completion_state(&self) -> CommandBufferState {
        if self.resettable {
            CommandBufferState::Initial
        } else {
            CommandBufferState::Invalid
        }
    }

    /// Applies a completed submission to the stored state.
    pub(crate) fn refresh(&mut self) {
        let state = self.state();
        if state != self.state {
            debug!("Command buffer completed: {:?} -> {:?}", self.state, state);
            self.state = state;
            self.in_flight = None;
            self.clear_recording_state();
        }
    }

    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    /// Number of recording calls accepted since allocation.
    #[inline]
    pub fn commands_recorded(&self) -> u64 {
        self.commands_recorded
    }

    /// Number of times this buffer has been submitted.
    #[inline]
    pub fn submit_count(&self) -> u64 {
        self.submit_count
    }

    /// Returns true when the buffer was begun with one-time-submit usage.
    #[inline]
    pub fn is_one_time_submit(&self) -> bool {
        self.one_time_submit
    }

    /// Returns true while a render pass is active, including one continued
    /// by a secondary buffer.
    #[inline]
    pub fn in_render_pass(&self) -> bool {
        self.render_pass.is_some()
    }

    /// Subpass a secondary buffer continues, if it was begun with
    /// [`begin_secondary`](Self::begin_secondary).
    #[inline]
    pub fn inherited_subpass(&self) -> Option<u32> {
        self.inherited.as_ref().map(|pass| pass.subpass)
    }

    /// Commands recorded so far on a headless command buffer.
    pub fn headless_commands(&self) -> RhiResult<&[RecordedCommand]> {
        Ok(self.inner.as_headless()?.commands())
    }

    fn clear_recording_state(&mut self) {
        self.bound = None;
        self.render_pass = None;
        self.viewport_set = false;
        self.scissor_set = false;
        self.debug_depth = 0;
    }

    fn ensure_recording(&mut self, operation: &'static str) -> RhiResult<()> {
        self.refresh();
        if self.state == CommandBufferState::Recording {
            Ok(())
        } else {
            Err(RhiError::protocol_violation(
                operation,
                format!("command buffer is {:?}, not Recording", self.state),
            ))
        }
    }

    fn ensure_outside_render_pass(&self, operation: &'static str) -> RhiResult<()> {
        if self.render_pass.is_some() {
            Err(RhiError::protocol_violation(
                operation,
                "not allowed inside a render pass",
            ))
        } else {
            Ok(())
        }
    }

    /// Rejects inline recording in a subpass whose contents come from
    /// secondary command buffers.
    fn ensure_inline_contents(&self, operation: &'static str) -> RhiResult<()> {
        match &self.render_pass {
            Some(active) if active.contents == SubpassContents::SecondaryCommandBuffers => {
                Err(RhiError::protocol_violation(
                    operation,
                    "the current subpass only accepts execute_secondary",
                ))
            }
            _ => Ok(()),
        }
    }

    fn record(&mut self, command: Command<'_>) -> RhiResult<()> {
        match &mut self.inner {
            #[cfg(feature = "vulkan")]
            CommandBufferInner::Vulkan(cmd) => cmd.record(&command)?,
            CommandBufferInner::Headless(cmd) => cmd.record(&command),
        }
        self.commands_recorded += 1;
        Ok(())
    }

    fn backend_reset(&mut self) -> RhiResult<()> {
        match &mut self.inner {
            #[cfg(feature = "vulkan")]
            CommandBufferInner::Vulkan(cmd) => cmd.reset(),
            CommandBufferInner::Headless(cmd) => {
                cmd.reset();
                Ok(())
            }
        }
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording with default options.
    pub fn begin(&mut self) -> RhiResult<()> {
        self.begin_with(BeginInfo::default())
    }

    /// Begins recording.
    ///
    /// From `Executable` or `Invalid` the buffer is implicitly reset, which
    /// requires a pool created with
    /// [`CommandPoolFlags::RESET_COMMAND_BUFFER`](super::CommandPoolFlags::RESET_COMMAND_BUFFER).
    ///
    /// # Errors
    ///
    /// Returns a protocol violation when the buffer is `Recording` or
    /// `Pending`, or cannot be implicitly reset.
    pub fn begin_with(&mut self, info: BeginInfo) -> RhiResult<()> {
        self.begin_inner(info, None)
    }

    /// Begins a secondary buffer that continues `inheritance.subpass` of a
    /// render pass. Draws are allowed right away; the render pass itself
    /// stays owned by the primary.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation for a primary buffer, a subpass outside
    /// the render pass, a framebuffer that does not match it, or any state
    /// [`begin_with`](Self::begin_with) rejects.
    pub fn begin_secondary(
        &mut self,
        info: BeginInfo,
        inheritance: RenderPassInheritance<'_>,
    ) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::begin_secondary";
        if self.level != CommandBufferLevel::Secondary {
            return Err(RhiError::protocol_violation(
                OP,
                "render pass inheritance requires a secondary command buffer",
            ));
        }
        let subpass_count = inheritance.render_pass.subpass_count();
        if inheritance.subpass >= subpass_count {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "subpass {} is outside the render pass ({} subpass(es))",
                    inheritance.subpass, subpass_count
                ),
            ));
        }
        if let Some(framebuffer) = inheritance.framebuffer {
            if framebuffer.attachment_count() != inheritance.render_pass.attachments().len() {
                return Err(RhiError::protocol_violation(
                    OP,
                    format!(
                        "framebuffer has {} attachments, render pass declares {}",
                        framebuffer.attachment_count(),
                        inheritance.render_pass.attachments().len()
                    ),
                ));
            }
        }
        self.begin_inner(info, Some(inheritance))
    }

    fn begin_inner(
        &mut self,
        info: BeginInfo,
        inheritance: Option<RenderPassInheritance<'_>>,
    ) -> RhiResult<()> {
        self.refresh();
        match self.state {
            CommandBufferState::Recording | CommandBufferState::Pending => {
                return Err(RhiError::protocol_violation(
                    "CommandBuffer::begin",
                    format!("command buffer is {:?}", self.state),
                ));
            }
            CommandBufferState::Executable | CommandBufferState::Invalid if !self.resettable => {
                return Err(RhiError::protocol_violation(
                    "CommandBuffer::begin",
                    format!(
                        "command buffer is {:?} and its pool does not allow individual reset",
                        self.state
                    ),
                ));
            }
            CommandBufferState::Executable | CommandBufferState::Invalid => {
                self.backend_reset()?;
            }
            CommandBufferState::Initial => {}
        }

        match &mut self.inner {
            #[cfg(feature = "vulkan")]
            CommandBufferInner::Vulkan(cmd) => cmd.begin(info, self.level, inheritance.as_ref())?,
            CommandBufferInner::Headless(cmd) => cmd.begin(),
        }

        self.clear_recording_state();
        self.inherited = None;
        if let Some(inheritance) = inheritance {
            let formats = attachment_formats(inheritance.render_pass);
            self.render_pass = Some(ActiveRenderPass {
                subpass: inheritance.subpass,
                subpass_count: inheritance.render_pass.subpass_count(),
                contents: SubpassContents::Inline,
                formats: formats.clone(),
                inherited: true,
            });
            self.inherited = Some(InheritedPass {
                subpass: inheritance.subpass,
                formats,
            });
        }
        self.one_time_submit = info.one_time_submit;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Ends recording. The buffer becomes `Executable`.
    pub fn end(&mut self) -> RhiResult<()> {
        self.ensure_recording("CommandBuffer::end")?;
        if self.render_pass.as_ref().is_some_and(|active| !active.inherited) {
            return Err(RhiError::protocol_violation(
                "CommandBuffer::end",
                "a render pass is still active",
            ));
        }
        if self.debug_depth > 0 {
            warn!(
                "Command buffer ended with {} open debug region(s)",
                self.debug_depth
            );
        }

        match &mut self.inner {
            #[cfg(feature = "vulkan")]
            CommandBufferInner::Vulkan(cmd) => cmd.end()?,
            CommandBufferInner::Headless(cmd) => cmd.end(),
        }

        self.render_pass = None;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Discards all recorded commands and returns to `Initial`.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation when the pool does not permit
    /// individual reset or the buffer is still `Pending`.
    pub fn reset(&mut self) -> RhiResult<()> {
        self.refresh();
        if !self.resettable {
            return Err(RhiError::protocol_violation(
                "CommandBuffer::reset",
                "the owning pool was not created with RESET_COMMAND_BUFFER",
            ));
        }
        if self.state == CommandBufferState::Pending {
            return Err(RhiError::protocol_violation(
                "CommandBuffer::reset",
                "command buffer is still pending on the GPU",
            ));
        }

        self.backend_reset()?;
        self.clear_recording_state();
        self.inherited = None;
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    // =========================================================================
    // Render Passes
    // =========================================================================

    /// Begins a render pass, clearing attachments with their declared clear
    /// values.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        area: Rect2D,
        contents: SubpassContents,
    ) -> RhiResult<()> {
        let clear_values: Vec<ClearValue> = render_pass
            .attachments()
            .iter()
            .map(|attachment| {
                attachment
                    .clear
                    .unwrap_or_else(|| ClearValue::default_for(attachment.format))
            })
            .collect();
        self.begin_render_pass_with_clears(render_pass, framebuffer, area, contents, &clear_values)
    }

    /// Begins a render pass with explicit clear values, one per attachment.
    pub fn begin_render_pass_with_clears(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        area: Rect2D,
        contents: SubpassContents,
        clear_values: &[ClearValue],
    ) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::begin_render_pass";
        self.ensure_recording(OP)?;
        self.ensure_outside_render_pass(OP)?;
        if self.level == CommandBufferLevel::Secondary {
            return Err(RhiError::protocol_violation(
                OP,
                "secondary command buffers cannot begin a render pass",
            ));
        }
        if framebuffer.attachment_count() != render_pass.attachments().len() {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "framebuffer has {} attachments, render pass declares {}",
                    framebuffer.attachment_count(),
                    render_pass.attachments().len()
                ),
            ));
        }
        if clear_values.len() != render_pass.attachments().len() {
            return Err(RhiError::protocol_violation(
                OP,
                "one clear value per attachment is required",
            ));
        }

        self.record(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            area,
            clear_values,
            contents,
        })?;
        self.render_pass = Some(ActiveRenderPass {
            subpass: 0,
            subpass_count: render_pass.subpass_count(),
            contents,
            formats: attachment_formats(render_pass),
            inherited: false,
        });
        Ok(())
    }

    /// Advances to the next subpass.
    pub fn next_subpass(&mut self, contents: SubpassContents) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::next_subpass";
        self.ensure_recording(OP)?;
        let Some(active) = self.render_pass.as_ref() else {
            return Err(RhiError::protocol_violation(OP, "no active render pass"));
        };
        if active.inherited {
            return Err(RhiError::protocol_violation(
                OP,
                "the render pass is continued from the primary command buffer",
            ));
        }
        if active.subpass + 1 >= active.subpass_count {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "already in the last subpass ({} of {})",
                    active.subpass + 1,
                    active.subpass_count
                ),
            ));
        }

        self.record(Command::NextSubpass(contents))?;
        if let Some(active) = self.render_pass.as_mut() {
            active.subpass += 1;
            active.contents = contents;
        }
        Ok(())
    }

    /// Ends the active render pass. The last subpass must be current.
    pub fn end_render_pass(&mut self) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::end_render_pass";
        self.ensure_recording(OP)?;
        let Some(active) = self.render_pass.as_ref() else {
            return Err(RhiError::protocol_violation(OP, "no active render pass"));
        };
        if active.inherited {
            return Err(RhiError::protocol_violation(
                OP,
                "the render pass is continued from the primary command buffer",
            ));
        }
        if active.subpass + 1 != active.subpass_count {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "subpass {} of {} is current, not the last",
                    active.subpass + 1,
                    active.subpass_count
                ),
            ));
        }

        self.record(Command::EndRenderPass)?;
        self.render_pass = None;
        Ok(())
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Binds a pipeline and remembers its layout for later descriptor and
    /// push-constant calls.
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::bind_pipeline";
        self.ensure_recording(OP)?;
        self.ensure_inline_contents(OP)?;
        self.record(Command::BindPipeline(pipeline))?;
        self.bound = Some(BoundPipeline {
            bind_point: pipeline.bind_point(),
            layout: pipeline.layout().clone(),
        });
        Ok(())
    }

    /// Binds a descriptor set at `index` of the bound pipeline's layout.
    pub fn bind_descriptor_set(&mut self, index: u32, set: &DescriptorSet) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::bind_descriptor_set";
        self.ensure_recording(OP)?;
        self.ensure_inline_contents(OP)?;
        let Some(bound) = self.bound.clone() else {
            return Err(RhiError::protocol_violation(OP, "no pipeline is bound"));
        };
        let set_count = bound.layout.info().set_layout_count;
        if index >= set_count {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "set index {} is outside the bound layout's {} set(s)",
                    index, set_count
                ),
            ));
        }

        self.record(Command::BindDescriptorSet {
            bind_point: bound.bind_point,
            layout: &bound.layout,
            index,
            set,
        })
    }

    /// Binds a vertex buffer to `binding`.
    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: &Buffer, offset: u64) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::bind_vertex_buffer";
        self.ensure_recording(OP)?;
        self.ensure_inline_contents(OP)?;
        if !buffer.usage().contains(BufferUsage::VERTEX) {
            return Err(RhiError::protocol_violation(
                OP,
                "buffer was not created with VERTEX usage",
            ));
        }
        if offset >= buffer.size() {
            return Err(RhiError::protocol_violation(
                OP,
                format!("offset {} is past the buffer size {}", offset, buffer.size()),
            ));
        }
        self.record(Command::BindVertexBuffer {
            binding,
            buffer,
            offset,
        })
    }

    /// Binds an index buffer.
    pub fn bind_index_buffer(
        &mut self,
        buffer: &Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::bind_index_buffer";
        self.ensure_recording(OP)?;
        self.ensure_inline_contents(OP)?;
        if !buffer.usage().contains(BufferUsage::INDEX) {
            return Err(RhiError::protocol_violation(
                OP,
                "buffer was not created with INDEX usage",
            ));
        }
        if offset % index_type.size() != 0 || offset >= buffer.size() {
            return Err(RhiError::protocol_violation(
                OP,
                format!("invalid index buffer offset {}", offset),
            ));
        }
        self.record(Command::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        })
    }

    // =========================================================================
    // Dynamic State
    // =========================================================================

    pub fn set_viewport(&mut self, viewport: Viewport) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::set_viewport";
        self.ensure_recording(OP)?;
        self.ensure_inline_contents(OP)?;
        self.record(Command::SetViewport(viewport))?;
        self.viewport_set = true;
        Ok(())
    }

    pub fn set_scissor(&mut self, scissor: Rect2D) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::set_scissor";
        self.ensure_recording(OP)?;
        self.ensure_inline_contents(OP)?;
        self.record(Command::SetScissor(scissor))?;
        self.scissor_set = true;
        Ok(())
    }

    // =========================================================================
    // Draw and Dispatch
    // =========================================================================

    fn ensure_can_draw(&self, operation: &'static str) -> RhiResult<()> {
        self.ensure_inline_contents(operation)?;
        match &self.bound {
            Some(bound) if bound.bind_point == PipelineBindPoint::Graphics => {}
            Some(_) => {
                return Err(RhiError::protocol_violation(
                    operation,
                    "the bound pipeline is not a graphics pipeline",
                ));
            }
            None => {
                return Err(RhiError::protocol_violation(
                    operation,
                    "no pipeline is bound",
                ));
            }
        }
        if self.render_pass.is_none() {
            return Err(RhiError::protocol_violation(
                operation,
                "draws require an active render pass",
            ));
        }
        if !self.viewport_set || !self.scissor_set {
            return Err(RhiError::protocol_violation(
                operation,
                "viewport and scissor must be set before the first draw",
            ));
        }
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::draw";
        self.ensure_recording(OP)?;
        self.ensure_can_draw(OP)?;
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::draw_indexed";
        self.ensure_recording(OP)?;
        self.ensure_can_draw(OP)?;
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        })
    }

    /// Dispatches compute work groups. Requires a bound compute pipeline
    /// and no active render pass.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::dispatch";
        self.ensure_recording(OP)?;
        self.ensure_outside_render_pass(OP)?;
        match &self.bound {
            Some(bound) if bound.bind_point == PipelineBindPoint::Compute => {}
            _ => {
                return Err(RhiError::protocol_violation(
                    OP,
                    "no compute pipeline is bound",
                ));
            }
        }
        self.record(Command::Dispatch { x, y, z })
    }

    // =========================================================================
    // Copy Commands
    // =========================================================================

    /// Copies `size` bytes between buffers.
    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        dst: &Buffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::copy_buffer";
        self.ensure_recording(OP)?;
        self.ensure_outside_render_pass(OP)?;
        if size == 0 {
            return Err(RhiError::protocol_violation(OP, "copy size must be nonzero"));
        }
        let src_end = src_offset.checked_add(size);
        let dst_end = dst_offset.checked_add(size);
        if src_end.is_none_or(|end| end > src.size()) || dst_end.is_none_or(|end| end > dst.size())
        {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "copy of {} bytes ({} -> {}) exceeds buffer bounds ({} / {})",
                    size,
                    src_offset,
                    dst_offset,
                    src.size(),
                    dst.size()
                ),
            ));
        }
        self.record(Command::CopyBuffer {
            src,
            dst,
            region: BufferCopy {
                src_offset,
                dst_offset,
                size,
            },
        })
    }

    /// Copies tightly packed texels from the start of `src` into one mip
    /// level and layer of `dst`, which must be in the copy-destination state.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: &Buffer,
        dst: &Texture,
        width: u32,
        height: u32,
        mip_level: u32,
        array_layer: u32,
    ) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::copy_buffer_to_texture";
        self.ensure_recording(OP)?;
        self.ensure_outside_render_pass(OP)?;

        let desc = dst.desc();
        if mip_level >= desc.mip_levels || array_layer >= desc.array_layers {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "mip {} / layer {} out of range ({} mips, {} layers)",
                    mip_level, array_layer, desc.mip_levels, desc.array_layers
                ),
            ));
        }
        let mip_width = (desc.width >> mip_level).max(1);
        let mip_height = (desc.height >> mip_level).max(1);
        if width == 0 || height == 0 || width > mip_width || height > mip_height {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "region {}x{} does not fit mip {} ({}x{})",
                    width, height, mip_level, mip_width, mip_height
                ),
            ));
        }
        let required = u64::from(width) * u64::from(height) * u64::from(desc.format.bytes_per_texel());
        if required > src.size() {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "source buffer holds {} bytes, region needs {}",
                    src.size(),
                    required
                ),
            ));
        }

        self.record(Command::CopyBufferToTexture {
            src,
            dst,
            region: BufferTextureCopy {
                buffer_offset: 0,
                width,
                height,
                mip_level,
                array_layer,
            },
        })
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Records one resource state transition.
    pub fn resource_barrier(&mut self, barrier: Barrier<'_>) -> RhiResult<()> {
        self.resource_barriers(&[barrier])
    }

    /// Records a batch of transitions as a single coalesced backend barrier.
    ///
    /// Transitions with identical before and after states and no explicit
    /// masks are skipped.
    ///
    /// # Errors
    ///
    /// A barrier on a resource kind without state returns
    /// [`RhiError::UnsupportedResource`] and aborts recording: the buffer
    /// becomes `Invalid`.
    pub fn resource_barriers(&mut self, barriers: &[Barrier<'_>]) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::resource_barriers";
        self.ensure_recording(OP)?;
        self.ensure_outside_render_pass(OP)?;

        let resolved = match BarrierBatch::resolve(barriers) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Recording aborted: {}", e);
                self.state = CommandBufferState::Invalid;
                self.clear_recording_state();
                return Err(e);
            }
        };

        if resolved.is_empty() {
            return Ok(());
        }
        self.record(Command::Barrier(&resolved))
    }

    // =========================================================================
    // Push Constants
    // =========================================================================

    /// Updates push constants of the bound pipeline layout.
    ///
    /// The shader stages are derived from the layout's ranges that overlap
    /// `[offset, offset + data.len())`; together they must cover the span.
    pub fn push_constants(&mut self, offset: u32, data: &[u8]) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::push_constants";
        self.ensure_recording(OP)?;
        self.ensure_inline_contents(OP)?;
        let Some(bound) = self.bound.clone() else {
            return Err(RhiError::protocol_violation(OP, "no pipeline is bound"));
        };
        let size = u32::try_from(data.len()).unwrap_or(u32::MAX);
        if size == 0 || offset % 4 != 0 || size % 4 != 0 {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "offset {} and size {} must be nonzero multiples of 4",
                    offset, size
                ),
            ));
        }

        let Some(stages) = bound.layout.info().push_constant_stages(offset, size) else {
            return Err(RhiError::protocol_violation(
                OP,
                format!(
                    "bytes [{}, {}) are not covered by the bound layout's push constant ranges",
                    offset,
                    offset.saturating_add(size)
                ),
            ));
        };

        self.record(Command::PushConstants {
            layout: &bound.layout,
            stages,
            offset,
            data,
        })
    }

    /// Pushes a plain-old-data value.
    pub fn push_constants_pod<T: bytemuck::Pod>(&mut self, offset: u32, value: &T) -> RhiResult<()> {
        self.push_constants(offset, bytemuck::bytes_of(value))
    }

    // =========================================================================
    // Secondary Command Buffers
    // =========================================================================

    /// Executes recorded secondary command buffers.
    pub fn execute_secondary(&mut self, secondaries: &[&CommandBuffer]) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::execute_secondary";
        self.ensure_recording(OP)?;
        if self.level != CommandBufferLevel::Primary {
            return Err(RhiError::protocol_violation(
                OP,
                "only primary command buffers can execute secondaries",
            ));
        }
        let active = self.render_pass.as_ref();
        let inline_subpass =
            active.is_some_and(|active| active.contents != SubpassContents::SecondaryCommandBuffers);
        if inline_subpass {
            return Err(RhiError::protocol_violation(
                OP,
                "the current subpass was begun with inline contents",
            ));
        }
        for (i, secondary) in secondaries.iter().enumerate() {
            if secondary.level() != CommandBufferLevel::Secondary {
                return Err(RhiError::protocol_violation(
                    OP,
                    format!("buffer {} is not a secondary command buffer", i),
                ));
            }
            if secondary.state() != CommandBufferState::Executable {
                return Err(RhiError::protocol_violation(
                    OP,
                    format!("secondary buffer {} is {:?}", i, secondary.state()),
                ));
            }
            match (active, secondary.inherited.as_ref()) {
                (Some(active), Some(inherited)) => {
                    if inherited.subpass != active.subpass || inherited.formats != active.formats {
                        return Err(RhiError::protocol_violation(
                            OP,
                            format!(
                                "secondary buffer {} (subpass {}) is not compatible with \
                                 subpass {} of the active render pass",
                                i, inherited.subpass, active.subpass
                            ),
                        ));
                    }
                }
                (Some(_), None) => {
                    return Err(RhiError::protocol_violation(
                        OP,
                        format!(
                            "secondary buffer {} was not begun with render pass inheritance",
                            i
                        ),
                    ));
                }
                (None, Some(_)) => {
                    return Err(RhiError::protocol_violation(
                        OP,
                        format!(
                            "secondary buffer {} continues a render pass, but none is active",
                            i
                        ),
                    ));
                }
                (None, None) => {}
            }
        }
        if secondaries.is_empty() {
            return Ok(());
        }
        self.record(Command::ExecuteSecondary(secondaries))
    }

    // =========================================================================
    // Debug Regions
    // =========================================================================

    /// Opens a named region shown by graphics debuggers. Recorded as a no-op
    /// when debug utilities are unavailable.
    pub fn begin_debug_region(&mut self, name: &str, color: [f32; 4]) -> RhiResult<()> {
        self.ensure_recording("CommandBuffer::begin_debug_region")?;
        self.record(Command::BeginDebugRegion { name, color })?;
        self.debug_depth += 1;
        Ok(())
    }

    pub fn end_debug_region(&mut self) -> RhiResult<()> {
        const OP: &str = "CommandBuffer::end_debug_region";
        self.ensure_recording(OP)?;
        if self.debug_depth == 0 {
            return Err(RhiError::protocol_violation(OP, "no open debug region"));
        }
        self.record(Command::EndDebugRegion)?;
        self.debug_depth -= 1;
        Ok(())
    }

    // =========================================================================
    // Queue and Pool Integration
    // =========================================================================

    pub(crate) fn validate_for_submit(&mut self, index: usize) -> RhiResult<()> {
        self.refresh();
        if self.level != CommandBufferLevel::Primary {
            return Err(RhiError::protocol_violation(
                "CommandQueue::submit",
                format!("command buffer {} is not primary", index),
            ));
        }
        if self.state != CommandBufferState::Executable {
            return Err(RhiError::protocol_violation(
                "CommandQueue::submit",
                format!("command buffer {} is {:?}, not Executable", index, self.state),
            ));
        }
        Ok(())
    }

    pub(crate) fn mark_pending(&mut self, timeline: SubmissionTimeline, serial: u64) {
        self.state = CommandBufferState::Pending;
        self.in_flight = Some(InFlight { timeline, serial });
        self.submit_count += 1;
    }

    /// Returns true while a submission of this buffer is still executing.
    pub(crate) fn is_pending(&mut self) -> bool {
        self.refresh();
        self.state == CommandBufferState::Pending
    }

    /// Applies a pool-wide reset.
    pub(crate) fn reset_by_pool(&mut self) {
        if let CommandBufferInner::Headless(cmd) = &mut self.inner {
            cmd.reset();
        }
        self.in_flight = None;
        self.clear_recording_state();
        self.inherited = None;
        self.state = CommandBufferState::Initial;
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("backend", &self.backend())
            .field("level", &self.level)
            .field("state", &self.state())
            .field("commands_recorded", &self.commands_recorded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandPool, CommandPoolFlags};
    use crate::device::{Device, DeviceDesc};
    use crate::queue::QueueType;
    use crate::resource::{BufferDesc, SamplerDesc, TextureDesc};
    use crate::types::{Extent2D, Format, MemoryType, TextureUsage};
    use crate::barrier::{BarrierResource, ResourceState};
    use std::sync::Arc;

    fn setup(flags: CommandPoolFlags) -> (Arc<Device>, CommandPool) {
        let device = Device::new(&DeviceDesc::headless(), None).unwrap();
        let pool = device.create_command_pool(QueueType::Graphics, flags).unwrap();
        (device, pool)
    }

    #[test]
    fn test_begin_end_transitions() {
        let (_device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();

        assert_eq!(cmd.state(), CommandBufferState::Initial);
        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        assert!(matches!(cmd.begin(), Err(RhiError::ProtocolViolation { .. })));
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        assert!(matches!(cmd.end(), Err(RhiError::ProtocolViolation { .. })));
    }

    #[test]
    fn test_recording_outside_recording_state_is_rejected() {
        let (_device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();

        let viewport = Viewport::from_extent(Extent2D::new(64, 64));
        assert!(cmd.set_viewport(viewport).is_err());
        assert_eq!(cmd.commands_recorded(), 0);
        assert_eq!(cmd.headless_commands().unwrap().len(), 0);
    }

    #[test]
    fn test_reset_requires_pool_flag() {
        let (_device, mut pool) = setup(CommandPoolFlags::empty());
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();

        assert!(matches!(cmd.reset(), Err(RhiError::ProtocolViolation { .. })));
        // Re-begin from Executable needs an implicit reset, which is not allowed either.
        assert!(matches!(cmd.begin(), Err(RhiError::ProtocolViolation { .. })));
        assert_eq!(cmd.state(), CommandBufferState::Executable);
    }

    #[test]
    fn test_rebegin_from_executable_with_resettable_pool() {
        let (_device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        cmd.set_scissor(Rect2D::from_extent(Extent2D::new(4, 4))).unwrap();
        cmd.end().unwrap();

        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        assert!(cmd.headless_commands().unwrap().is_empty());
    }

    #[test]
    fn test_draw_requires_pipeline_and_render_pass() {
        let (_device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        assert!(matches!(
            cmd.draw(3, 1, 0, 0),
            Err(RhiError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            cmd.dispatch(1, 1, 1),
            Err(RhiError::ProtocolViolation { .. })
        ));
        assert!(matches!(
            cmd.push_constants(0, &[0; 4]),
            Err(RhiError::ProtocolViolation { .. })
        ));
        // Still recording after rejected calls.
        assert_eq!(cmd.state(), CommandBufferState::Recording);
    }

    #[test]
    fn test_copy_buffer_bounds() {
        let (device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let src = device
            .create_buffer(&BufferDesc::new(64, BufferUsage::TRANSFER_SRC, MemoryType::CpuToGpu))
            .unwrap();
        let dst = device
            .create_buffer(&BufferDesc::new(32, BufferUsage::TRANSFER_DST, MemoryType::GpuOnly))
            .unwrap();
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();

        cmd.copy_buffer(&src, &dst, 0, 0, 32).unwrap();
        assert!(cmd.copy_buffer(&src, &dst, 0, 16, 32).is_err());
        assert!(cmd.copy_buffer(&src, &dst, 48, 0, 32).is_err());
        assert!(cmd.copy_buffer(&src, &dst, 0, 0, 0).is_err());
        assert_eq!(cmd.commands_recorded(), 1);
    }

    #[test]
    fn test_copy_buffer_to_texture_checks_region() {
        let (device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let staging = device
            .create_buffer(&BufferDesc::new(
                16 * 16 * 4,
                BufferUsage::TRANSFER_SRC,
                MemoryType::CpuToGpu,
            ))
            .unwrap();
        let texture = device
            .create_texture(
                &TextureDesc::new_2d(Format::Rgba8Unorm, 16, 16, TextureUsage::TRANSFER_DST)
                    .with_mip_levels(2),
            )
            .unwrap();
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();

        cmd.copy_buffer_to_texture(&staging, &texture, 16, 16, 0, 0).unwrap();
        cmd.copy_buffer_to_texture(&staging, &texture, 8, 8, 1, 0).unwrap();
        assert!(cmd.copy_buffer_to_texture(&staging, &texture, 16, 16, 1, 0).is_err());
        assert!(cmd.copy_buffer_to_texture(&staging, &texture, 4, 4, 2, 0).is_err());
        assert!(cmd.copy_buffer_to_texture(&staging, &texture, 4, 4, 0, 1).is_err());
    }

    #[test]
    fn test_sampler_barrier_invalidates_buffer() {
        let (device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();

        let barrier = Barrier::new(
            BarrierResource::Sampler(&sampler),
            ResourceState::Undefined,
            ResourceState::ShaderResource,
        );
        assert!(matches!(
            cmd.resource_barrier(barrier),
            Err(RhiError::UnsupportedResource(_))
        ));
        assert_eq!(cmd.state(), CommandBufferState::Invalid);
        assert!(cmd.end().is_err());

        // A resettable buffer can be re-recorded.
        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
    }

    #[test]
    fn test_barrier_records_single_coalesced_command() {
        let (device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let a = device
            .create_texture(&TextureDesc::new_2d(
                Format::Rgba8Unorm,
                8,
                8,
                TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            ))
            .unwrap();
        let b = device
            .create_buffer(&BufferDesc::new(64, BufferUsage::STORAGE, MemoryType::GpuOnly))
            .unwrap();
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        cmd.resource_barriers(&[
            Barrier::texture(&a, ResourceState::CopyDst, ResourceState::ShaderResource),
            Barrier::buffer(&b, ResourceState::UnorderedAccess, ResourceState::ShaderResource),
            Barrier::buffer(&b, ResourceState::Common, ResourceState::Common),
        ])
        .unwrap();

        let commands = cmd.headless_commands().unwrap();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            RecordedCommand::Barrier { buffers, images, .. } => {
                assert_eq!(*buffers, 1);
                assert_eq!(images.len(), 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_debug_regions_must_balance() {
        let (_device, mut pool) = setup(CommandPoolFlags::RESET_COMMAND_BUFFER);
        let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        assert!(cmd.end_debug_region().is_err());
        cmd.begin_debug_region("frame", [1.0, 0.0, 0.0, 1.0]).unwrap();
        cmd.end_debug_region().unwrap();
        cmd.end().unwrap();
    }

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
    }
}
