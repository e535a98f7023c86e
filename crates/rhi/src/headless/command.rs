//! Headless command recording.
//!
//! Validated commands are stored as owned [`RecordedCommand`] values so
//! tests can assert on exactly what a frame recorded.

use crate::barrier::{ImageLayout, PipelineStages};
use crate::command::{BufferCopy, BufferTextureCopy, Command, CommandPoolFlags};
use crate::types::{
    ClearValue, CommandBufferLevel, IndexType, PipelineBindPoint, Rect2D, ShaderStages,
    SubpassContents, Viewport,
};

/// A command as recorded by a headless command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        area: Rect2D,
        clear_values: Vec<ClearValue>,
        contents: SubpassContents,
    },
    NextSubpass(SubpassContents),
    EndRenderPass,
    BindPipeline(PipelineBindPoint),
    BindDescriptorSet {
        bind_point: PipelineBindPoint,
        index: u32,
    },
    BindVertexBuffer {
        binding: u32,
        offset: u64,
    },
    BindIndexBuffer {
        offset: u64,
        index_type: IndexType,
    },
    SetViewport(Viewport),
    SetScissor(Rect2D),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer(BufferCopy),
    CopyBufferToTexture(BufferTextureCopy),
    /// One coalesced pipeline barrier.
    Barrier {
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        buffers: usize,
        /// Layout transition of each image, in order.
        images: Vec<(ImageLayout, ImageLayout)>,
    },
    PushConstants {
        stages: ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    /// Number of secondary buffers executed.
    ExecuteSecondary(usize),
    BeginDebugRegion(String),
    EndDebugRegion,
}

impl From<&Command<'_>> for RecordedCommand {
    fn from(command: &Command<'_>) -> Self {
        match command {
            Command::BeginRenderPass {
                area,
                clear_values,
                contents,
                ..
            } => RecordedCommand::BeginRenderPass {
                area: *area,
                clear_values: clear_values.to_vec(),
                contents: *contents,
            },
            Command::NextSubpass(contents) => RecordedCommand::NextSubpass(*contents),
            Command::EndRenderPass => RecordedCommand::EndRenderPass,
            Command::BindPipeline(pipeline) => RecordedCommand::BindPipeline(pipeline.bind_point()),
            Command::BindDescriptorSet {
                bind_point, index, ..
            } => RecordedCommand::BindDescriptorSet {
                bind_point: *bind_point,
                index: *index,
            },
            Command::BindVertexBuffer {
                binding, offset, ..
            } => RecordedCommand::BindVertexBuffer {
                binding: *binding,
                offset: *offset,
            },
            Command::BindIndexBuffer {
                offset, index_type, ..
            } => RecordedCommand::BindIndexBuffer {
                offset: *offset,
                index_type: *index_type,
            },
            Command::SetViewport(viewport) => RecordedCommand::SetViewport(*viewport),
            Command::SetScissor(scissor) => RecordedCommand::SetScissor(*scissor),
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => RecordedCommand::Draw {
                vertex_count: *vertex_count,
                instance_count: *instance_count,
                first_vertex: *first_vertex,
                first_instance: *first_instance,
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => RecordedCommand::DrawIndexed {
                index_count: *index_count,
                instance_count: *instance_count,
                first_index: *first_index,
                vertex_offset: *vertex_offset,
                first_instance: *first_instance,
            },
            Command::Dispatch { x, y, z } => RecordedCommand::Dispatch {
                x: *x,
                y: *y,
                z: *z,
            },
            Command::CopyBuffer { region, .. } => RecordedCommand::CopyBuffer(*region),
            Command::CopyBufferToTexture { region, .. } => {
                RecordedCommand::CopyBufferToTexture(*region)
            }
            Command::Barrier(resolved) => RecordedCommand::Barrier {
                src_stages: resolved.src_stages,
                dst_stages: resolved.dst_stages,
                buffers: resolved.buffers.len(),
                images: resolved
                    .images
                    .iter()
                    .map(|image| (image.old_layout, image.new_layout))
                    .collect(),
            },
            Command::PushConstants {
                stages,
                offset,
                data,
                ..
            } => RecordedCommand::PushConstants {
                stages: *stages,
                offset: *offset,
                data: data.to_vec(),
            },
            Command::ExecuteSecondary(secondaries) => {
                RecordedCommand::ExecuteSecondary(secondaries.len())
            }
            Command::BeginDebugRegion { name, .. } => {
                RecordedCommand::BeginDebugRegion((*name).to_string())
            }
            Command::EndDebugRegion => RecordedCommand::EndDebugRegion,
        }
    }
}

pub(crate) struct HeadlessCommandBuffer {
    commands: Vec<RecordedCommand>,
}

impl HeadlessCommandBuffer {
    pub(crate) fn record(&mut self, command: &Command<'_>) {
        self.commands.push(command.into());
    }

    pub(crate) fn begin(&mut self) {
        self.commands.clear();
    }

    pub(crate) fn end(&mut self) {}

    pub(crate) fn reset(&mut self) {
        self.commands.clear();
    }

    pub(crate) fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }
}

pub(crate) struct HeadlessCommandPool {
    family: u32,
    flags: CommandPoolFlags,
}

impl HeadlessCommandPool {
    pub(crate) fn new(family: u32, flags: CommandPoolFlags) -> Self {
        Self { family, flags }
    }

    pub(crate) fn allocate(&self, level: CommandBufferLevel) -> HeadlessCommandBuffer {
        tracing::trace!(
            "headless: allocated {:?} command buffer from family {} ({:?})",
            level,
            self.family,
            self.flags
        );
        HeadlessCommandBuffer {
            commands: Vec::new(),
        }
    }
}
