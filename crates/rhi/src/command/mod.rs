//! Command buffers and command pools.
//!
//! - [`CommandPool`] owns an arena of [`CommandBuffer`]s and hands out
//!   generation-checked [`CommandBufferHandle`]s. Freeing a buffer or
//!   resetting the pool makes older handles detectably stale instead of
//!   silently dangling.
//! - [`CommandBuffer`] records GPU work behind an explicit state machine:
//!
//! ```text
//! Initial --begin()--> Recording --end()--> Executable --submit--> Pending
//!    ^                                                                |
//!    +----------- GPU done (pool allows reset, otherwise Invalid) ---+
//! ```
//!
//! Every recording call outside `Recording` returns
//! [`RhiError::ProtocolViolation`](crate::RhiError::ProtocolViolation) and
//! records nothing.

mod buffer;
mod pool;

pub use buffer::{
    BeginInfo, BufferCopy, BufferTextureCopy, CommandBuffer, CommandBufferState,
    RenderPassInheritance,
};
pub use pool::{CommandBufferHandle, CommandPool, CommandPoolFlags};

pub(crate) use pool::CommandPoolInner;

use crate::barrier::ResolvedBarriers;
use crate::descriptor::DescriptorSet;
use crate::pipeline::{Framebuffer, Pipeline, PipelineLayout, RenderPass};
use crate::resource::{Buffer, Texture};
use crate::types::{
    ClearValue, IndexType, PipelineBindPoint, Rect2D, ShaderStages, SubpassContents, Viewport,
};

/// A validated command handed to a backend for recording.
pub(crate) enum Command<'a> {
    BeginRenderPass {
        render_pass: &'a RenderPass,
        framebuffer: &'a Framebuffer,
        area: Rect2D,
        clear_values: &'a [ClearValue],
        contents: SubpassContents,
    },
    NextSubpass(SubpassContents),
    EndRenderPass,
    BindPipeline(&'a Pipeline),
    BindDescriptorSet {
        bind_point: PipelineBindPoint,
        layout: &'a PipelineLayout,
        index: u32,
        set: &'a DescriptorSet,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: &'a Buffer,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: &'a Buffer,
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
    CopyBuffer {
        src: &'a Buffer,
        dst: &'a Buffer,
        region: BufferCopy,
    },
    CopyBufferToTexture {
        src: &'a Buffer,
        dst: &'a Texture,
        region: BufferTextureCopy,
    },
    Barrier(&'a ResolvedBarriers<'a>),
    PushConstants {
        layout: &'a PipelineLayout,
        stages: ShaderStages,
        offset: u32,
        data: &'a [u8],
    },
    ExecuteSecondary(&'a [&'a CommandBuffer]),
    BeginDebugRegion {
        name: &'a str,
        color: [f32; 4],
    },
    EndDebugRegion,
}
