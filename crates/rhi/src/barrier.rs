//! Resource states and barriers.
//!
//! Every buffer and texture is, at any point in recorded-command order, in
//! exactly one [`ResourceState`]. Moving it to another state requires an
//! explicit [`Barrier`]. The state names are purely semantic; the mapping to
//! image layouts, pipeline stages and access masks lives here so that every
//! backend derives identical transitions.
//!
//! # Example
//!
//! ```
//! use mango_rhi::{Barrier, BarrierBatch, Device, DeviceDesc, Format, ResourceState, TextureDesc, TextureUsage};
//!
//! # fn main() -> Result<(), mango_rhi::RhiError> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let texture = device.create_texture(&TextureDesc::new_2d(
//!     Format::Rgba8Unorm,
//!     256,
//!     256,
//!     TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
//! ))?;
//!
//! let barriers = [Barrier::texture(&texture, ResourceState::Undefined, ResourceState::CopyDst)];
//! let resolved = BarrierBatch::resolve(&barriers)?;
//! assert_eq!(resolved.images.len(), 1);
//! # Ok(())
//! # }
//! ```

use bitflags::bitflags;

use crate::error::{RhiError, RhiResult};
use crate::resource::{Buffer, Sampler, Texture};

bitflags! {
    /// Pipeline stages. Bit values match `VkPipelineStageFlags`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 0x1;
        const DRAW_INDIRECT = 0x2;
        const VERTEX_INPUT = 0x4;
        const VERTEX_SHADER = 0x8;
        const TESSELLATION_CONTROL_SHADER = 0x10;
        const TESSELLATION_EVALUATION_SHADER = 0x20;
        const GEOMETRY_SHADER = 0x40;
        const FRAGMENT_SHADER = 0x80;
        const EARLY_FRAGMENT_TESTS = 0x100;
        const LATE_FRAGMENT_TESTS = 0x200;
        const COLOR_ATTACHMENT_OUTPUT = 0x400;
        const COMPUTE_SHADER = 0x800;
        const TRANSFER = 0x1000;
        const BOTTOM_OF_PIPE = 0x2000;
        const HOST = 0x4000;
        const ALL_GRAPHICS = 0x8000;
        const ALL_COMMANDS = 0x10000;
    }
}

bitflags! {
    /// Memory access types. Bit values match `VkAccessFlags`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 0x1;
        const INDEX_READ = 0x2;
        const VERTEX_ATTRIBUTE_READ = 0x4;
        const UNIFORM_READ = 0x8;
        const INPUT_ATTACHMENT_READ = 0x10;
        const SHADER_READ = 0x20;
        const SHADER_WRITE = 0x40;
        const COLOR_ATTACHMENT_READ = 0x80;
        const COLOR_ATTACHMENT_WRITE = 0x100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x400;
        const TRANSFER_READ = 0x800;
        const TRANSFER_WRITE = 0x1000;
        const HOST_READ = 0x2000;
        const HOST_WRITE = 0x4000;
        const MEMORY_READ = 0x8000;
        const MEMORY_WRITE = 0x10000;
    }
}

bitflags! {
    /// Image aspects. Bit values match `VkImageAspectFlags`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        const COLOR = 0x1;
        const DEPTH = 0x2;
        const STENCIL = 0x4;
    }
}

impl ImageAspect {
    /// Returns the aspects present in `format`.
    pub fn from_format(format: crate::types::Format) -> Self {
        if format.has_stencil() {
            ImageAspect::DEPTH | ImageAspect::STENCIL
        } else if format.is_depth() {
            ImageAspect::DEPTH
        } else {
            ImageAspect::COLOR
        }
    }
}

/// Backend-neutral image layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// Semantic state of a GPU resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Contents are undefined; only valid as a `before` state.
    #[default]
    Undefined,
    Common,
    RenderTarget,
    DepthStencil,
    ShaderResource,
    UnorderedAccess,
    CopySrc,
    CopyDst,
    Present,
}

impl ResourceState {
    /// Image layout a texture must be in while in this state.
    pub fn layout(self) -> ImageLayout {
        match self {
            ResourceState::Undefined => ImageLayout::Undefined,
            ResourceState::Common => ImageLayout::General,
            ResourceState::RenderTarget => ImageLayout::ColorAttachment,
            ResourceState::DepthStencil => ImageLayout::DepthStencilAttachment,
            ResourceState::ShaderResource => ImageLayout::ShaderReadOnly,
            ResourceState::UnorderedAccess => ImageLayout::General,
            ResourceState::CopySrc => ImageLayout::TransferSrc,
            ResourceState::CopyDst => ImageLayout::TransferDst,
            ResourceState::Present => ImageLayout::PresentSrc,
        }
    }

    /// Pipeline stages that touch a resource in this state.
    pub fn stages(self) -> PipelineStages {
        match self {
            ResourceState::Undefined => PipelineStages::TOP_OF_PIPE,
            ResourceState::Common => PipelineStages::ALL_COMMANDS,
            ResourceState::RenderTarget => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            ResourceState::DepthStencil => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            ResourceState::ShaderResource => {
                PipelineStages::VERTEX_SHADER
                    | PipelineStages::FRAGMENT_SHADER
                    | PipelineStages::COMPUTE_SHADER
            }
            ResourceState::UnorderedAccess => PipelineStages::COMPUTE_SHADER,
            ResourceState::CopySrc | ResourceState::CopyDst => PipelineStages::TRANSFER,
            ResourceState::Present => PipelineStages::BOTTOM_OF_PIPE,
        }
    }

    /// Memory accesses performed on a resource in this state.
    pub fn access(self) -> AccessFlags {
        match self {
            ResourceState::Undefined | ResourceState::Present => AccessFlags::empty(),
            ResourceState::Common => AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
            ResourceState::RenderTarget => {
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            ResourceState::DepthStencil => {
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            ResourceState::ShaderResource => AccessFlags::SHADER_READ,
            ResourceState::UnorderedAccess => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            ResourceState::CopySrc => AccessFlags::TRANSFER_READ,
            ResourceState::CopyDst => AccessFlags::TRANSFER_WRITE,
        }
    }
}

/// Mip and array-layer span of a texture. `None` counts mean "all remaining".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: Option<u32>,
    pub base_layer: u32,
    pub layer_count: Option<u32>,
}

impl SubresourceRange {
    /// A single mip level of a single layer.
    pub fn single(mip: u32, layer: u32) -> Self {
        Self {
            base_mip: mip,
            mip_count: Some(1),
            base_layer: layer,
            layer_count: Some(1),
        }
    }
}

/// Ownership transfer between queue families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueTransfer {
    pub src_family: u32,
    pub dst_family: u32,
}

/// Explicit stage and access masks that replace the derived ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaskOverride {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// The object a barrier applies to.
#[derive(Clone, Copy)]
pub enum BarrierResource<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
    /// Samplers carry no state; a barrier on one is rejected.
    Sampler(&'a Sampler),
}

impl BarrierResource<'_> {
    fn kind_name(&self) -> &'static str {
        match self {
            BarrierResource::Buffer(_) => "buffer",
            BarrierResource::Texture(_) => "texture",
            BarrierResource::Sampler(_) => "sampler",
        }
    }
}

/// A state transition of one resource.
#[derive(Clone, Copy)]
pub struct Barrier<'a> {
    pub resource: BarrierResource<'a>,
    pub before: ResourceState,
    pub after: ResourceState,
    pub subresource: Option<SubresourceRange>,
    pub queue_transfer: Option<QueueTransfer>,
    pub overrides: Option<MaskOverride>,
}

impl<'a> Barrier<'a> {
    pub fn new(resource: BarrierResource<'a>, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
            subresource: None,
            queue_transfer: None,
            overrides: None,
        }
    }

    pub fn buffer(buffer: &'a Buffer, before: ResourceState, after: ResourceState) -> Self {
        Self::new(BarrierResource::Buffer(buffer), before, after)
    }

    pub fn texture(texture: &'a Texture, before: ResourceState, after: ResourceState) -> Self {
        Self::new(BarrierResource::Texture(texture), before, after)
    }

    /// Restricts a texture barrier to part of the image.
    pub fn with_subresource(mut self, range: SubresourceRange) -> Self {
        self.subresource = Some(range);
        self
    }

    pub fn with_queue_transfer(mut self, src_family: u32, dst_family: u32) -> Self {
        self.queue_transfer = Some(QueueTransfer {
            src_family,
            dst_family,
        });
        self
    }

    pub fn with_overrides(mut self, overrides: MaskOverride) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Returns true when the barrier has no effect and can be dropped.
    pub fn is_noop(&self) -> bool {
        self.before == self.after && self.overrides.is_none() && self.queue_transfer.is_none()
    }

    fn masks(&self) -> (PipelineStages, PipelineStages, AccessFlags, AccessFlags) {
        match self.overrides {
            Some(o) => (o.src_stages, o.dst_stages, o.src_access, o.dst_access),
            None => (
                self.before.stages(),
                self.after.stages(),
                self.before.access(),
                self.after.access(),
            ),
        }
    }
}

/// A buffer memory barrier after mask derivation.
#[derive(Clone, Copy)]
pub struct BufferTransition<'a> {
    pub buffer: &'a Buffer,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub queue_transfer: Option<QueueTransfer>,
}

/// An image memory barrier after mask and layout derivation.
#[derive(Clone, Copy)]
pub struct ImageTransition<'a> {
    pub texture: &'a Texture,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub aspect: ImageAspect,
    pub range: SubresourceRange,
    pub queue_transfer: Option<QueueTransfer>,
}

/// One coalesced pipeline barrier, ready for a backend.
#[derive(Clone, Default)]
pub struct ResolvedBarriers<'a> {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub buffers: Vec<BufferTransition<'a>>,
    pub images: Vec<ImageTransition<'a>>,
}

impl ResolvedBarriers<'_> {
    /// Returns true when nothing needs to be recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    /// Total number of transitions.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len()
    }
}

/// Coalesces barriers into a single backend barrier.
pub struct BarrierBatch;

impl BarrierBatch {
    /// Derives masks and layouts for every barrier and merges them.
    ///
    /// Stage masks are the union over all barriers. An empty source mask
    /// becomes top-of-pipe and an empty destination mask becomes
    /// bottom-of-pipe. Buffer and image transitions keep their order.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedResource`] if any barrier targets a
    /// resource kind without state (a sampler).
    pub fn resolve<'a>(barriers: &[Barrier<'a>]) -> RhiResult<ResolvedBarriers<'a>> {
        let mut resolved = ResolvedBarriers::default();

        for barrier in barriers {
            // Validate first so a sampler is rejected even in a no-op barrier.
            if let BarrierResource::Sampler(_) = barrier.resource {
                return Err(RhiError::UnsupportedResource(barrier.resource.kind_name()));
            }

            if barrier.is_noop() {
                continue;
            }

            let (src_stages, dst_stages, src_access, dst_access) = barrier.masks();
            resolved.src_stages |= src_stages;
            resolved.dst_stages |= dst_stages;

            match barrier.resource {
                BarrierResource::Buffer(buffer) => resolved.buffers.push(BufferTransition {
                    buffer,
                    src_access,
                    dst_access,
                    queue_transfer: barrier.queue_transfer,
                }),
                BarrierResource::Texture(texture) => resolved.images.push(ImageTransition {
                    texture,
                    old_layout: barrier.before.layout(),
                    new_layout: barrier.after.layout(),
                    src_access,
                    dst_access,
                    aspect: ImageAspect::from_format(texture.format()),
                    range: barrier.subresource.unwrap_or_default(),
                    queue_transfer: barrier.queue_transfer,
                }),
                BarrierResource::Sampler(_) => {}
            }
        }

        if !resolved.is_empty() {
            if resolved.src_stages.is_empty() {
                resolved.src_stages = PipelineStages::TOP_OF_PIPE;
            }
            if resolved.dst_stages.is_empty() {
                resolved.dst_stages = PipelineStages::BOTTOM_OF_PIPE;
            }
        }

        Ok(resolved)
    }
}
