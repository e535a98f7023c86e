//! Render passes, framebuffers, pipeline layouts and pipelines.
//!
//! - [`RenderPass`] declares attachments and subpasses. Dependencies are
//!   implied: external to subpass 0, then each subpass to the next.
//! - [`Framebuffer`] binds textures to the attachments of a render pass.
//! - [`PipelineLayout`] describes descriptor sets and push-constant ranges;
//!   command buffers use it to validate binds and derive push-constant stages.
//! - [`Pipeline`] is a graphics or compute pipeline built from a description.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::debug;

use crate::barrier::ResourceState;
use crate::descriptor::DescriptorSetLayout;
use crate::error::{RhiError, RhiResult};
use crate::headless::{HeadlessFramebuffer, HeadlessPipeline, HeadlessPipelineLayout, HeadlessRenderPass};
use crate::resource::{Shader, Texture};
use crate::types::{
    Backend, ClearValue, Extent2D, Format, LoadOp, PipelineBindPoint, ShaderStage, ShaderStages,
    StoreOp,
};

#[cfg(feature = "vulkan")]
use crate::vulkan::pipeline::{
    VulkanFramebuffer, VulkanPipeline, VulkanPipelineLayout, VulkanRenderPass,
};

backend_inner!(RenderPassInner {
    vulkan: VulkanRenderPass,
    headless: HeadlessRenderPass,
});

backend_inner!(FramebufferInner {
    vulkan: VulkanFramebuffer,
    headless: HeadlessFramebuffer,
});

backend_inner!(PipelineLayoutInner {
    vulkan: VulkanPipelineLayout,
    headless: HeadlessPipelineLayout,
});

backend_inner!(PipelineInner {
    vulkan: VulkanPipeline,
    headless: HeadlessPipeline,
});

// =========================================================================
// Render Pass
// =========================================================================

/// One attachment of a render pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_state: ResourceState,
    pub final_state: ResourceState,
    /// Clear value used by `begin_render_pass`; the format default if `None`.
    pub clear: Option<ClearValue>,
}

impl AttachmentDesc {
    /// Color target that is cleared, stored and left ready for presentation.
    pub fn color_present(format: Format) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            initial_state: ResourceState::Undefined,
            final_state: ResourceState::Present,
            clear: None,
        }
    }

    /// Depth target that is cleared and discarded after the pass.
    pub fn depth(format: Format) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::DontCare,
            initial_state: ResourceState::Undefined,
            final_state: ResourceState::DepthStencil,
            clear: None,
        }
    }

    pub fn with_clear(mut self, clear: ClearValue) -> Self {
        self.clear = Some(clear);
        self
    }
}

/// Attachment references of one subpass, as indices into the render pass
/// attachment list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubpassDesc {
    pub color_attachments: Vec<u32>,
    pub depth_stencil_attachment: Option<u32>,
}

/// Render pass creation parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
}

impl RenderPassDesc {
    pub(crate) fn validate(&self) -> RhiResult<()> {
        if self.subpasses.is_empty() {
            return Err(RhiError::InvalidDescription(
                "render pass needs at least one subpass".to_string(),
            ));
        }
        let count = self.attachments.len() as u32;
        for (i, subpass) in self.subpasses.iter().enumerate() {
            for &color in &subpass.color_attachments {
                let attachment = self.attachments.get(color as usize).ok_or_else(|| {
                    RhiError::InvalidDescription(format!(
                        "subpass {} references color attachment {} of {}",
                        i, color, count
                    ))
                })?;
                if attachment.format.is_depth() {
                    return Err(RhiError::InvalidDescription(format!(
                        "subpass {} uses depth format {:?} as a color attachment",
                        i, attachment.format
                    )));
                }
            }
            if let Some(depth) = subpass.depth_stencil_attachment {
                let attachment = self.attachments.get(depth as usize).ok_or_else(|| {
                    RhiError::InvalidDescription(format!(
                        "subpass {} references depth attachment {} of {}",
                        i, depth, count
                    ))
                })?;
                if !attachment.format.is_depth() {
                    return Err(RhiError::InvalidDescription(format!(
                        "subpass {} uses color format {:?} as a depth attachment",
                        i, attachment.format
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Attachment and subpass layout of a rendering operation.
pub struct RenderPass {
    inner: RenderPassInner,
    attachments: Vec<AttachmentDesc>,
    subpasses: Vec<SubpassDesc>,
}

impl RenderPass {
    pub(crate) fn from_inner(inner: RenderPassInner, desc: &RenderPassDesc) -> Self {
        debug!(
            "Created render pass: {} attachment(s), {} subpass(es)",
            desc.attachments.len(),
            desc.subpasses.len()
        );
        Self {
            inner,
            attachments: desc.attachments.clone(),
            subpasses: desc.subpasses.clone(),
        }
    }

    pub(crate) fn inner(&self) -> &RenderPassInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn attachments(&self) -> &[AttachmentDesc] {
        &self.attachments
    }

    #[inline]
    pub fn subpasses(&self) -> &[SubpassDesc] {
        &self.subpasses
    }

    #[inline]
    pub fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }
}

// =========================================================================
// Framebuffer
// =========================================================================

/// Framebuffer creation parameters.
pub struct FramebufferDesc<'a> {
    pub render_pass: &'a RenderPass,
    /// One texture per render pass attachment, in order.
    pub attachments: Vec<&'a Texture>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

impl FramebufferDesc<'_> {
    pub(crate) fn validate(&self) -> RhiResult<()> {
        let declared = self.render_pass.attachments();
        if self.attachments.len() != declared.len() {
            return Err(RhiError::InvalidDescription(format!(
                "framebuffer has {} attachments, render pass declares {}",
                self.attachments.len(),
                declared.len()
            )));
        }
        if self.width == 0 || self.height == 0 || self.layers == 0 {
            return Err(RhiError::InvalidDescription(format!(
                "framebuffer extent {}x{}x{} has a zero dimension",
                self.width, self.height, self.layers
            )));
        }
        for (i, (texture, attachment)) in self.attachments.iter().zip(declared).enumerate() {
            if texture.format() != attachment.format {
                return Err(RhiError::InvalidDescription(format!(
                    "attachment {} is {:?}, render pass expects {:?}",
                    i,
                    texture.format(),
                    attachment.format
                )));
            }
            let extent = texture.extent();
            if extent.width < self.width || extent.height < self.height {
                return Err(RhiError::InvalidDescription(format!(
                    "attachment {} ({}) is smaller than the framebuffer ({}x{})",
                    i, extent, self.width, self.height
                )));
            }
        }
        Ok(())
    }
}

/// Textures bound to the attachments of a render pass.
pub struct Framebuffer {
    inner: FramebufferInner,
    extent: Extent2D,
    attachment_count: usize,
}

impl Framebuffer {
    pub(crate) fn from_inner(inner: FramebufferInner, desc: &FramebufferDesc<'_>) -> Self {
        debug!(
            "Created framebuffer: {}x{}, {} attachment(s)",
            desc.width,
            desc.height,
            desc.attachments.len()
        );
        Self {
            inner,
            extent: Extent2D::new(desc.width, desc.height),
            attachment_count: desc.attachments.len(),
        }
    }

    pub(crate) fn inner(&self) -> &FramebufferInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }
}

// =========================================================================
// Pipeline Layout
// =========================================================================

/// Byte range of push constants visible to a set of stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

impl PushConstantRange {
    #[inline]
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }
}

/// Pipeline layout creation parameters.
#[derive(Default)]
pub struct PipelineLayoutDesc<'a> {
    pub set_layouts: Vec<&'a DescriptorSetLayout>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl PipelineLayoutDesc<'_> {
    pub(crate) fn validate(&self) -> RhiResult<()> {
        for range in &self.push_constant_ranges {
            if range.size == 0 || range.offset % 4 != 0 || range.size % 4 != 0 {
                return Err(RhiError::InvalidDescription(format!(
                    "push constant range {}+{} must be a nonzero multiple of 4",
                    range.offset, range.size
                )));
            }
            if range.stages.is_empty() {
                return Err(RhiError::InvalidDescription(
                    "push constant range has no shader stages".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// What command buffers need to know about a bound layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineLayoutInfo {
    pub set_layout_count: u32,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl PipelineLayoutInfo {
    /// Returns the union of the stages of every range overlapping
    /// `[offset, offset + size)`, or `None` if the ranges leave any byte of
    /// the span uncovered.
    pub fn push_constant_stages(&self, offset: u32, size: u32) -> Option<ShaderStages> {
        let end = offset.checked_add(size)?;
        let mut overlapping: Vec<&PushConstantRange> = self
            .push_constant_ranges
            .iter()
            .filter(|range| range.offset < end && range.end() > offset)
            .collect();
        if overlapping.is_empty() {
            return None;
        }

        overlapping.sort_by_key(|range| range.offset);
        let mut covered = offset;
        for range in &overlapping {
            if range.offset > covered {
                return None;
            }
            covered = covered.max(range.end());
        }
        if covered < end {
            return None;
        }

        Some(
            overlapping
                .iter()
                .fold(ShaderStages::empty(), |stages, range| stages | range.stages),
        )
    }
}

struct PipelineLayoutShared {
    inner: PipelineLayoutInner,
    info: PipelineLayoutInfo,
}

/// Descriptor set and push-constant interface of a pipeline. Cheap to clone.
#[derive(Clone)]
pub struct PipelineLayout {
    shared: Arc<PipelineLayoutShared>,
}

impl PipelineLayout {
    pub(crate) fn from_inner(inner: PipelineLayoutInner, info: PipelineLayoutInfo) -> Self {
        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            info.set_layout_count,
            info.push_constant_ranges.len()
        );
        Self {
            shared: Arc::new(PipelineLayoutShared { inner, info }),
        }
    }

    pub(crate) fn inner(&self) -> &PipelineLayoutInner {
        &self.shared.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.shared.inner.backend()
    }

    #[inline]
    pub fn info(&self) -> &PipelineLayoutInfo {
        &self.shared.info
    }
}

// =========================================================================
// Fixed-Function State
// =========================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    /// Color channels written by a pipeline.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u32 {
        const R = 0x1;
        const G = 0x2;
        const B = 0x4;
        const A = 0x8;
        const ALL = 0xF;
    }
}

/// Blend state of one color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }
}

impl ColorBlendAttachment {
    /// Standard premultiplied-style alpha blending.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: BlendFactor::SrcAlpha,
            dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }
}

/// Whether a vertex binding advances per vertex or per instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VertexInputRate {
    #[default]
    Vertex,
    Instance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

// =========================================================================
// Pipelines
// =========================================================================

/// Graphics pipeline creation parameters, built in the usual builder style.
///
/// Viewport and scissor are always dynamic state.
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_shader: &'a Shader,
    pub fragment_shader: Option<&'a Shader>,
    pub layout: &'a PipelineLayout,
    pub render_pass: &'a RenderPass,
    pub subpass: u32,
    pub vertex_bindings: Vec<VertexBinding>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub topology: PrimitiveTopology,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    /// One entry per color attachment of the subpass; defaults when empty.
    pub color_blend_attachments: Vec<ColorBlendAttachment>,
}

impl<'a> GraphicsPipelineDesc<'a> {
    pub fn new(
        vertex_shader: &'a Shader,
        layout: &'a PipelineLayout,
        render_pass: &'a RenderPass,
    ) -> Self {
        Self {
            vertex_shader,
            fragment_shader: None,
            layout,
            render_pass,
            subpass: 0,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::Less,
            color_blend_attachments: Vec::new(),
        }
    }

    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }

    pub fn vertex_binding(mut self, binding: VertexBinding) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[VertexAttribute]) -> Self {
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn depth_test(mut self, test: bool, write: bool, compare: CompareOp) -> Self {
        self.depth_test_enable = test;
        self.depth_write_enable = write;
        self.depth_compare_op = compare;
        self
    }

    pub fn color_blend_attachment(mut self, attachment: ColorBlendAttachment) -> Self {
        self.color_blend_attachments.push(attachment);
        self
    }

    pub(crate) fn validate(&self) -> RhiResult<()> {
        if self.vertex_shader.stage() != ShaderStage::Vertex {
            return Err(RhiError::Pipeline(format!(
                "vertex shader slot holds a {} shader",
                self.vertex_shader.stage()
            )));
        }
        if let Some(fragment) = self.fragment_shader {
            if fragment.stage() != ShaderStage::Fragment {
                return Err(RhiError::Pipeline(format!(
                    "fragment shader slot holds a {} shader",
                    fragment.stage()
                )));
            }
        }
        let Some(subpass) = self.render_pass.subpasses().get(self.subpass as usize) else {
            return Err(RhiError::Pipeline(format!(
                "subpass {} does not exist in the render pass",
                self.subpass
            )));
        };
        if !self.color_blend_attachments.is_empty()
            && self.color_blend_attachments.len() != subpass.color_attachments.len()
        {
            return Err(RhiError::Pipeline(format!(
                "{} blend attachment(s) for {} color attachment(s)",
                self.color_blend_attachments.len(),
                subpass.color_attachments.len()
            )));
        }
        for attribute in &self.vertex_attributes {
            if !self
                .vertex_bindings
                .iter()
                .any(|binding| binding.binding == attribute.binding)
            {
                return Err(RhiError::Pipeline(format!(
                    "attribute at location {} references missing binding {}",
                    attribute.location, attribute.binding
                )));
            }
        }
        Ok(())
    }
}

/// Compute pipeline creation parameters.
pub struct ComputePipelineDesc<'a> {
    pub shader: &'a Shader,
    pub layout: &'a PipelineLayout,
}

impl ComputePipelineDesc<'_> {
    pub(crate) fn validate(&self) -> RhiResult<()> {
        if self.shader.stage() != ShaderStage::Compute {
            return Err(RhiError::Pipeline(format!(
                "compute pipeline given a {} shader",
                self.shader.stage()
            )));
        }
        Ok(())
    }
}

/// A graphics or compute pipeline.
pub struct Pipeline {
    inner: PipelineInner,
    bind_point: PipelineBindPoint,
    layout: PipelineLayout,
}

impl Pipeline {
    pub(crate) fn from_inner(
        inner: PipelineInner,
        bind_point: PipelineBindPoint,
        layout: PipelineLayout,
    ) -> Self {
        debug!("{:?} pipeline created", bind_point);
        Self {
            inner,
            bind_point,
            layout,
        }
    }

    pub(crate) fn inner(&self) -> &PipelineInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn bind_point(&self) -> PipelineBindPoint {
        self.bind_point
    }

    #[inline]
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ranges: &[(ShaderStages, u32, u32)]) -> PipelineLayoutInfo {
        PipelineLayoutInfo {
            set_layout_count: 0,
            push_constant_ranges: ranges
                .iter()
                .map(|&(stages, offset, size)| PushConstantRange {
                    stages,
                    offset,
                    size,
                })
                .collect(),
        }
    }

    #[test]
    fn test_push_constant_stages_single_range() {
        let layout = info(&[(ShaderStages::VERTEX, 0, 64)]);
        assert_eq!(
            layout.push_constant_stages(0, 64),
            Some(ShaderStages::VERTEX)
        );
        assert_eq!(
            layout.push_constant_stages(16, 16),
            Some(ShaderStages::VERTEX)
        );
        assert_eq!(layout.push_constant_stages(60, 8), None);
        assert_eq!(layout.push_constant_stages(64, 4), None);
    }

    #[test]
    fn test_push_constant_stages_union_of_overlapping_ranges() {
        let layout = info(&[
            (ShaderStages::VERTEX, 0, 64),
            (ShaderStages::FRAGMENT, 64, 16),
        ]);
        assert_eq!(
            layout.push_constant_stages(48, 32),
            Some(ShaderStages::VERTEX | ShaderStages::FRAGMENT)
        );
        assert_eq!(
            layout.push_constant_stages(64, 16),
            Some(ShaderStages::FRAGMENT)
        );
    }

    #[test]
    fn test_push_constant_stages_gap_is_uncovered() {
        let layout = info(&[
            (ShaderStages::VERTEX, 0, 16),
            (ShaderStages::FRAGMENT, 32, 16),
        ]);
        assert_eq!(layout.push_constant_stages(0, 48), None);
        assert_eq!(info(&[]).push_constant_stages(0, 4), None);
    }

    #[test]
    fn test_render_pass_desc_validation() {
        let valid = RenderPassDesc {
            attachments: vec![
                AttachmentDesc::color_present(Format::Bgra8Srgb),
                AttachmentDesc::depth(Format::Depth32F),
            ],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                depth_stencil_attachment: Some(1),
            }],
        };
        assert!(valid.validate().is_ok());

        let swapped = RenderPassDesc {
            subpasses: vec![SubpassDesc {
                color_attachments: vec![1],
                depth_stencil_attachment: Some(0),
            }],
            ..valid.clone()
        };
        assert!(swapped.validate().is_err());

        let out_of_range = RenderPassDesc {
            subpasses: vec![SubpassDesc {
                color_attachments: vec![5],
                depth_stencil_attachment: None,
            }],
            ..valid.clone()
        };
        assert!(out_of_range.validate().is_err());

        let no_subpasses = RenderPassDesc {
            subpasses: vec![],
            ..valid
        };
        assert!(no_subpasses.validate().is_err());
    }

    #[test]
    fn test_attachment_presets() {
        let color = AttachmentDesc::color_present(Format::Bgra8Srgb);
        assert_eq!(color.load_op, LoadOp::Clear);
        assert_eq!(color.store_op, StoreOp::Store);
        assert_eq!(color.final_state, ResourceState::Present);

        let depth = AttachmentDesc::depth(Format::Depth32F);
        assert_eq!(depth.store_op, StoreOp::DontCare);
        assert_eq!(depth.final_state, ResourceState::DepthStencil);
    }

    #[test]
    fn test_default_trait_implementations() {
        assert_eq!(PrimitiveTopology::default(), PrimitiveTopology::TriangleList);
        assert_eq!(PolygonMode::default(), PolygonMode::Fill);
        assert_eq!(CullMode::default(), CullMode::Back);
        assert_eq!(FrontFace::default(), FrontFace::CounterClockwise);
        assert_eq!(CompareOp::default(), CompareOp::Less);
        assert_eq!(BlendOp::default(), BlendOp::Add);

        let attachment = ColorBlendAttachment::default();
        assert!(!attachment.blend_enable);
        assert_eq!(attachment.write_mask, ColorWriteMask::ALL);
        assert!(ColorBlendAttachment::alpha_blend().blend_enable);
    }
}
