use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::pipeline::{
    AttachmentDesc, ColorBlendAttachment, ComputePipelineDesc, FramebufferDesc,
    GraphicsPipelineDesc, PipelineLayoutDesc, RenderPassDesc,
};

use super::VulkanContext;
use super::conv;

// =========================================================================
// Render Pass
// =========================================================================

pub(crate) struct VulkanRenderPass {
    ctx: Arc<VulkanContext>,
    render_pass: vk::RenderPass,
}

impl VulkanRenderPass {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &RenderPassDesc) -> RhiResult<Self> {
        let attachments = desc
            .attachments
            .iter()
            .map(attachment_description)
            .collect::<RhiResult<Vec<_>>>()?;

        let color_refs = desc
            .subpasses
            .iter()
            .map(|subpass| {
                subpass
                    .color_attachments
                    .iter()
                    .map(|&attachment| vk::AttachmentReference {
                        attachment,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let depth_refs = desc
            .subpasses
            .iter()
            .map(|subpass| {
                subpass
                    .depth_stencil_attachment
                    .map(|attachment| vk::AttachmentReference {
                        attachment,
                        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    })
            })
            .collect::<Vec<_>>();

        let subpasses = color_refs
            .iter()
            .zip(&depth_refs)
            .map(|(colors, depth)| {
                let subpass = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(colors);
                match depth {
                    Some(depth) => subpass.depth_stencil_attachment(depth),
                    None => subpass,
                }
            })
            .collect::<Vec<_>>();

        let dependencies = subpass_dependencies(desc.subpasses.len());
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { ctx.device().create_render_pass(&create_info, None)? };
        Ok(Self { ctx, render_pass })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_render_pass(self.render_pass, None) };
    }
}

fn attachment_description(desc: &AttachmentDesc) -> RhiResult<vk::AttachmentDescription> {
    let final_layout = conv::image_layout(desc.final_state.layout());
    if final_layout == vk::ImageLayout::UNDEFINED {
        return Err(RhiError::InvalidDescription(format!(
            "{:?} attachment cannot end the pass in an undefined layout",
            desc.format
        )));
    }
    let (stencil_load, stencil_store) = if desc.format.has_stencil() {
        (conv::load_op(desc.load_op), conv::store_op(desc.store_op))
    } else {
        (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
    };
    Ok(vk::AttachmentDescription::default()
        .format(conv::format(desc.format))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(conv::load_op(desc.load_op))
        .store_op(conv::store_op(desc.store_op))
        .stencil_load_op(stencil_load)
        .stencil_store_op(stencil_store)
        .initial_layout(conv::image_layout(desc.initial_state.layout()))
        .final_layout(final_layout))
}

/// External work finishes its attachment writes before subpass 0, and each
/// subpass sees the attachment writes of the previous one.
fn subpass_dependencies(subpass_count: usize) -> Vec<vk::SubpassDependency> {
    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

    let mut dependencies = vec![vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: attachment_stages,
        dst_stage_mask: attachment_stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: attachment_writes,
        dependency_flags: vk::DependencyFlags::empty(),
    }];
    for subpass in 1..subpass_count as u32 {
        dependencies.push(vk::SubpassDependency {
            src_subpass: subpass - 1,
            dst_subpass: subpass,
            src_stage_mask: attachment_stages,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER | attachment_stages,
            src_access_mask: attachment_writes,
            dst_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ
                | vk::AccessFlags::SHADER_READ
                | attachment_writes,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        });
    }
    dependencies
}

// =========================================================================
// Framebuffer
// =========================================================================

pub(crate) struct VulkanFramebuffer {
    ctx: Arc<VulkanContext>,
    framebuffer: vk::Framebuffer,
}

impl VulkanFramebuffer {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &FramebufferDesc<'_>) -> RhiResult<Self> {
        let views = desc
            .attachments
            .iter()
            .map(|texture| texture.inner().as_vulkan().map(|t| t.view()))
            .collect::<RhiResult<Vec<_>>>()?;
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(desc.render_pass.inner().as_vulkan()?.handle())
            .attachments(&views)
            .width(desc.width)
            .height(desc.height)
            .layers(desc.layers.max(1));
        let framebuffer = unsafe { ctx.device().create_framebuffer(&create_info, None)? };
        Ok(Self { ctx, framebuffer })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for VulkanFramebuffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_framebuffer(self.framebuffer, None) };
    }
}

// =========================================================================
// Pipeline Layout
// =========================================================================

pub(crate) struct VulkanPipelineLayout {
    ctx: Arc<VulkanContext>,
    layout: vk::PipelineLayout,
}

impl VulkanPipelineLayout {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &PipelineLayoutDesc<'_>) -> RhiResult<Self> {
        let set_layouts = desc
            .set_layouts
            .iter()
            .map(|layout| layout.inner().as_vulkan().map(|l| l.handle()))
            .collect::<RhiResult<Vec<_>>>()?;
        let push_constant_ranges = desc
            .push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: conv::shader_stages(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect::<Vec<_>>();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { ctx.device().create_pipeline_layout(&create_info, None)? };
        Ok(Self { ctx, layout })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for VulkanPipelineLayout {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_pipeline_layout(self.layout, None) };
    }
}

// =========================================================================
// Pipelines
// =========================================================================

pub(crate) struct VulkanPipeline {
    ctx: Arc<VulkanContext>,
    pipeline: vk::Pipeline,
}

impl VulkanPipeline {
    pub(crate) fn graphics(ctx: Arc<VulkanContext>, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<Self> {
        let vertex = desc.vertex_shader.inner().as_vulkan()?;
        let mut stages = vec![
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.handle())
                .name(vertex.entry_point()),
        ];
        if let Some(fragment) = desc.fragment_shader {
            let fragment = fragment.inner().as_vulkan()?;
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment.handle())
                    .name(fragment.entry_point()),
            );
        }

        let bindings = desc
            .vertex_bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: conv::vertex_input_rate(binding.input_rate),
            })
            .collect::<Vec<_>>();
        let attributes = desc
            .vertex_attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: conv::format(attribute.format),
                offset: attribute.offset,
            })
            .collect::<Vec<_>>();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(conv::topology(desc.topology))
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(conv::polygon_mode(desc.polygon_mode))
            .cull_mode(conv::cull_mode(desc.cull_mode))
            .front_face(conv::front_face(desc.front_face))
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test_enable)
            .depth_write_enable(desc.depth_write_enable)
            .depth_compare_op(conv::compare_op(desc.depth_compare_op));

        let color_count = desc
            .render_pass
            .subpasses()
            .get(desc.subpass as usize)
            .map_or(0, |subpass| subpass.color_attachments.len());
        let blend_attachments = blend_attachments(&desc.color_blend_attachments, color_count);
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout.inner().as_vulkan()?.handle())
            .render_pass(desc.render_pass.inner().as_vulkan()?.handle())
            .subpass(desc.subpass);

        let pipeline = unsafe {
            ctx.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| RhiError::Pipeline(format!("graphics pipeline creation failed: {}", e)))?
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::Pipeline("driver returned no pipeline".to_string()))?;
        debug!("Vulkan graphics pipeline created ({} stage(s))", stages.len());
        Ok(Self { ctx, pipeline })
    }

    pub(crate) fn compute(ctx: Arc<VulkanContext>, desc: &ComputePipelineDesc<'_>) -> RhiResult<Self> {
        let shader = desc.shader.inner().as_vulkan()?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(shader.entry_point());
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(desc.layout.inner().as_vulkan()?.handle());
        let pipeline = unsafe {
            ctx.device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| RhiError::Pipeline(format!("compute pipeline creation failed: {}", e)))?
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::Pipeline("driver returned no pipeline".to_string()))?;
        Ok(Self { ctx, pipeline })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_pipeline(self.pipeline, None) };
    }
}

/// One blend state per color attachment; the defaults when none are given.
fn blend_attachments(
    attachments: &[ColorBlendAttachment],
    color_count: usize,
) -> Vec<vk::PipelineColorBlendAttachmentState> {
    let defaults;
    let attachments = if attachments.is_empty() {
        defaults = vec![ColorBlendAttachment::default(); color_count];
        &defaults
    } else {
        attachments
    };
    attachments
        .iter()
        .map(|blend| vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::Bool32::from(blend.blend_enable),
            src_color_blend_factor: conv::blend_factor(blend.src_color_blend_factor),
            dst_color_blend_factor: conv::blend_factor(blend.dst_color_blend_factor),
            color_blend_op: conv::blend_op(blend.color_blend_op),
            src_alpha_blend_factor: conv::blend_factor(blend.src_alpha_blend_factor),
            dst_alpha_blend_factor: conv::blend_factor(blend.dst_alpha_blend_factor),
            alpha_blend_op: conv::blend_op(blend.alpha_blend_op),
            color_write_mask: conv::color_write_mask(blend.write_mask),
        })
        .collect()
}
