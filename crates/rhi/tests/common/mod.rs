//! Render targets and pipelines shared by the integration tests.

#![allow(dead_code)]

use mango_rhi::resource::SPIRV_MAGIC;
use mango_rhi::{
    AttachmentDesc, ClearValue, ComputePipelineDesc, DescriptorBinding, DescriptorSetLayout,
    DescriptorSetLayoutDesc, DescriptorType, Device, Extent2D, Format, Framebuffer,
    FramebufferDesc, GraphicsPipelineDesc, Pipeline, PipelineLayout, PipelineLayoutDesc,
    PushConstantRange, RenderPass, RenderPassDesc, Shader, ShaderDesc, ShaderStage, ShaderStages,
    SubpassDesc, Texture, TextureDesc, TextureUsage,
};

pub const EXTENT: Extent2D = Extent2D::new(64, 64);
pub const CLEAR: ClearValue = ClearValue::Color([0.1, 0.2, 0.3, 1.0]);

/// Smallest module that passes the SPIR-V header checks.
pub fn shader(device: &Device, stage: ShaderStage) -> Shader {
    device
        .create_shader(&ShaderDesc {
            stage,
            entry_point: "main".to_string(),
            code: vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0],
        })
        .expect("shader module")
}

/// One color target with a single-subpass render pass over it.
pub struct Targets {
    pub framebuffer: Framebuffer,
    pub render_pass: RenderPass,
    pub color: Texture,
}

pub fn targets(device: &Device) -> Targets {
    let color = device
        .create_texture(&TextureDesc::new_2d(
            Format::Rgba8Unorm,
            EXTENT.width,
            EXTENT.height,
            TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
        ))
        .expect("color target");
    let render_pass = device
        .create_render_pass(&RenderPassDesc {
            attachments: vec![AttachmentDesc::color_present(Format::Rgba8Unorm).with_clear(CLEAR)],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                depth_stencil_attachment: None,
            }],
        })
        .expect("render pass");
    let framebuffer = device
        .create_framebuffer(&FramebufferDesc {
            render_pass: &render_pass,
            attachments: vec![&color],
            width: EXTENT.width,
            height: EXTENT.height,
            layers: 1,
        })
        .expect("framebuffer");
    Targets {
        framebuffer,
        render_pass,
        color,
    }
}

/// A graphics and a compute pipeline sharing one layout: a uniform buffer
/// at set 0, 16 bytes of vertex push constants, then 16 of fragment.
pub struct Pipelines {
    pub graphics: Pipeline,
    pub compute: Pipeline,
    pub layout: PipelineLayout,
    pub set_layout: DescriptorSetLayout,
}

pub fn pipelines(device: &Device, render_pass: &RenderPass) -> Pipelines {
    let set_layout = device
        .create_descriptor_set_layout(&DescriptorSetLayoutDesc {
            bindings: vec![DescriptorBinding::new(
                0,
                DescriptorType::UniformBuffer,
                ShaderStages::VERTEX,
            )],
        })
        .expect("descriptor set layout");
    let layout = device
        .create_pipeline_layout(&PipelineLayoutDesc {
            set_layouts: vec![&set_layout],
            push_constant_ranges: vec![
                PushConstantRange {
                    stages: ShaderStages::VERTEX,
                    offset: 0,
                    size: 16,
                },
                PushConstantRange {
                    stages: ShaderStages::FRAGMENT,
                    offset: 16,
                    size: 16,
                },
            ],
        })
        .expect("pipeline layout");

    let vertex = shader(device, ShaderStage::Vertex);
    let fragment = shader(device, ShaderStage::Fragment);
    let graphics = device
        .create_graphics_pipeline(
            &GraphicsPipelineDesc::new(&vertex, &layout, render_pass).fragment_shader(&fragment),
        )
        .expect("graphics pipeline");

    let kernel = shader(device, ShaderStage::Compute);
    let compute = device
        .create_compute_pipeline(&ComputePipelineDesc {
            shader: &kernel,
            layout: &layout,
        })
        .expect("compute pipeline");

    Pipelines {
        graphics,
        compute,
        layout,
        set_layout,
    }
}
