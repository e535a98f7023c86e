//! Pipeline binding, draw, dispatch and secondary command buffer recording
//! on the headless backend.

mod common;

use std::sync::Arc;

use common::{CLEAR, EXTENT, Pipelines, Targets};
use mango_rhi::headless::RecordedCommand;
use mango_rhi::{
    BeginInfo, BufferDesc, BufferUsage, CommandBufferLevel, CommandPool, CommandPoolFlags,
    CommandQueue, Device, DeviceDesc, ErrorKind, IndexType, MemoryType, PipelineBindPoint,
    QueueType, Rect2D, RenderPassInheritance, RhiResult, ShaderStages, SubpassContents, Viewport,
};

struct Fixture {
    pool: CommandPool,
    pipelines: Pipelines,
    targets: Targets,
    device: Arc<Device>,
}

fn fixture() -> Fixture {
    let device = Device::new(&DeviceDesc::headless(), None).expect("headless device");
    let targets = common::targets(&device);
    let pipelines = common::pipelines(&device, &targets.render_pass);
    let pool = device
        .create_command_pool(QueueType::Graphics, CommandPoolFlags::RESET_COMMAND_BUFFER)
        .expect("command pool");
    Fixture {
        pool,
        pipelines,
        targets,
        device,
    }
}

fn area() -> Rect2D {
    Rect2D::from_extent(EXTENT)
}

fn assert_rejected(result: RhiResult<()>, what: &str) {
    match result {
        Err(e) => assert_eq!(e.kind(), ErrorKind::ProtocolViolation, "{}: {}", what, e),
        Ok(()) => panic!("{} was accepted", what),
    }
}

#[test]
fn test_graphics_pass_records_in_order() {
    let Fixture {
        mut pool,
        pipelines,
        targets,
        device,
    } = fixture();
    let set = device.create_descriptor_set(&pipelines.set_layout).unwrap();
    let vertices = device
        .create_buffer(&BufferDesc::new(256, BufferUsage::VERTEX, MemoryType::GpuOnly))
        .unwrap();
    let indices = device
        .create_buffer(&BufferDesc::new(64, BufferUsage::INDEX, MemoryType::GpuOnly))
        .unwrap();
    let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    let cmd = pool.get_mut(handle).unwrap();

    cmd.begin().unwrap();
    cmd.begin_render_pass(
        &targets.render_pass,
        &targets.framebuffer,
        area(),
        SubpassContents::Inline,
    )
    .unwrap();
    cmd.bind_pipeline(&pipelines.graphics).unwrap();
    cmd.bind_descriptor_set(0, &set).unwrap();
    cmd.set_viewport(Viewport::from_extent(EXTENT)).unwrap();
    cmd.set_scissor(area()).unwrap();
    // Bytes 8..24 straddle the vertex and fragment ranges.
    cmd.push_constants(8, &[7; 16]).unwrap();
    cmd.bind_vertex_buffer(0, &vertices, 0).unwrap();
    cmd.bind_index_buffer(&indices, 0, IndexType::U16).unwrap();
    cmd.draw(3, 1, 0, 0).unwrap();
    cmd.draw_indexed(6, 2, 0, 0, 1).unwrap();
    cmd.end_render_pass().unwrap();
    cmd.end().unwrap();

    assert_eq!(
        cmd.headless_commands().unwrap().to_vec(),
        vec![
            RecordedCommand::BeginRenderPass {
                area: area(),
                clear_values: vec![CLEAR],
                contents: SubpassContents::Inline,
            },
            RecordedCommand::BindPipeline(PipelineBindPoint::Graphics),
            RecordedCommand::BindDescriptorSet {
                bind_point: PipelineBindPoint::Graphics,
                index: 0,
            },
            RecordedCommand::SetViewport(Viewport::from_extent(EXTENT)),
            RecordedCommand::SetScissor(area()),
            RecordedCommand::PushConstants {
                stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                offset: 8,
                data: vec![7; 16],
            },
            RecordedCommand::BindVertexBuffer {
                binding: 0,
                offset: 0,
            },
            RecordedCommand::BindIndexBuffer {
                offset: 0,
                index_type: IndexType::U16,
            },
            RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
            RecordedCommand::DrawIndexed {
                index_count: 6,
                instance_count: 2,
                first_index: 0,
                vertex_offset: 0,
                first_instance: 1,
            },
            RecordedCommand::EndRenderPass,
        ]
    );
}

#[test]
fn test_push_constant_stages_come_from_the_bound_layout() {
    let Fixture {
        mut pool,
        pipelines,
        ..
    } = fixture();
    let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    let cmd = pool.get_mut(handle).unwrap();
    cmd.begin().unwrap();
    cmd.bind_pipeline(&pipelines.compute).unwrap();

    cmd.push_constants(0, &[1; 16]).unwrap();
    cmd.push_constants(16, &[2; 16]).unwrap();
    // Past the last range.
    assert_rejected(cmd.push_constants(24, &[3; 16]), "uncovered push constants");
    assert_rejected(cmd.push_constants(2, &[3; 4]), "unaligned push constants");

    let stages: Vec<ShaderStages> = cmd
        .headless_commands()
        .unwrap()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::PushConstants { stages, .. } => Some(*stages),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec![ShaderStages::VERTEX, ShaderStages::FRAGMENT]);
}

#[test]
fn test_dispatch_needs_compute_pipeline_outside_render_pass() {
    let Fixture {
        mut pool,
        pipelines,
        targets,
        ..
    } = fixture();
    let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    let cmd = pool.get_mut(handle).unwrap();
    cmd.begin().unwrap();

    assert_rejected(cmd.dispatch(1, 1, 1), "dispatch without a pipeline");
    cmd.bind_pipeline(&pipelines.graphics).unwrap();
    assert_rejected(cmd.dispatch(1, 1, 1), "dispatch with a graphics pipeline");

    cmd.bind_pipeline(&pipelines.compute).unwrap();
    cmd.dispatch(8, 4, 1).unwrap();
    assert_rejected(cmd.draw(3, 1, 0, 0), "draw with a compute pipeline");

    cmd.begin_render_pass(
        &targets.render_pass,
        &targets.framebuffer,
        area(),
        SubpassContents::Inline,
    )
    .unwrap();
    assert_rejected(cmd.dispatch(1, 1, 1), "dispatch inside a render pass");
    cmd.end_render_pass().unwrap();
    cmd.end().unwrap();

    let commands = cmd.headless_commands().unwrap();
    assert_eq!(commands.len(), 5);
    assert_eq!(commands[2], RecordedCommand::Dispatch { x: 8, y: 4, z: 1 });
}

#[test]
fn test_draw_needs_viewport_and_scissor() {
    let Fixture {
        mut pool,
        pipelines,
        targets,
        ..
    } = fixture();
    let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    let cmd = pool.get_mut(handle).unwrap();
    cmd.begin().unwrap();
    cmd.bind_pipeline(&pipelines.graphics).unwrap();
    cmd.set_viewport(Viewport::from_extent(EXTENT)).unwrap();
    cmd.set_scissor(area()).unwrap();
    assert_rejected(cmd.draw(3, 1, 0, 0), "draw outside a render pass");

    cmd.begin_render_pass(
        &targets.render_pass,
        &targets.framebuffer,
        area(),
        SubpassContents::Inline,
    )
    .unwrap();
    cmd.draw(3, 1, 0, 0).unwrap();
    cmd.end_render_pass().unwrap();
    cmd.end().unwrap();

    // Dynamic state does not survive re-recording.
    cmd.begin().unwrap();
    cmd.bind_pipeline(&pipelines.graphics).unwrap();
    cmd.begin_render_pass(
        &targets.render_pass,
        &targets.framebuffer,
        area(),
        SubpassContents::Inline,
    )
    .unwrap();
    assert_rejected(cmd.draw(3, 1, 0, 0), "draw without viewport and scissor");
}

#[test]
fn test_reset_forgets_the_bound_pipeline() {
    let Fixture {
        mut pool,
        pipelines,
        device,
        ..
    } = fixture();
    let set = device.create_descriptor_set(&pipelines.set_layout).unwrap();
    let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    let cmd = pool.get_mut(handle).unwrap();

    cmd.begin().unwrap();
    cmd.bind_pipeline(&pipelines.compute).unwrap();
    cmd.bind_descriptor_set(0, &set).unwrap();
    assert_rejected(cmd.bind_descriptor_set(1, &set), "set index past the layout");
    cmd.end().unwrap();

    cmd.reset().unwrap();
    assert!(cmd.headless_commands().unwrap().is_empty());
    cmd.begin().unwrap();
    assert_rejected(cmd.bind_descriptor_set(0, &set), "descriptor set after reset");
    assert_rejected(cmd.push_constants(0, &[0; 4]), "push constants after reset");
    assert_rejected(cmd.dispatch(1, 1, 1), "dispatch after reset");
}

#[test]
fn test_pool_reset_forgets_the_bound_pipeline() {
    let Fixture {
        mut pool,
        pipelines,
        ..
    } = fixture();
    let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    {
        let cmd = pool.get_mut(handle).unwrap();
        cmd.begin().unwrap();
        cmd.bind_pipeline(&pipelines.compute).unwrap();
    }

    pool.reset().unwrap();
    let cmd = pool.get_mut(handle).unwrap();
    cmd.begin().unwrap();
    assert_rejected(cmd.dispatch(1, 1, 1), "dispatch after pool reset");
}

#[test]
fn test_secondary_draws_inside_inherited_subpass() {
    let Fixture {
        mut pool,
        pipelines,
        targets,
        device,
    } = fixture();
    let primary = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    let secondary = pool.allocate_command_buffer(CommandBufferLevel::Secondary).unwrap();

    {
        let cmd = pool.get_mut(secondary).unwrap();
        cmd.begin_secondary(
            BeginInfo::default(),
            RenderPassInheritance::new(&targets.render_pass, 0)
                .with_framebuffer(&targets.framebuffer),
        )
        .unwrap();
        assert!(cmd.in_render_pass());
        assert_eq!(cmd.inherited_subpass(), Some(0));

        cmd.bind_pipeline(&pipelines.graphics).unwrap();
        cmd.set_viewport(Viewport::from_extent(EXTENT)).unwrap();
        cmd.set_scissor(area()).unwrap();
        cmd.draw(3, 1, 0, 0).unwrap();

        // The render pass belongs to the primary.
        assert_rejected(cmd.end_render_pass(), "end_render_pass in a secondary");
        assert_rejected(cmd.next_subpass(SubpassContents::Inline), "next_subpass in a secondary");
        assert_rejected(
            cmd.begin_render_pass(
                &targets.render_pass,
                &targets.framebuffer,
                area(),
                SubpassContents::Inline,
            ),
            "begin_render_pass in a secondary",
        );
        assert_rejected(cmd.dispatch(1, 1, 1), "dispatch in an inherited subpass");

        cmd.end().unwrap();
        assert!(!cmd.in_render_pass());
        assert_eq!(cmd.headless_commands().unwrap().len(), 4);
    }

    let [primary_cmd, secondary_cmd] = pool.get_many_mut([primary, secondary]).unwrap();
    primary_cmd.begin().unwrap();
    primary_cmd
        .begin_render_pass(
            &targets.render_pass,
            &targets.framebuffer,
            area(),
            SubpassContents::SecondaryCommandBuffers,
        )
        .unwrap();

    // This subpass takes its contents from secondaries only.
    assert_rejected(primary_cmd.bind_pipeline(&pipelines.graphics), "inline bind");
    assert_rejected(primary_cmd.set_viewport(Viewport::from_extent(EXTENT)), "inline viewport");
    assert_rejected(primary_cmd.set_scissor(area()), "inline scissor");
    assert_rejected(primary_cmd.draw(3, 1, 0, 0), "inline draw");
    assert_rejected(primary_cmd.push_constants(0, &[0; 4]), "inline push constants");

    primary_cmd.execute_secondary(&[&*secondary_cmd]).unwrap();
    primary_cmd.end_render_pass().unwrap();
    primary_cmd.end().unwrap();

    assert_eq!(
        primary_cmd.headless_commands().unwrap().to_vec(),
        vec![
            RecordedCommand::BeginRenderPass {
                area: area(),
                clear_values: vec![CLEAR],
                contents: SubpassContents::SecondaryCommandBuffers,
            },
            RecordedCommand::ExecuteSecondary(1),
            RecordedCommand::EndRenderPass,
        ]
    );

    let mut queue: CommandQueue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(false).unwrap();
    let id = queue.submit(&mut [primary_cmd.into()], Some(&fence)).unwrap();
    fence.wait(id.fence_value.unwrap(), None).unwrap();
}

#[test]
fn test_secondary_inheritance_must_match_where_it_runs() {
    let Fixture {
        mut pool,
        targets,
        ..
    } = fixture();
    let primary = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
    let plain = pool.allocate_command_buffer(CommandBufferLevel::Secondary).unwrap();
    let inherited = pool.allocate_command_buffer(CommandBufferLevel::Secondary).unwrap();

    {
        let cmd = pool.get_mut(inherited).unwrap();
        assert_rejected(
            cmd.begin_secondary(
                BeginInfo::default(),
                RenderPassInheritance::new(&targets.render_pass, 1),
            ),
            "inheriting a subpass that does not exist",
        );
        cmd.begin_secondary(
            BeginInfo::default(),
            RenderPassInheritance::new(&targets.render_pass, 0),
        )
        .unwrap();
        cmd.end().unwrap();
    }
    {
        let cmd = pool.get_mut(plain).unwrap();
        cmd.begin().unwrap();
        assert!(!cmd.in_render_pass());
        assert_eq!(cmd.inherited_subpass(), None);
        cmd.end().unwrap();
    }
    assert_rejected(
        pool.get_mut(primary).unwrap().begin_secondary(
            BeginInfo::default(),
            RenderPassInheritance::new(&targets.render_pass, 0),
        ),
        "render pass inheritance on a primary",
    );

    let [primary_cmd, plain_cmd, inherited_cmd] =
        pool.get_many_mut([primary, plain, inherited]).unwrap();
    primary_cmd.begin().unwrap();
    assert_rejected(
        primary_cmd.execute_secondary(&[&*inherited_cmd]),
        "inherited secondary outside a render pass",
    );
    primary_cmd.execute_secondary(&[&*plain_cmd]).unwrap();

    primary_cmd
        .begin_render_pass(
            &targets.render_pass,
            &targets.framebuffer,
            area(),
            SubpassContents::Inline,
        )
        .unwrap();
    assert_rejected(
        primary_cmd.execute_secondary(&[&*inherited_cmd]),
        "secondary in an inline subpass",
    );
    primary_cmd.end_render_pass().unwrap();

    primary_cmd
        .begin_render_pass(
            &targets.render_pass,
            &targets.framebuffer,
            area(),
            SubpassContents::SecondaryCommandBuffers,
        )
        .unwrap();
    assert_rejected(
        primary_cmd.execute_secondary(&[&*plain_cmd]),
        "secondary without inheritance inside a render pass",
    );
    primary_cmd.execute_secondary(&[&*inherited_cmd]).unwrap();
    primary_cmd.end_render_pass().unwrap();
    primary_cmd.end().unwrap();
}
