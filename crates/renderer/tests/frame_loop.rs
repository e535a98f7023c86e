//! Frame loop behavior on the headless backend.

use std::cell::Cell;
use std::rc::Rc;

use mango_renderer::{Renderer, RendererConfig, RendererError};
use mango_rhi::headless::{AcquireFault, HeadlessConfig, HeadlessController, HeadlessEvent};
use mango_rhi::{Backend, Device, ErrorKind, Extent2D, PresentOutcome, RhiError};

fn renderer(frames_in_flight: usize) -> (Renderer, HeadlessController) {
    let config = RendererConfig::headless().with_frames_in_flight(frames_in_flight);
    let renderer = Renderer::new(&config, None).expect("headless renderer");
    let controller = renderer
        .device()
        .headless_controller()
        .expect("headless controller");
    (renderer, controller)
}

fn waits(controller: &HeadlessController) -> Vec<u64> {
    controller
        .events()
        .into_iter()
        .filter_map(|event| match event {
            HeadlessEvent::Wait { value, .. } => Some(value),
            _ => None,
        })
        .collect()
}

#[test]
fn test_frames_rotate_through_slots() {
    let (mut renderer, controller) = renderer(2);
    let mut slots = Vec::new();

    for _ in 0..5 {
        renderer
            .render_frame_with(|frame| {
                slots.push(frame.frame_index());
                assert_eq!(frame.extent(), Extent2D::new(1280, 720));
                Ok(())
            })
            .unwrap();
    }

    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    assert_eq!(controller.stats().submits, 5);
    assert_eq!(controller.stats().presents, 5);
    // The first use of each slot has nothing to wait for.
    assert_eq!(waits(&controller), vec![1, 1, 2]);
    assert_eq!(renderer.stats().frames_rendered, 5);
    assert_eq!(renderer.current_frame_index(), 1);
}

#[test]
fn test_cpu_never_runs_more_than_n_frames_ahead() {
    for frames_in_flight in 1..=3 {
        let (mut renderer, controller) = renderer(frames_in_flight);
        let gpu = controller.clone();

        for i in 0..20 {
            renderer
                .render_frame_with(|frame| {
                    assert_eq!(frame.frame_index(), i % frames_in_flight);
                    // Only the other slots may still have work queued.
                    assert!(
                        gpu.pending_submissions() <= 2 * (frames_in_flight - 1),
                        "{} queued operations with {} frames in flight",
                        gpu.pending_submissions(),
                        frames_in_flight
                    );
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(controller.stats().submits, 20);
    }
}

#[test]
fn test_stored_callback_runs_every_frame() {
    let (mut renderer, controller) = renderer(2);
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    renderer.set_render_callback(move |frame| {
        counter.set(counter.get() + 1);
        let cmd = frame.command_buffer();
        cmd.begin_debug_region("scene", [0.2, 0.4, 0.8, 1.0])?;
        cmd.end_debug_region()
    });

    for _ in 0..3 {
        renderer.render_frame().unwrap();
    }
    assert_eq!(calls.get(), 3);
    assert_eq!(controller.stats().submits, 3);

    renderer.clear_render_callback();
    renderer.render_frame().unwrap();
    assert_eq!(calls.get(), 3);
    assert_eq!(controller.stats().submits, 4);
}

#[test]
fn test_minimized_window_skips_rendering() {
    let (mut renderer, controller) = renderer(2);
    // Same size as configured: nothing to do.
    renderer.handle_resize(1280, 720);
    assert!(!renderer.swapchain_needs_recreation());

    renderer.handle_resize(0, 0);
    assert!(renderer.is_minimized());
    renderer.render_frame().unwrap();
    assert!(!renderer.begin_frame().unwrap());
    assert!(!renderer.frame_started());
    assert_eq!(controller.stats().submits, 0);
    assert_eq!(controller.stats().acquires, 0);

    renderer.handle_resize(800, 600);
    assert!(!renderer.is_minimized());
    renderer.render_frame().unwrap();
    assert_eq!(controller.stats().submits, 0);
    assert_eq!(renderer.stats().swapchain_recreations, 1);
    assert_eq!(renderer.extent(), Extent2D::new(800, 600));

    renderer.render_frame().unwrap();
    assert_eq!(controller.stats().submits, 1);
}

#[test]
fn test_out_of_date_acquire_skips_then_recreates() {
    let (mut renderer, controller) = renderer(2);
    controller.inject_acquire_fault(3, AcquireFault::OutOfDate);

    renderer.render_frame().unwrap();
    renderer.render_frame().unwrap();
    controller.clear_events();

    // Frame 3: acquire fails, nothing is submitted.
    renderer.render_frame().unwrap();
    assert!(renderer.swapchain_needs_recreation());
    assert_eq!(controller.stats().submits, 2);
    // A skipped frame keeps its slot.
    assert_eq!(renderer.current_frame_index(), 0);

    // Frame 4: recreation only.
    renderer.render_frame().unwrap();
    assert!(!renderer.swapchain_needs_recreation());
    assert_eq!(controller.stats().submits, 2);

    // Frame 5 renders again.
    renderer.render_frame().unwrap();

    let events = controller.events();
    let created = events
        .iter()
        .position(|e| matches!(e, HeadlessEvent::SwapchainCreated { .. }))
        .expect("swapchain recreated");
    let next_acquire = events
        .iter()
        .position(|e| matches!(e, HeadlessEvent::Acquire { .. }))
        .expect("acquire after recreation");
    assert!(events.contains(&HeadlessEvent::AcquireOutOfDate));
    assert!(created < next_acquire);

    assert_eq!(controller.stats().submits, 3);
    assert_eq!(controller.stats().swapchains_created, 2);
    let stats = renderer.stats();
    assert_eq!(stats.frames_rendered, 3);
    assert_eq!(stats.frames_skipped, 2);
    assert_eq!(stats.swapchain_recreations, 1);
}

#[test]
fn test_repeated_resize_recreates_once() {
    let (mut renderer, _controller) = renderer(2);
    renderer.handle_resize(1024, 768);
    renderer.handle_resize(1024, 768);

    for _ in 0..3 {
        renderer.render_frame().unwrap();
    }
    assert_eq!(renderer.stats().swapchain_recreations, 1);
    assert_eq!(renderer.stats().frames_rendered, 2);
    assert_eq!(renderer.extent(), Extent2D::new(1024, 768));
}

#[test]
fn test_suboptimal_present_recreates_on_next_frame() {
    let (mut renderer, controller) = renderer(2);
    controller.inject_present_fault(2, PresentOutcome::Suboptimal);

    renderer.render_frame().unwrap();
    renderer.render_frame().unwrap();
    assert!(renderer.swapchain_needs_recreation());
    // Suboptimal still presented the frame.
    assert_eq!(renderer.stats().frames_rendered, 2);

    renderer.render_frame().unwrap();
    assert_eq!(renderer.stats().swapchain_recreations, 1);
    renderer.render_frame().unwrap();
    assert_eq!(renderer.stats().frames_rendered, 3);
}

#[test]
fn test_failed_present_keeps_the_submitted_frame() {
    let (mut renderer, controller) = renderer(2);
    controller.inject_present_error(1);

    let err = renderer.render_frame().unwrap_err();
    assert!(matches!(err, RhiError::DeviceLost));
    assert!(!renderer.frame_started());
    assert!(renderer.swapchain_needs_recreation());
    // The frame was submitted: it counts as rendered and its slot is used up.
    assert_eq!(controller.stats().submits, 1);
    assert_eq!(renderer.stats().frames_rendered, 1);
    assert_eq!(renderer.stats().frames_skipped, 0);
    assert_eq!(renderer.current_frame_index(), 1);

    // Recreation, then rendering resumes on the next slot.
    renderer.render_frame().unwrap();
    assert_eq!(renderer.stats().swapchain_recreations, 1);
    let mut slots = Vec::new();
    for _ in 0..2 {
        renderer
            .render_frame_with(|frame| {
                slots.push(frame.frame_index());
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(slots, vec![1, 0]);
    assert_eq!(renderer.stats().frames_rendered, 3);
    assert_eq!(controller.stats().submits, 3);
}

#[test]
fn test_event_log_stays_bounded() {
    let device = Device::new_headless(HeadlessConfig {
        event_capacity: 16,
        ..HeadlessConfig::default()
    })
    .expect("headless device");
    let controller = device.headless_controller().expect("headless controller");
    let mut renderer = Renderer::with_device(device, &RendererConfig::headless()).unwrap();

    for _ in 0..50 {
        renderer.render_frame().unwrap();
    }
    let events = controller.events();
    assert_eq!(events.len(), 16);
    assert!(matches!(events.last(), Some(HeadlessEvent::Present { .. })));
    assert_eq!(controller.stats().presents, 50);
}

#[test]
fn test_surface_resize_is_adopted() {
    let (mut renderer, controller) = renderer(2);
    renderer.render_frame().unwrap();

    controller.set_surface_extent(Some(Extent2D::new(640, 360)));
    renderer.render_frame().unwrap();
    assert!(renderer.swapchain_needs_recreation());

    renderer.render_frame().unwrap();
    // The surface decides the extent, not the requested size.
    assert_eq!(renderer.extent(), Extent2D::new(640, 360));

    renderer.render_frame().unwrap();
    assert_eq!(renderer.stats().frames_rendered, 2);
}

#[test]
fn test_stalled_gpu_times_out_and_recovers() {
    let (mut renderer, controller) = renderer(2);
    controller.set_stalled(true);

    renderer.render_frame().unwrap();
    renderer.render_frame().unwrap();
    let err = renderer.render_frame().unwrap_err();
    assert!(matches!(err, RhiError::Timeout));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!renderer.frame_started());
    assert_eq!(renderer.stats().frames_rendered, 2);

    controller.set_stalled(false);
    renderer.render_frame().unwrap();
    assert_eq!(renderer.stats().frames_rendered, 3);
}

#[test]
fn test_callback_error_abandons_frame() {
    let (mut renderer, controller) = renderer(2);

    let err = renderer
        .render_frame_with(|_| Err(RhiError::NotSupported("test failure".to_string())))
        .unwrap_err();
    assert!(matches!(err, RhiError::NotSupported(_)));
    assert!(!renderer.frame_started());
    assert!(renderer.swapchain_needs_recreation());
    assert_eq!(controller.stats().submits, 0);
    assert_eq!(renderer.stats().frames_skipped, 1);

    // Recreation, then the same slot renders with fresh semaphores.
    renderer.render_frame().unwrap();
    renderer.render_frame().unwrap();
    assert_eq!(controller.stats().submits, 1);
    assert_eq!(renderer.stats().frames_rendered, 1);
}

#[test]
fn test_manual_begin_end() {
    let (mut renderer, controller) = renderer(2);
    assert!(renderer.current_command_buffer().is_none());

    // end_frame without a frame is a warning, not an error.
    renderer.end_frame().unwrap();
    assert_eq!(controller.stats().submits, 0);

    assert!(renderer.begin_frame().unwrap());
    // Double begin keeps the started frame.
    assert!(renderer.begin_frame().unwrap());
    let cmd = renderer.current_command_buffer().expect("command buffer inside a frame");
    assert!(cmd.in_render_pass());
    renderer.end_frame().unwrap();

    assert!(!renderer.frame_started());
    assert_eq!(controller.stats().acquires, 1);
    assert_eq!(controller.stats().submits, 1);
}

#[test]
fn test_clear_color_is_used_by_the_next_frame() {
    let (mut renderer, _controller) = renderer(1);
    renderer.set_clear_color([0.1, 0.2, 0.3, 1.0]);
    assert_eq!(renderer.clear_color(), [0.1, 0.2, 0.3, 1.0]);
    renderer.render_frame().unwrap();
    assert_eq!(renderer.stats().frames_rendered, 1);
}

#[test]
fn test_vulkan_without_window_is_a_configuration_error() {
    let config = RendererConfig {
        backend: Backend::Vulkan,
        ..RendererConfig::default()
    };
    match Renderer::new(&config, None) {
        Err(RendererError::Rhi(e)) => assert_eq!(e.kind(), ErrorKind::Configuration),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("renderer created without a window"),
    }
}

#[test]
fn test_invalid_config_is_rejected_before_device_creation() {
    let config = RendererConfig::headless().with_frames_in_flight(0);
    assert!(matches!(
        Renderer::new(&config, None),
        Err(RendererError::Config(_))
    ));
}

#[test]
fn test_config_file_drives_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renderer.toml");
    std::fs::write(
        &path,
        r#"
            backend = "headless"
            width = 640
            height = 480
            enable_vsync = false
            max_frames_in_flight = 3
            clear_color = [0.5, 0.5, 0.5, 1.0]
        "#,
    )
    .unwrap();

    let config: RendererConfig = mango_core::config::load_toml(&path).unwrap();
    let renderer = Renderer::new(&config, None).unwrap();
    assert_eq!(renderer.frames_in_flight(), 3);
    assert_eq!(renderer.swapchain_image_count(), 2);
    assert_eq!(renderer.extent(), Extent2D::new(640, 480));
    assert_eq!(renderer.clear_color(), [0.5, 0.5, 0.5, 1.0]);
}
