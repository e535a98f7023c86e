//! Integration tests for submission ordering, fences, semaphores and
//! presentation on the headless device.

use std::sync::Arc;
use std::time::Duration;

use mango_rhi::headless::{AcquireFault, HeadlessController, HeadlessEvent};
use mango_rhi::{
    CommandBufferLevel, CommandPool, CommandPoolFlags, Device, DeviceDesc, ErrorKind, Extent2D,
    PipelineStages, PresentOutcome, QueueType, RhiError, SemaphoreSignal, SemaphoreType,
    SemaphoreWait, SubmitInfo, SwapchainDesc,
};

fn device() -> (Arc<Device>, HeadlessController) {
    let device = Device::new(&DeviceDesc::headless(), None).expect("headless device");
    let controller = device.headless_controller().expect("headless controller");
    (device, controller)
}

fn recorded_pool(device: &Device, count: usize) -> (CommandPool, Vec<mango_rhi::CommandBufferHandle>) {
    let mut pool = device
        .create_command_pool(QueueType::Graphics, CommandPoolFlags::RESET_COMMAND_BUFFER)
        .unwrap();
    let handles = (0..count)
        .map(|_| {
            let handle = pool.allocate_command_buffer(CommandBufferLevel::Primary).unwrap();
            let cmd = pool.get_mut(handle).unwrap();
            cmd.begin().unwrap();
            cmd.end().unwrap();
            handle
        })
        .collect();
    (pool, handles)
}

// =========================================================================
// Fences
// =========================================================================

#[test]
fn test_fence_values_follow_submission_order() {
    let (device, controller) = device();
    let (mut pool, handles) = recorded_pool(&device, 3);
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(false).unwrap();

    let mut ids = Vec::new();
    for handle in &handles {
        let cmd = pool.get_mut(*handle).unwrap();
        ids.push(queue.submit(&mut [cmd.into()], Some(&fence)).unwrap());
    }
    let values: Vec<_> = ids.iter().map(|id| id.fence_value).collect();
    assert_eq!(values, vec![Some(1), Some(2), Some(3)]);
    assert!(ids.windows(2).all(|w| w[0].serial < w[1].serial));
    assert_eq!(queue.last_submitted_serial(), ids[2].serial);

    // Nothing retires until someone waits.
    assert_eq!(fence.completed_value().unwrap(), 0);
    assert_eq!(controller.pending_submissions(), 3);

    fence.wait(2, None).unwrap();
    assert_eq!(fence.completed_value().unwrap(), 2);
    assert_eq!(queue.completed_serial(), ids[1].serial);
    assert_eq!(controller.pending_submissions(), 1);

    queue.wait_idle().unwrap();
    assert_eq!(fence.completed_value().unwrap(), 3);
    assert_eq!(controller.stats().retired_submissions, 3);
}

#[test]
fn test_signaled_fence_starts_at_one() {
    let (device, _controller) = device();
    let (mut pool, handles) = recorded_pool(&device, 1);
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(true).unwrap();

    assert_eq!(fence.completed_value().unwrap(), 1);
    fence.wait(1, Some(Duration::ZERO)).unwrap();
    assert_eq!(fence.signal(1).unwrap_err().kind(), ErrorKind::ProtocolViolation);

    let cmd = pool.get_mut(handles[0]).unwrap();
    let id = queue.submit(&mut [cmd.into()], Some(&fence)).unwrap();
    assert_eq!(id.fence_value, Some(2));
    assert_eq!(fence.next_signal_value().unwrap(), 3);
}

#[test]
fn test_stalled_gpu_times_out_then_recovers() {
    let (device, controller) = device();
    let (mut pool, handles) = recorded_pool(&device, 1);
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(false).unwrap();

    controller.set_stalled(true);
    let cmd = pool.get_mut(handles[0]).unwrap();
    queue.submit(&mut [cmd.into()], Some(&fence)).unwrap();

    let err = fence.wait(1, Some(Duration::from_millis(1))).unwrap_err();
    assert!(matches!(err, RhiError::Timeout));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(fence.completed_value().unwrap(), 0);

    controller.set_stalled(false);
    fence.wait(1, None).unwrap();
    assert!(controller.events().contains(&HeadlessEvent::Wait {
        value: 1,
        reached: false
    }));
}

#[test]
fn test_multi_batch_submit_has_one_serial() {
    let (device, controller) = device();
    let (mut pool, handles) = recorded_pool(&device, 2);
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(false).unwrap();

    let [first, second] = pool.get_many_mut([handles[0], handles[1]]).unwrap();
    let id = queue
        .submit(&mut [first.into(), second.into()], Some(&fence))
        .unwrap();
    assert_eq!(id.fence_value, Some(1));

    let stats = controller.stats();
    assert_eq!(stats.submits, 1);
    assert_eq!(stats.command_buffers_submitted, 2);

    fence.wait(1, None).unwrap();
    assert_eq!(queue.completed_serial(), id.serial);
}

// =========================================================================
// Semaphores
// =========================================================================

#[test]
fn test_timeline_semaphore_orders_submissions() {
    let (device, _controller) = device();
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(false).unwrap();
    let timeline = device.create_semaphore(SemaphoreType::Timeline, 0).unwrap();

    queue
        .submit(
            &mut [SubmitInfo::new().signal(SemaphoreSignal::timeline(&timeline, 5))],
            None,
        )
        .unwrap();
    queue
        .submit(
            &mut [SubmitInfo::new().wait(SemaphoreWait::timeline(&timeline, 5))],
            Some(&fence),
        )
        .unwrap();

    fence.wait(1, None).unwrap();
    assert_eq!(timeline.value().unwrap(), 5);

    let stale = queue.submit(
        &mut [SubmitInfo::new().signal(SemaphoreSignal::timeline(&timeline, 5))],
        None,
    );
    assert_eq!(stale.unwrap_err().kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn test_cpu_signal_unblocks_gpu_wait() {
    let (device, _controller) = device();
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(false).unwrap();
    let timeline = device.create_semaphore(SemaphoreType::Timeline, 0).unwrap();

    queue
        .submit(
            &mut [SubmitInfo::new().wait(SemaphoreWait::timeline(&timeline, 10))],
            Some(&fence),
        )
        .unwrap();
    assert!(matches!(fence.wait(1, None), Err(RhiError::Timeout)));

    timeline.signal(10).unwrap();
    fence.wait(1, None).unwrap();
    timeline.wait(10, None).unwrap();
    assert_eq!(timeline.signal(9).unwrap_err().kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn test_binary_semaphores_have_no_value() {
    let (device, _controller) = device();
    let binary = device.create_semaphore(SemaphoreType::Binary, 0).unwrap();
    assert!(!binary.is_timeline());
    assert_eq!(binary.value().unwrap_err().kind(), ErrorKind::ProtocolViolation);
    assert_eq!(binary.signal(1).unwrap_err().kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn test_wait_on_unsignalled_binary_semaphore_submits_nothing() {
    let (device, controller) = device();
    let (mut pool, handles) = recorded_pool(&device, 1);
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let fence = device.create_fence(false).unwrap();
    let never = device.create_semaphore(SemaphoreType::Binary, 0).unwrap();

    let cmd = pool.get_mut(handles[0]).unwrap();
    let err = queue
        .submit(
            &mut [SubmitInfo::new()
                .command_buffer(cmd)
                .wait(SemaphoreWait::binary(&never, PipelineStages::ALL_COMMANDS))],
            Some(&fence),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(controller.stats().submits, 0);
    assert_eq!(fence.last_signaled_value(), 0);
    assert_eq!(
        pool.get(handles[0]).unwrap().state(),
        mango_rhi::CommandBufferState::Executable
    );
}

// =========================================================================
// Presentation
// =========================================================================

#[test]
fn test_acquire_submit_present_chain() {
    let (device, controller) = device();
    let (mut pool, handles) = recorded_pool(&device, 1);
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let mut swapchain = device.create_swapchain(&SwapchainDesc::new(640, 480)).unwrap();
    let fence = device.create_fence(false).unwrap();
    let image_available = device.create_semaphore(SemaphoreType::Binary, 0).unwrap();
    let render_finished = device.create_semaphore(SemaphoreType::Binary, 0).unwrap();
    controller.clear_events();

    let image = swapchain.acquire_next_image(Some(&image_available)).unwrap();
    assert_eq!(image.index, 0);
    assert!(!image.suboptimal);

    let cmd = pool.get_mut(handles[0]).unwrap();
    let id = queue
        .submit(
            &mut [SubmitInfo::new()
                .command_buffer(cmd)
                .wait(SemaphoreWait::binary(
                    &image_available,
                    PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                ))
                .signal(SemaphoreSignal::binary(&render_finished))],
            Some(&fence),
        )
        .unwrap();
    let outcome = queue
        .present(&mut swapchain, image.index, &[&render_finished])
        .unwrap();
    assert_eq!(outcome, PresentOutcome::Success);
    assert!(!outcome.needs_recreation());

    fence.wait(1, None).unwrap();
    assert_eq!(controller.pending_submissions(), 0);
    assert_eq!(
        controller.events(),
        vec![
            HeadlessEvent::Acquire {
                image: 0,
                suboptimal: false
            },
            HeadlessEvent::Submit {
                serial: id.serial,
                command_buffers: 1
            },
            HeadlessEvent::Present {
                image: 0,
                outcome: PresentOutcome::Success
            },
            HeadlessEvent::Retired { serial: id.serial },
            HeadlessEvent::Wait {
                value: 1,
                reached: true
            },
        ]
    );

    // Both semaphores were consumed, so the next frame can reuse them.
    let next = swapchain.acquire_next_image(Some(&image_available)).unwrap();
    assert_eq!(next.index, 1);
}

#[test]
fn test_present_requires_an_acquired_image() {
    let (device, _controller) = device();
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let mut swapchain = device.create_swapchain(&SwapchainDesc::new(320, 240)).unwrap();

    let err = queue.present(&mut swapchain, 0, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    let err = queue.present(&mut swapchain, 99, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

    let image = swapchain.acquire_next_image(None).unwrap();
    queue.present(&mut swapchain, image.index, &[]).unwrap();
    // Presenting releases the image.
    assert!(queue.present(&mut swapchain, image.index, &[]).is_err());
}

#[test]
fn test_timeline_semaphores_are_rejected_by_acquire_and_present() {
    let (device, _controller) = device();
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let mut swapchain = device.create_swapchain(&SwapchainDesc::new(320, 240)).unwrap();
    let timeline = device.create_semaphore(SemaphoreType::Timeline, 0).unwrap();

    let err = swapchain.acquire_next_image(Some(&timeline)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

    let image = swapchain.acquire_next_image(None).unwrap();
    let err = queue
        .present(&mut swapchain, image.index, &[&timeline])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn test_injected_faults_surface_as_recreation_signals() {
    let (device, controller) = device();
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let mut swapchain = device.create_swapchain(&SwapchainDesc::new(640, 480)).unwrap();

    controller.inject_acquire_fault(1, AcquireFault::OutOfDate);
    controller.inject_acquire_fault(2, AcquireFault::Suboptimal);
    controller.inject_present_fault(1, PresentOutcome::Suboptimal);

    assert!(matches!(
        swapchain.acquire_next_image(None),
        Err(RhiError::SwapchainOutOfDate)
    ));
    let image = swapchain.acquire_next_image(None).unwrap();
    assert!(image.suboptimal);

    let outcome = queue.present(&mut swapchain, image.index, &[]).unwrap();
    assert_eq!(outcome, PresentOutcome::Suboptimal);
    assert!(outcome.needs_recreation());

    let stats = controller.stats();
    assert_eq!(stats.acquires, 2);
    assert_eq!(stats.acquire_failures, 1);
    assert_eq!(stats.presents, 1);
}

#[test]
fn test_resized_surface_requires_recreation() {
    let (device, controller) = device();
    let mut queue = device.create_command_queue(QueueType::Graphics).unwrap();
    let mut swapchain = device
        .create_swapchain(&SwapchainDesc::new(640, 480).with_image_count(3))
        .unwrap();
    assert_eq!(swapchain.extent(), Extent2D::new(640, 480));
    assert_eq!(swapchain.image_count(), 3);
    assert_eq!(swapchain.images().len(), 3);

    // An image acquired before the resize fails to present.
    let image = swapchain.acquire_next_image(None).unwrap();
    controller.set_surface_extent(Some(Extent2D::new(800, 600)));
    assert_eq!(
        queue.present(&mut swapchain, image.index, &[]).unwrap(),
        PresentOutcome::OutOfDate
    );
    assert!(matches!(
        swapchain.acquire_next_image(None),
        Err(RhiError::SwapchainOutOfDate)
    ));

    device.wait_idle().unwrap();
    swapchain.recreate(800, 600).unwrap();
    assert_eq!(swapchain.extent(), Extent2D::new(800, 600));
    assert_eq!(swapchain.generation(), 1);
    assert_eq!(swapchain.acquire_next_image(None).unwrap().index, 0);
    assert_eq!(controller.stats().swapchains_created, 2);
}
