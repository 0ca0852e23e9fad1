// SPDX-License-Identifier: CEPL-1.0
//! Whole-protocol scenarios against the headless backend.

use std::sync::{Arc, Mutex};

use cadence_render::headless::{
    desktop_capabilities, AdapterSpec, Completion, HeadlessDevice, HeadlessEvent,
    HeadlessInstance, HeadlessRecorder, HeadlessSurface,
};
use cadence_render::{
    select_adapter, AcquireOutcome, ColorSpace, Format, FrameOutcome, GpuInstance, PresentMode,
    PresentOutcome, QueueFlags, RenderConfig, RenderError, RenderSize, SkipReason,
    SubmissionCoordinator, SurfaceCapabilities, SurfaceFormat, SurfaceSupport,
};

type Coordinator = SubmissionCoordinator<HeadlessDevice>;

fn config(frames_in_flight: usize) -> RenderConfig {
    RenderConfig {
        frames_in_flight,
        present_mode: PresentMode::Mailbox,
        rebuild_backoff_ms: 1,
        ..Default::default()
    }
}

fn two_image_caps() -> SurfaceCapabilities {
    SurfaceCapabilities {
        min_image_count: 1,
        max_image_count: 2,
        ..desktop_capabilities()
    }
}

fn setup(
    specs: Vec<AdapterSpec>,
    completion: Completion,
    config: &RenderConfig,
) -> (HeadlessDevice, HeadlessSurface, Coordinator) {
    let instance = HeadlessInstance::new(specs).with_completion(completion);
    let surface = instance.surface();
    let reqs = config.requirements();
    let selection = select_adapter(&instance, &surface, &reqs).unwrap();
    let device = instance.create_device(&selection, &reqs).unwrap();
    let coordinator = SubmissionCoordinator::new(
        device.clone(),
        surface.clone(),
        selection.queues,
        config,
        RenderSize::new(640, 480),
    )
    .unwrap();
    (device, surface, coordinator)
}

fn submissions(events: &[HeadlessEvent]) -> Vec<(usize, u64, u32)> {
    events
        .iter()
        .enumerate()
        .filter_map(|(pos, e)| match e {
            HeadlessEvent::Submitted { fence, image, .. } => Some((pos, *fence, *image)),
            _ => None,
        })
        .collect()
}

fn waits(events: &[HeadlessEvent]) -> Vec<(usize, u64)> {
    events
        .iter()
        .enumerate()
        .filter_map(|(pos, e)| match e {
            HeadlessEvent::Waited { fence } => Some((pos, *fence)),
            _ => None,
        })
        .collect()
}

fn presented(outcome: FrameOutcome) -> (usize, u32, u64) {
    match outcome {
        FrameOutcome::Presented {
            slot,
            image_index,
            generation,
        } => (slot, image_index, generation),
        other => panic!("expected a presented frame, got {other:?}"),
    }
}

#[test]
fn single_adapter_end_to_end() {
    let spec = AdapterSpec::eligible("gpu")
        .capabilities(two_image_caps())
        .present_modes(vec![PresentMode::Fifo, PresentMode::Mailbox]);
    let (device, _surface, mut coordinator) =
        setup(vec![spec], Completion::OnWait, &config(2));

    let chain = coordinator.surface_config().unwrap();
    assert_eq!(chain.image_count, 2);
    assert_eq!(chain.format, SurfaceFormat::default());
    assert_eq!(chain.present_mode, PresentMode::Mailbox);
    assert_eq!(chain.extent, RenderSize::new(640, 480));

    let mut recorder = HeadlessRecorder::default();
    let frames: Vec<_> = (0..3)
        .map(|_| presented(coordinator.render_frame(&mut recorder).unwrap()))
        .collect();
    assert_eq!(frames, vec![(0, 0, 1), (1, 1, 1), (0, 0, 1)]);
    assert_eq!(recorder.frames(), 3);

    // Only the third frame had to block, once, on the first frame's fence.
    let events = device.events();
    let subs = submissions(&events);
    let waited = waits(&events);
    assert_eq!(waited.len(), 1);
    assert_eq!(waited[0].1, subs[0].1);
    assert!(subs[1].0 < waited[0].0 && waited[0].0 < subs[2].0);
    assert!(device.violations().is_empty());
    assert_eq!(coordinator.stats().frames_presented, 3);
}

#[test]
fn image_wait_precedes_rebind() {
    let spec = AdapterSpec::eligible("gpu").capabilities(two_image_caps());
    let (device, _surface, mut coordinator) =
        setup(vec![spec], Completion::OnWait, &config(3));
    let mut recorder = HeadlessRecorder::default();

    for _ in 0..3 {
        coordinator.render_frame(&mut recorder).unwrap();
    }

    let events = device.events();
    let subs = submissions(&events);
    let (first_pos, first_fence, first_image) = subs[0];
    let (third_pos, third_fence, third_image) = subs[2];
    assert_eq!(first_image, third_image);
    assert_ne!(first_fence, third_fence);

    let wait = waits(&events)
        .into_iter()
        .find(|&(_, fence)| fence == first_fence)
        .expect("image reuse must wait on the earlier submission");
    assert!(first_pos < wait.0 && wait.0 < third_pos);
    assert!(device.violations().is_empty());
}

#[test]
fn superseded_chain_freed_only_after_its_work() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::OnWait, &config(2));
    let mut recorder = HeadlessRecorder::default();
    let resize = coordinator.resize_signal();

    coordinator.render_frame(&mut recorder).unwrap();
    coordinator.render_frame(&mut recorder).unwrap();
    let old_chain = match device.events()[0] {
        HeadlessEvent::SwapchainCreated { id, .. } => id,
        ref other => panic!("unexpected first event {other:?}"),
    };

    resize.notify(RenderSize::new(800, 600));
    let (_, _, generation) = presented(coordinator.render_frame(&mut recorder).unwrap());
    assert_eq!(generation, 2);
    assert_eq!(coordinator.extent(), RenderSize::new(800, 600));
    // Frame two still reads the old chain.
    assert_eq!(device.live_swapchains(), 2);

    coordinator.render_frame(&mut recorder).unwrap();
    assert_eq!(device.live_swapchains(), 1);
    assert!(device
        .events()
        .contains(&HeadlessEvent::SwapchainDestroyed { id: old_chain }));
    assert!(device.violations().is_empty());
    assert_eq!(coordinator.stats().rebuilds, 1);
}

#[test]
fn out_of_date_acquire_rebuilds_and_retries() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let mut recorder = HeadlessRecorder::default();

    device.script_acquire(AcquireOutcome::OutOfDate);
    let (_, _, generation) = presented(coordinator.render_frame(&mut recorder).unwrap());
    assert_eq!(generation, 2);
    assert_eq!(coordinator.stats().rebuilds, 1);
}

#[test]
fn persistently_out_of_date_chain_skips_frame() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let mut recorder = HeadlessRecorder::default();

    for _ in 0..10 {
        device.script_acquire(AcquireOutcome::OutOfDate);
    }
    assert_eq!(
        coordinator.render_frame(&mut recorder).unwrap(),
        FrameOutcome::Skipped(SkipReason::ChainUnstable)
    );
    assert_eq!(recorder.frames(), 0);
    assert_eq!(coordinator.stats().frames_skipped, 1);
}

#[test]
fn stale_present_rebuilds_before_next_acquire() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let mut recorder = HeadlessRecorder::default();

    device.script_present(PresentOutcome::Suboptimal);
    let (_, _, first) = presented(coordinator.render_frame(&mut recorder).unwrap());
    let (_, _, second) = presented(coordinator.render_frame(&mut recorder).unwrap());
    assert_eq!((first, second), (1, 2));
}

#[test]
fn minimized_window_skips_until_restored() {
    let (_device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let mut recorder = HeadlessRecorder::default();
    let resize = coordinator.resize_signal();

    resize.notify(RenderSize::new(0, 600));
    for _ in 0..3 {
        assert_eq!(
            coordinator.render_frame(&mut recorder).unwrap(),
            FrameOutcome::Skipped(SkipReason::ZeroExtent)
        );
    }

    resize.notify(RenderSize::new(1024, 768));
    presented(coordinator.render_frame(&mut recorder).unwrap());
    assert_eq!(
        coordinator.surface_config().unwrap().extent,
        RenderSize::new(1024, 768)
    );
    assert_eq!(coordinator.stats().frames_skipped, 3);
}

#[test]
fn latest_resize_wins() {
    let (_device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let resize = coordinator.resize_signal();
    resize.notify(RenderSize::new(100, 100));
    resize.notify(RenderSize::new(300, 200));

    presented(coordinator.render_frame(&mut HeadlessRecorder::default()).unwrap());
    assert_eq!(
        coordinator.surface_config().unwrap().extent,
        RenderSize::new(300, 200)
    );
    assert_eq!(coordinator.stats().rebuilds, 1);
}

#[test]
fn transient_build_failures_are_retried() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let mut recorder = HeadlessRecorder::default();
    let resize = coordinator.resize_signal();

    device.fail_swapchain_creation(2);
    resize.notify(RenderSize::new(800, 600));
    presented(coordinator.render_frame(&mut recorder).unwrap());

    device.fail_swapchain_creation(5);
    resize.notify(RenderSize::new(900, 700));
    match coordinator.render_frame(&mut recorder) {
        Err(RenderError::RebuildExhausted { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert!(source.is_recoverable());
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn lost_surface_is_fatal() {
    let (_device, surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    surface.lose();
    coordinator.resize_signal().notify(RenderSize::new(800, 600));
    assert!(matches!(
        coordinator.render_frame(&mut HeadlessRecorder::default()),
        Err(RenderError::SurfaceLost)
    ));
}

#[test]
fn fixed_surface_extent_overrides_window_size() {
    let (_device, surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    surface.set_current_extent(Some(RenderSize::new(1920, 1080)));
    coordinator.resize_signal().notify(RenderSize::new(800, 600));
    presented(coordinator.render_frame(&mut HeadlessRecorder::default()).unwrap());
    assert_eq!(
        coordinator.surface_config().unwrap().extent,
        RenderSize::new(1920, 1080)
    );
}

#[test]
fn shutdown_releases_everything() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::OnWait, &config(3));
    let mut recorder = HeadlessRecorder::default();
    let resize = coordinator.resize_signal();
    for i in 0..6 {
        if i == 3 {
            resize.notify(RenderSize::new(320, 240));
        }
        coordinator.render_frame(&mut recorder).unwrap();
    }

    coordinator.shutdown().unwrap();
    assert_eq!(device.live_swapchains(), 0);
    assert_eq!(device.live_views(), 0);
    assert_eq!(device.live_fences(), 0);
    assert_eq!(device.live_semaphores(), 0);
    assert!(device.violations().is_empty());
    // Second call is a no-op; so is the drop that follows.
    coordinator.shutdown().unwrap();
}

#[test]
fn shutdown_after_timeout_still_releases() {
    let cfg = RenderConfig {
        fence_timeout_ms: 10,
        ..config(2)
    };
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Manual, &cfg);
    let mut recorder = HeadlessRecorder::default();
    presented(coordinator.render_frame(&mut recorder).unwrap());
    presented(coordinator.render_frame(&mut recorder).unwrap());
    // Nothing completes, so the third frame gives up on slot 0.
    assert!(matches!(
        coordinator.render_frame(&mut recorder),
        Err(RenderError::Timeout { .. })
    ));

    assert!(matches!(
        coordinator.shutdown(),
        Err(RenderError::Timeout { .. })
    ));
    assert_eq!(device.live_swapchains(), 0);
    assert_eq!(device.live_views(), 0);
    assert_eq!(device.live_fences(), 0);
    assert_eq!(device.live_semaphores(), 0);
    assert!(device.violations().is_empty());
    coordinator.shutdown().unwrap();
}

#[test]
fn lost_device_is_fatal_without_rebuild() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let mut recorder = HeadlessRecorder::default();
    presented(coordinator.render_frame(&mut recorder).unwrap());
    let before = coordinator.stats();
    device.clear_events();

    device.lose_device();
    assert!(matches!(
        coordinator.render_frame(&mut recorder),
        Err(RenderError::DeviceLost)
    ));
    assert_eq!(coordinator.stats().rebuilds, before.rebuilds);
    assert!(!device
        .events()
        .iter()
        .any(|e| matches!(e, HeadlessEvent::SwapchainCreated { .. })));

    // Teardown still frees everything and reports why the wait failed.
    assert!(matches!(coordinator.shutdown(), Err(RenderError::DeviceLost)));
    assert_eq!(device.live_swapchains(), 0);
    assert_eq!(device.live_fences(), 0);
    assert_eq!(device.live_semaphores(), 0);
}

#[test]
fn rejected_submission_is_fatal_without_rebuild() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let mut recorder = HeadlessRecorder::default();
    let (_, _, generation) = presented(coordinator.render_frame(&mut recorder).unwrap());
    let before = coordinator.stats();
    device.clear_events();

    device.fail_next_submit("queue rejected the batch");
    match coordinator.render_frame(&mut recorder) {
        Err(RenderError::Submission(reason)) => assert_eq!(reason, "queue rejected the batch"),
        other => panic!("expected a submission error, got {other:?}"),
    }
    assert_eq!(coordinator.stats().rebuilds, before.rebuilds);
    assert_eq!(coordinator.stats().frames_presented, before.frames_presented);
    let events = device.events();
    assert!(submissions(&events).is_empty());
    assert!(!events
        .iter()
        .any(|e| matches!(e, HeadlessEvent::SwapchainCreated { .. })));

    // The failure was the caller's to handle; the same chain keeps working.
    let (_, _, next) = presented(coordinator.render_frame(&mut recorder).unwrap());
    assert_eq!(next, generation);
    assert!(device.violations().is_empty());
}

#[test]
fn nothing_preferred_falls_back_to_what_is_offered() {
    let spec = AdapterSpec::eligible("gpu")
        .formats(vec![SurfaceFormat::new(
            Format::Rgba8Unorm,
            ColorSpace::SrgbNonlinear,
        )])
        .present_modes(vec![PresentMode::Immediate])
        .capabilities(SurfaceCapabilities {
            min_image_count: 1,
            max_image_count: 3,
            ..desktop_capabilities()
        });
    let (device, _surface, mut coordinator) = setup(vec![spec], Completion::OnWait, &config(2));

    let chain = coordinator.surface_config().unwrap();
    assert_eq!(
        chain.format,
        SurfaceFormat::new(Format::Rgba8Unorm, ColorSpace::SrgbNonlinear)
    );
    assert_eq!(chain.present_mode, PresentMode::Immediate);
    assert_eq!(chain.image_count, 2);

    let mut recorder = HeadlessRecorder::default();
    for _ in 0..3 {
        presented(coordinator.render_frame(&mut recorder).unwrap());
    }
    assert_eq!(waits(&device.events()).len(), 1);
    assert!(device.violations().is_empty());
}

#[test]
fn narrowed_support_applies_on_next_rebuild() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    assert_eq!(
        coordinator.surface_config().unwrap().present_mode,
        PresentMode::Mailbox
    );

    device.set_support(SurfaceSupport {
        capabilities: desktop_capabilities(),
        formats: vec![SurfaceFormat::default()],
        present_modes: vec![PresentMode::FifoRelaxed],
    });
    coordinator
        .resize_signal()
        .notify(RenderSize::new(800, 600));
    presented(coordinator.render_frame(&mut HeadlessRecorder::default()).unwrap());
    let chain = coordinator.surface_config().unwrap();
    assert_eq!(chain.present_mode, PresentMode::FifoRelaxed);
    assert_eq!(chain.extent, RenderSize::new(800, 600));
}

#[test]
fn out_of_date_rebuild_reads_current_window_size() {
    let (device, _surface, mut coordinator) =
        setup(vec![AdapterSpec::eligible("gpu")], Completion::Immediate, &config(2));
    let window = Arc::new(Mutex::new(RenderSize::new(640, 480)));
    let reported = Arc::clone(&window);
    coordinator.set_extent_query(move || *reported.lock().unwrap());
    let mut recorder = HeadlessRecorder::default();

    // The window grew but no resize event was delivered.
    *window.lock().unwrap() = RenderSize::new(1024, 768);
    device.script_acquire(AcquireOutcome::OutOfDate);
    let (_, _, generation) = presented(coordinator.render_frame(&mut recorder).unwrap());
    assert_eq!(generation, 2);
    assert_eq!(
        coordinator.surface_config().unwrap().extent,
        RenderSize::new(1024, 768)
    );

    // Minimized between events: the rebuild finds no area and the frame is skipped.
    *window.lock().unwrap() = RenderSize::new(0, 0);
    device.script_acquire(AcquireOutcome::OutOfDate);
    assert_eq!(
        coordinator.render_frame(&mut recorder).unwrap(),
        FrameOutcome::Skipped(SkipReason::ZeroExtent)
    );

    *window.lock().unwrap() = RenderSize::new(320, 240);
    presented(coordinator.render_frame(&mut recorder).unwrap());
    assert_eq!(
        coordinator.surface_config().unwrap().extent,
        RenderSize::new(320, 240)
    );
}

#[test]
fn identical_inputs_give_identical_runs() {
    let run = || {
        let specs = vec![
            AdapterSpec::eligible("no-present")
                .clear_families()
                .family(QueueFlags::GRAPHICS, 1, false),
            AdapterSpec::eligible("gpu").capabilities(two_image_caps()),
        ];
        let (device, _surface, mut coordinator) = setup(specs, Completion::OnWait, &config(2));
        let mut recorder = HeadlessRecorder::default();
        let outcomes: Vec<_> = (0..5)
            .map(|_| coordinator.render_frame(&mut recorder).unwrap())
            .collect();
        (outcomes, device.events())
    };
    assert_eq!(run(), run());
}

#[test]
fn no_presenting_adapter_means_no_device() {
    let instance = HeadlessInstance::new(vec![AdapterSpec::eligible("offscreen")
        .clear_families()
        .family(QueueFlags::GRAPHICS, 1, false)]);
    let surface = instance.surface();
    assert!(matches!(
        select_adapter(&instance, &surface, &RenderConfig::default().requirements()),
        Err(RenderError::NoEligibleAdapter { candidates: 1 })
    ));
}
