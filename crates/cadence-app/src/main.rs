// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use cadence_core::init_tracing;
use cadence_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use cadence_platform::{forward_resize, window_attributes, window_size};
use cadence_render::headless::{AdapterSpec, Completion, HeadlessInstance, HeadlessRecorder};
use cadence_render::{
    select_adapter, FrameOutcome, GpuInstance, QueueFlags, RenderSize, SubmissionCoordinator,
};
use cadence_render_vk::{ClearRecorder, VkDevice, VkInstance};
use clap::Parser;
use tracing::{error, info, warn};

use crate::config::{AppCfg, Args, BackendChoice};

/// Everything that lives on the GPU side of the window.
// Field order is drop order: command pool, then device and surface, then
// the instance.
struct Gpu {
    recorder: ClearRecorder,
    coordinator: SubmissionCoordinator<VkDevice>,
    _instance: VkInstance,
}

impl Gpu {
    fn new(window: &Arc<Window>, cfg: &AppCfg) -> Result<Self> {
        let instance = VkInstance::new(window.as_ref())?;
        let surface = instance.create_surface(window.as_ref(), window.as_ref())?;
        let reqs = cfg.render.requirements();
        let selection = select_adapter(&instance, &surface, &reqs)?;
        let device = instance
            .create_device(&selection, &reqs)
            .context("create_device")?;
        let mut coordinator = SubmissionCoordinator::new(
            device,
            surface,
            selection.queues,
            &cfg.render,
            window_size(window),
        )?;
        let queried = Arc::clone(window);
        coordinator.set_extent_query(move || window_size(&queried));
        let recorder = ClearRecorder::new(
            coordinator.device(),
            coordinator.frames_in_flight(),
            cfg.window.clear_color,
        )?;
        Ok(Self {
            recorder,
            coordinator,
            _instance: instance,
        })
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        // The recorder's buffers may still be in flight until this returns.
        if let Err(e) = self.coordinator.shutdown() {
            error!("shutdown: {e}");
        }
    }
}

struct App {
    cfg: AppCfg,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    minimized: bool,
    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            window: None,
            gpu: None,
            minimized: false,
            exiting: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn teardown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // GPU objects reference the window's surface; drop them first.
        self.gpu = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = window_attributes(&self.cfg.window.title, self.cfg.window.size());
        let window = match event_loop.create_window(attrs) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                error!("create_window: {e}");
                event_loop.exit();
                return;
            }
        };
        match Gpu::new(&window, &self.cfg) {
            Ok(gpu) => {
                info!(
                    "backend = vk, {} frame(s) in flight, {:?}",
                    gpu.coordinator.frames_in_flight(),
                    gpu.coordinator.surface_config()
                );
                self.gpu = Some(gpu);
            }
            Err(e) => {
                error!("vk init failed: {e:#}");
                event_loop.exit();
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }

        if let Some(gpu) = &self.gpu {
            if forward_resize(&event, &gpu.coordinator.resize_signal()) {
                if let WindowEvent::Resized(size) = event {
                    let minimized = size.width == 0 || size.height == 0;
                    if minimized != self.minimized {
                        info!("Resized -> {}x{} (minimized={minimized})", size.width, size.height);
                        self.minimized = minimized;
                    }
                }
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.teardown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(Gpu {
                    recorder,
                    coordinator,
                    ..
                }) = &mut self.gpu
                else {
                    return;
                };
                match coordinator.render_frame(recorder) {
                    Ok(FrameOutcome::Presented { .. }) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameOutcome::Skipped(_)) => {}
                    Err(e) => {
                        error!("render error: {e}");
                        self.teardown(event_loop);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if !self.minimized {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

/// Drives the frame protocol against the software backend: picks an adapter
/// out of a small mixed set, renders `frames` frames with a resize and a
/// minimize in between, and reports the counters.
fn run_headless(cfg: &AppCfg, frames: u32) -> Result<()> {
    let instance = HeadlessInstance::new(vec![
        AdapterSpec::new("compute-only").family(QueueFlags::COMPUTE, 1, false),
        AdapterSpec::eligible("headless"),
    ])
    .with_completion(Completion::Immediate);
    let surface = instance.surface();
    let reqs = cfg.render.requirements();
    let selection = select_adapter(&instance, &surface, &reqs)?;
    let device = instance.create_device(&selection, &reqs)?;
    let mut coordinator = SubmissionCoordinator::new(
        device,
        surface,
        selection.queues,
        &cfg.render,
        cfg.window.size(),
    )?;
    let resize = coordinator.resize_signal();
    let mut recorder = HeadlessRecorder::default();

    let base = cfg.window.size();
    for frame in 0..frames {
        if frame == frames / 3 {
            resize.notify(RenderSize::new(0, 0));
        } else if frame == frames / 3 + 2 {
            resize.notify(RenderSize::new(base.width / 2, base.height / 2));
        }
        if let FrameOutcome::Skipped(reason) = coordinator.render_frame(&mut recorder)? {
            warn!("frame {frame} skipped: {reason:?}");
        }
    }
    coordinator.shutdown()?;

    let stats = coordinator.stats();
    info!(
        "headless run: {} presented, {} skipped, {} rebuild(s), {} recorded",
        stats.frames_presented,
        stats.frames_skipped,
        stats.rebuilds,
        recorder.frames()
    );
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = AppCfg::load(Path::new(&args.config));
    cfg.apply_args(&args);
    cfg.render.validate()?;

    match args.backend {
        BackendChoice::Headless => run_headless(&cfg, args.frames),
        BackendChoice::Vk => {
            let event_loop: EventLoop<()> = EventLoop::new()?;
            let mut app = App::new(cfg);
            event_loop.run_app(&mut app)?;
            Ok(())
        }
    }
}
