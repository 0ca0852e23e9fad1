// SPDX-License-Identifier: CEPL-1.0
//! In-memory backend. Nothing is drawn, but fences, chain objects and their
//! lifetimes are tracked so the frame protocol can run without a GPU.
//!
//! Adapters are described with [`AdapterSpec`]. The device records every
//! chain/fence operation as a [`HeadlessEvent`] and notes protocol violations
//! (freeing something a pending submission still uses, submitting with a
//! signaled fence) instead of corrupting memory.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::backend::{
    AcquireOutcome, FrameRecorder, GpuDevice, GpuInstance, PresentOutcome, RecordedFrame,
    RenderTarget,
};
use crate::config::{DeviceRequirements, SWAPCHAIN_EXTENSION};
use crate::error::{RenderError, Result};
use crate::select::Selection;
use crate::types::{
    AdapterInfo, DeviceFeatures, DeviceKind, Format, PresentMode, QueueAssignment,
    QueueFamilyProperties, QueueFlags, QueueRole, SurfaceCapabilities, SurfaceConfiguration,
    SurfaceFormat, SurfaceSupport,
};
use crate::RenderSize;

/// When submitted work counts as finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Completion {
    /// Fences signal at submit time.
    #[default]
    Immediate,
    /// Pending work completes, in queue order, once the CPU waits on a fence.
    OnWait,
    /// Only [`HeadlessDevice::complete_next`] / [`HeadlessDevice::complete_all`]
    /// finish work.
    Manual,
}

/// Surface capabilities of a typical desktop window.
pub fn desktop_capabilities() -> SurfaceCapabilities {
    SurfaceCapabilities {
        min_image_count: 2,
        max_image_count: 3,
        current_extent: None,
        min_extent: RenderSize::new(1, 1),
        max_extent: RenderSize::new(4096, 4096),
    }
}

/// Description of a simulated adapter.
#[derive(Clone, Debug)]
pub struct AdapterSpec {
    name: String,
    kind: DeviceKind,
    families: Vec<(QueueFamilyProperties, bool)>,
    extensions: Vec<String>,
    support: SurfaceSupport,
    features: DeviceFeatures,
    surface_query_fails: bool,
}

impl AdapterSpec {
    /// An adapter with no queues, extensions, formats or features.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::Other,
            families: Vec::new(),
            extensions: Vec::new(),
            support: SurfaceSupport {
                capabilities: desktop_capabilities(),
                formats: Vec::new(),
                present_modes: Vec::new(),
            },
            features: DeviceFeatures::empty(),
            surface_query_fails: false,
        }
    }

    /// A discrete adapter that passes the default requirements: one
    /// presenting graphics family, the swapchain extension, two sRGB formats,
    /// FIFO and mailbox, anisotropic sampling.
    pub fn eligible(name: impl Into<String>) -> Self {
        Self::new(name)
            .kind(DeviceKind::Discrete)
            .family(
                QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                1,
                true,
            )
            .extensions(&[SWAPCHAIN_EXTENSION])
            .formats(vec![
                SurfaceFormat::default(),
                SurfaceFormat::new(Format::Bgra8Unorm, SurfaceFormat::default().color_space),
            ])
            .present_modes(vec![PresentMode::Fifo, PresentMode::Mailbox])
            .features(DeviceFeatures::SAMPLER_ANISOTROPY)
    }

    pub fn kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Appends a queue family; `present` is its support for every surface.
    pub fn family(mut self, flags: QueueFlags, queue_count: u32, present: bool) -> Self {
        self.families.push((QueueFamilyProperties { flags, queue_count }, present));
        self
    }

    pub fn clear_families(mut self) -> Self {
        self.families.clear();
        self
    }

    pub fn extensions(mut self, names: &[&str]) -> Self {
        self.extensions = names.iter().map(|n| (*n).to_owned()).collect();
        self
    }

    pub fn formats(mut self, formats: Vec<SurfaceFormat>) -> Self {
        self.support.formats = formats;
        self
    }

    pub fn present_modes(mut self, modes: Vec<PresentMode>) -> Self {
        self.support.present_modes = modes;
        self
    }

    pub fn capabilities(mut self, caps: SurfaceCapabilities) -> Self {
        self.support.capabilities = caps;
        self
    }

    pub fn features(mut self, features: DeviceFeatures) -> Self {
        self.features = features;
        self
    }

    /// Surface queries on this adapter return an error.
    pub fn surface_query_fails(mut self) -> Self {
        self.surface_query_fails = true;
        self
    }
}

/// Index into the instance's adapter list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessAdapter(usize);

impl HeadlessAdapter {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
struct SurfaceState {
    current_extent: Option<RenderSize>,
    lost: bool,
}

/// Window stand-in. Clones share state, so a test can resize or lose the
/// surface after handing it to the coordinator.
#[derive(Clone, Debug, Default)]
pub struct HeadlessSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl HeadlessSurface {
    /// Makes the surface dictate its extent, as some platforms do.
    pub fn set_current_extent(&self, extent: Option<RenderSize>) {
        self.state.lock().current_extent = extent;
    }

    pub fn lose(&self) {
        self.state.lock().lost = true;
    }

    fn apply(&self, support: &SurfaceSupport) -> Result<SurfaceSupport> {
        let state = self.state.lock();
        if state.lost {
            return Err(RenderError::SurfaceLost);
        }
        let mut support = support.clone();
        if let Some(extent) = state.current_extent {
            support.capabilities.current_extent = Some(extent);
        }
        Ok(support)
    }

    fn is_lost(&self) -> bool {
        self.state.lock().lost
    }
}

#[derive(Debug)]
pub struct HeadlessInstance {
    adapters: Vec<AdapterSpec>,
    completion: Completion,
    surface: HeadlessSurface,
}

impl HeadlessInstance {
    pub fn new(adapters: Vec<AdapterSpec>) -> Self {
        Self {
            adapters,
            completion: Completion::default(),
            surface: HeadlessSurface::default(),
        }
    }

    /// Completion mode for devices created from this instance.
    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    /// The instance's window surface.
    pub fn surface(&self) -> HeadlessSurface {
        self.surface.clone()
    }

    fn spec(&self, adapter: &HeadlessAdapter) -> Result<&AdapterSpec> {
        self.adapters
            .get(adapter.0)
            .ok_or_else(|| RenderError::Backend(format!("unknown adapter {}", adapter.0)))
    }
}

impl GpuInstance for HeadlessInstance {
    type Adapter = HeadlessAdapter;
    type Surface = HeadlessSurface;
    type Device = HeadlessDevice;

    fn enumerate_adapters(&self) -> Result<Vec<HeadlessAdapter>> {
        Ok((0..self.adapters.len()).map(HeadlessAdapter).collect())
    }

    fn adapter_info(&self, adapter: &HeadlessAdapter) -> AdapterInfo {
        match self.adapters.get(adapter.0) {
            Some(spec) => AdapterInfo {
                name: spec.name.clone(),
                kind: spec.kind,
            },
            None => AdapterInfo {
                name: format!("<adapter {}>", adapter.0),
                kind: DeviceKind::Other,
            },
        }
    }

    fn queue_families(&self, adapter: &HeadlessAdapter) -> Result<Vec<QueueFamilyProperties>> {
        Ok(self.spec(adapter)?.families.iter().map(|(p, _)| *p).collect())
    }

    fn presentation_support(
        &self,
        adapter: &HeadlessAdapter,
        family: u32,
        surface: &HeadlessSurface,
    ) -> Result<bool> {
        if surface.is_lost() {
            return Err(RenderError::SurfaceLost);
        }
        self.spec(adapter)?
            .families
            .get(family as usize)
            .map(|(_, present)| *present)
            .ok_or_else(|| RenderError::Backend(format!("no queue family {family}")))
    }

    fn device_extensions(&self, adapter: &HeadlessAdapter) -> Result<Vec<String>> {
        Ok(self.spec(adapter)?.extensions.clone())
    }

    fn device_features(&self, adapter: &HeadlessAdapter) -> DeviceFeatures {
        self.adapters
            .get(adapter.0)
            .map(|s| s.features)
            .unwrap_or_default()
    }

    fn surface_support(
        &self,
        adapter: &HeadlessAdapter,
        surface: &HeadlessSurface,
    ) -> Result<SurfaceSupport> {
        let spec = self.spec(adapter)?;
        if spec.surface_query_fails {
            return Err(RenderError::Backend("surface query failed".into()));
        }
        surface.apply(&spec.support)
    }

    fn create_device(
        &self,
        selection: &Selection<HeadlessAdapter>,
        requirements: &DeviceRequirements,
    ) -> Result<HeadlessDevice> {
        let spec = self.spec(&selection.adapter)?;
        if let Some(missing) = requirements
            .extensions
            .iter()
            .find(|name| !spec.extensions.contains(name))
        {
            return Err(RenderError::Backend(format!(
                "{}: extension {missing} not supported",
                spec.name
            )));
        }
        debug!(
            "headless device on {} (graphics {}, present {})",
            spec.name, selection.queues.graphics, selection.queues.present
        );
        Ok(HeadlessDevice::with_support(
            spec.support.clone(),
            self.completion,
        ))
    }
}

#[derive(Debug, Default)]
struct FenceInner {
    signaled: Mutex<bool>,
    cond: Condvar,
}

/// CPU-visible completion flag. Clones refer to the same fence.
#[derive(Clone, Debug)]
pub struct HeadlessFence {
    id: u64,
    inner: Arc<FenceInner>,
}

impl HeadlessFence {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_signaled(&self) -> bool {
        *self.inner.signaled.lock()
    }

    fn signal(&self) {
        *self.inner.signaled.lock() = true;
        self.inner.cond.notify_all();
    }

    fn reset(&self) {
        *self.inner.signaled.lock() = false;
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.inner.signaled.lock();
        while !*signaled {
            if self.inner.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        *signaled
    }
}

#[derive(Debug)]
pub struct HeadlessSemaphore {
    id: u64,
}

impl HeadlessSemaphore {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessImage {
    pub swapchain: u64,
    pub index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessView {
    pub id: u64,
    pub swapchain: u64,
}

#[derive(Debug)]
pub struct HeadlessSwapchain {
    id: u64,
    config: SurfaceConfiguration,
}

impl HeadlessSwapchain {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SurfaceConfiguration {
        &self.config
    }
}

/// What a recorded frame targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessCommands {
    pub swapchain: u64,
    pub image: u32,
}

/// Everything observable the device did, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadlessEvent {
    SwapchainCreated {
        id: u64,
        config: SurfaceConfiguration,
    },
    SwapchainDestroyed {
        id: u64,
    },
    ViewDestroyed {
        swapchain: u64,
    },
    Acquired {
        swapchain: u64,
        image: u32,
    },
    /// The CPU started waiting on a fence.
    Waited {
        fence: u64,
    },
    Submitted {
        fence: u64,
        swapchain: u64,
        image: u32,
    },
    Presented {
        swapchain: u64,
        image: u32,
    },
}

#[derive(Debug)]
struct Pending {
    fence: HeadlessFence,
    swapchain: u64,
}

#[derive(Debug)]
struct DeviceState {
    support: SurfaceSupport,
    completion: Completion,
    next_id: u64,
    events: Vec<HeadlessEvent>,
    violations: Vec<String>,
    pending: VecDeque<Pending>,
    /// Live swapchains and their acquire cursor.
    swapchains: HashMap<u64, (u32, u32)>,
    /// Live views and the swapchain they belong to.
    views: HashMap<u64, u64>,
    fences: usize,
    semaphores: usize,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    chain_failures: u32,
    view_failure_after: Option<usize>,
    submit_failure: Option<String>,
    lost: bool,
}

impl DeviceState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn complete_front(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(p) => {
                p.fence.signal();
                true
            }
            None => false,
        }
    }

    fn swapchain_in_use(&self, swapchain: u64) -> bool {
        self.pending
            .iter()
            .any(|p| p.swapchain == swapchain && !p.fence.is_signaled())
    }

    fn fence_pending(&self, fence: &HeadlessFence) -> bool {
        self.pending
            .iter()
            .any(|p| p.fence.id == fence.id && !p.fence.is_signaled())
    }
}

/// Simulated logical device. Clones share state, so tests keep a handle to
/// complete work or inspect the event log while the coordinator owns another.
#[derive(Clone, Debug)]
pub struct HeadlessDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl HeadlessDevice {
    /// A device whose surface looks like [`AdapterSpec::eligible`]'s.
    pub fn new(completion: Completion) -> Self {
        Self::with_support(AdapterSpec::eligible("headless").support, completion)
    }

    pub fn with_support(support: SurfaceSupport, completion: Completion) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                support,
                completion,
                next_id: 0,
                events: Vec::new(),
                violations: Vec::new(),
                pending: VecDeque::new(),
                swapchains: HashMap::new(),
                views: HashMap::new(),
                fences: 0,
                semaphores: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                chain_failures: 0,
                view_failure_after: None,
                submit_failure: None,
                lost: false,
            })),
        }
    }

    pub fn set_support(&self, support: SurfaceSupport) {
        self.state.lock().support = support;
    }

    pub fn events(&self) -> Vec<HeadlessEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Resources released while still referenced by unfinished work, and
    /// similar misuse. Empty for a correct frame protocol.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Finishes the oldest pending submission.
    pub fn complete_next(&self) -> bool {
        self.state.lock().complete_front()
    }

    pub fn complete_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut n = 0;
        while state.complete_front() {
            n += 1;
        }
        n
    }

    /// Queues an outcome for a future acquire, overriding the round-robin.
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    /// The next `times` swapchain creations fail with a recoverable error.
    pub fn fail_swapchain_creation(&self, times: u32) {
        self.state.lock().chain_failures = times;
    }

    /// After `successes` more views are created, the next one fails.
    pub fn fail_view_after(&self, successes: usize) {
        self.state.lock().view_failure_after = Some(successes);
    }

    /// The next submission is rejected with `RenderError::Submission`.
    pub fn fail_next_submit(&self, reason: impl Into<String>) {
        self.state.lock().submit_failure = Some(reason.into());
    }

    /// From now on every acquire, submit, present and wait reports
    /// `DeviceLost`. Destruction keeps working.
    pub fn lose_device(&self) {
        self.state.lock().lost = true;
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.lock().swapchains.len()
    }

    pub fn live_views(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.lock().fences
    }

    pub fn live_semaphores(&self) -> usize {
        self.state.lock().semaphores
    }
}

impl GpuDevice for HeadlessDevice {
    type Surface = HeadlessSurface;
    type Swapchain = HeadlessSwapchain;
    type Image = HeadlessImage;
    type ImageView = HeadlessView;
    type Fence = HeadlessFence;
    type Semaphore = HeadlessSemaphore;
    type CommandList = HeadlessCommands;

    fn surface_support(&self, surface: &HeadlessSurface) -> Result<SurfaceSupport> {
        let support = self.state.lock().support.clone();
        surface.apply(&support)
    }

    fn create_swapchain(
        &self,
        surface: &HeadlessSurface,
        config: &SurfaceConfiguration,
        _queues: &QueueAssignment,
        old: Option<&HeadlessSwapchain>,
    ) -> Result<HeadlessSwapchain> {
        if surface.is_lost() {
            return Err(RenderError::SurfaceLost);
        }
        let mut state = self.state.lock();
        if state.chain_failures > 0 {
            state.chain_failures -= 1;
            return Err(RenderError::ChainCreation("out of device memory".into()));
        }
        if config.extent.is_zero_area() || config.image_count == 0 {
            state
                .violations
                .push(format!("swapchain requested with {config:?}"));
            return Err(RenderError::ChainCreation("invalid configuration".into()));
        }
        if let Some(old) = old {
            if !state.swapchains.contains_key(&old.id) {
                state
                    .violations
                    .push(format!("old swapchain {} already destroyed", old.id));
            }
        }
        let id = state.next_id();
        state.swapchains.insert(id, (config.image_count, 0));
        state.events.push(HeadlessEvent::SwapchainCreated {
            id,
            config: *config,
        });
        trace!("headless swapchain {id}: {config:?}");
        Ok(HeadlessSwapchain {
            id,
            config: *config,
        })
    }

    fn swapchain_images(&self, swapchain: &HeadlessSwapchain) -> Result<Vec<HeadlessImage>> {
        Ok((0..swapchain.config.image_count)
            .map(|index| HeadlessImage {
                swapchain: swapchain.id,
                index,
            })
            .collect())
    }

    fn destroy_swapchain(&self, swapchain: HeadlessSwapchain) {
        let mut state = self.state.lock();
        if state.swapchain_in_use(swapchain.id) {
            state.violations.push(format!(
                "swapchain {} destroyed while submissions use it",
                swapchain.id
            ));
        }
        if state.views.values().any(|&sc| sc == swapchain.id) {
            state.violations.push(format!(
                "swapchain {} destroyed before its views",
                swapchain.id
            ));
        }
        state.swapchains.remove(&swapchain.id);
        state
            .events
            .push(HeadlessEvent::SwapchainDestroyed { id: swapchain.id });
    }

    fn create_image_view(&self, image: HeadlessImage, _format: Format) -> Result<HeadlessView> {
        let mut state = self.state.lock();
        match state.view_failure_after {
            Some(0) => {
                state.view_failure_after = None;
                return Err(RenderError::ChainCreation("image view creation failed".into()));
            }
            Some(n) => state.view_failure_after = Some(n - 1),
            None => {}
        }
        let id = state.next_id();
        state.views.insert(id, image.swapchain);
        Ok(HeadlessView {
            id,
            swapchain: image.swapchain,
        })
    }

    fn destroy_image_view(&self, view: HeadlessView) {
        let mut state = self.state.lock();
        if state.swapchain_in_use(view.swapchain) {
            state.violations.push(format!(
                "view of swapchain {} destroyed while submissions use it",
                view.swapchain
            ));
        }
        state.views.remove(&view.id);
        state.events.push(HeadlessEvent::ViewDestroyed {
            swapchain: view.swapchain,
        });
    }

    fn create_fence(&self) -> Result<HeadlessFence> {
        let mut state = self.state.lock();
        state.fences += 1;
        Ok(HeadlessFence {
            id: state.next_id(),
            inner: Arc::default(),
        })
    }

    fn destroy_fence(&self, fence: HeadlessFence) {
        let mut state = self.state.lock();
        if state.fence_pending(&fence) {
            state
                .violations
                .push(format!("fence {} destroyed while pending", fence.id));
        }
        state.fences -= 1;
    }

    fn wait_fence(&self, fence: &HeadlessFence, timeout: Duration) -> Result<bool> {
        {
            let mut state = self.state.lock();
            if state.lost {
                return Err(RenderError::DeviceLost);
            }
            state.events.push(HeadlessEvent::Waited { fence: fence.id });
            if state.completion == Completion::OnWait && state.fence_pending(fence) {
                while let Some(front) = state.pending.front() {
                    let done = front.fence.id == fence.id;
                    state.complete_front();
                    if done {
                        break;
                    }
                }
            }
        }
        Ok(fence.wait(timeout))
    }

    fn fence_signaled(&self, fence: &HeadlessFence) -> Result<bool> {
        Ok(fence.is_signaled())
    }

    fn reset_fence(&self, fence: &HeadlessFence) -> Result<()> {
        let mut state = self.state.lock();
        if state.fence_pending(fence) {
            state
                .violations
                .push(format!("fence {} reset while pending", fence.id));
        }
        fence.reset();
        Ok(())
    }

    fn create_semaphore(&self) -> Result<HeadlessSemaphore> {
        let mut state = self.state.lock();
        state.semaphores += 1;
        Ok(HeadlessSemaphore {
            id: state.next_id(),
        })
    }

    fn destroy_semaphore(&self, _semaphore: HeadlessSemaphore) {
        self.state.lock().semaphores -= 1;
    }

    fn acquire_next_image(
        &self,
        swapchain: &HeadlessSwapchain,
        _signal: &HeadlessSemaphore,
        _timeout: Duration,
    ) -> Result<AcquireOutcome> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RenderError::DeviceLost);
        }
        let outcome = match state.acquire_script.pop_front() {
            Some(outcome) => outcome,
            None => {
                let (count, cursor) = state.swapchains.get_mut(&swapchain.id).ok_or_else(|| {
                    RenderError::Backend(format!("acquire on dead swapchain {}", swapchain.id))
                })?;
                let index = *cursor % *count;
                *cursor += 1;
                AcquireOutcome::Acquired {
                    index,
                    suboptimal: false,
                }
            }
        };
        if let AcquireOutcome::Acquired { index, .. } = outcome {
            state.events.push(HeadlessEvent::Acquired {
                swapchain: swapchain.id,
                image: index,
            });
        }
        Ok(outcome)
    }

    fn submit(
        &self,
        _queue: QueueRole,
        commands: HeadlessCommands,
        _wait: &HeadlessSemaphore,
        _signal: &HeadlessSemaphore,
        fence: &HeadlessFence,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RenderError::DeviceLost);
        }
        if let Some(reason) = state.submit_failure.take() {
            return Err(RenderError::Submission(reason));
        }
        if fence.is_signaled() || state.fence_pending(fence) {
            state
                .violations
                .push(format!("fence {} submitted while in use", fence.id));
        }
        if !state.swapchains.contains_key(&commands.swapchain) {
            return Err(RenderError::Submission(format!(
                "commands target dead swapchain {}",
                commands.swapchain
            )));
        }
        state.events.push(HeadlessEvent::Submitted {
            fence: fence.id,
            swapchain: commands.swapchain,
            image: commands.image,
        });
        match state.completion {
            Completion::Immediate => fence.signal(),
            Completion::OnWait | Completion::Manual => state.pending.push_back(Pending {
                fence: fence.clone(),
                swapchain: commands.swapchain,
            }),
        }
        Ok(())
    }

    fn present(
        &self,
        swapchain: &HeadlessSwapchain,
        image_index: u32,
        _wait: &HeadlessSemaphore,
    ) -> Result<PresentOutcome> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RenderError::DeviceLost);
        }
        let outcome = state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);
        if outcome != PresentOutcome::OutOfDate {
            state.events.push(HeadlessEvent::Presented {
                swapchain: swapchain.id,
                image: image_index,
            });
        }
        Ok(outcome)
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RenderError::DeviceLost);
        }
        while state.complete_front() {}
        Ok(())
    }
}

/// Records nothing but the target; counts frames.
#[derive(Debug, Default)]
pub struct HeadlessRecorder {
    frames: u64,
}

impl HeadlessRecorder {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameRecorder<HeadlessDevice> for HeadlessRecorder {
    fn record(
        &mut self,
        _device: &HeadlessDevice,
        target: &RenderTarget<HeadlessDevice>,
    ) -> Result<RecordedFrame<HeadlessCommands>> {
        self.frames += 1;
        trace!(
            "record frame {} into image {} (slot {})",
            self.frames,
            target.image_index,
            target.slot
        );
        Ok(RecordedFrame::graphics(HeadlessCommands {
            swapchain: target.image.swapchain,
            image: target.image_index,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config(images: u32) -> SurfaceConfiguration {
        SurfaceConfiguration {
            format: SurfaceFormat::default(),
            present_mode: PresentMode::Fifo,
            extent: RenderSize::new(64, 64),
            image_count: images,
        }
    }

    fn queues() -> QueueAssignment {
        QueueAssignment {
            graphics: 0,
            present: 0,
        }
    }

    #[test]
    fn fence_wait_times_out() {
        let device = HeadlessDevice::new(Completion::Manual);
        let fence = device.create_fence().unwrap();
        assert!(!device.wait_fence(&fence, Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn fence_signaled_from_another_thread() {
        let device = HeadlessDevice::new(Completion::Manual);
        let surface = HeadlessSurface::default();
        let sc = device.create_swapchain(&surface, &config(2), &queues(), None).unwrap();
        let fence = device.create_fence().unwrap();
        let sem = device.create_semaphore().unwrap();
        let cmds = HeadlessCommands {
            swapchain: sc.id(),
            image: 0,
        };
        device.submit(QueueRole::Graphics, cmds, &sem, &sem, &fence).unwrap();

        let gpu = device.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            gpu.complete_next()
        });
        assert!(device.wait_fence(&fence, Duration::from_secs(5)).unwrap());
        assert!(worker.join().unwrap());
    }

    #[test]
    fn on_wait_completes_in_queue_order() {
        let device = HeadlessDevice::new(Completion::OnWait);
        let surface = HeadlessSurface::default();
        let sc = device.create_swapchain(&surface, &config(2), &queues(), None).unwrap();
        let sem = device.create_semaphore().unwrap();
        let a = device.create_fence().unwrap();
        let b = device.create_fence().unwrap();
        let cmds = HeadlessCommands {
            swapchain: sc.id(),
            image: 0,
        };
        device.submit(QueueRole::Graphics, cmds, &sem, &sem, &a).unwrap();
        device.submit(QueueRole::Graphics, cmds, &sem, &sem, &b).unwrap();

        assert!(device.wait_fence(&b, Duration::ZERO).unwrap());
        assert!(a.is_signaled());
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn freeing_in_use_swapchain_is_a_violation() {
        let device = HeadlessDevice::new(Completion::Manual);
        let surface = HeadlessSurface::default();
        let sc = device.create_swapchain(&surface, &config(2), &queues(), None).unwrap();
        let fence = device.create_fence().unwrap();
        let sem = device.create_semaphore().unwrap();
        let cmds = HeadlessCommands {
            swapchain: sc.id(),
            image: 1,
        };
        device.submit(QueueRole::Graphics, cmds, &sem, &sem, &fence).unwrap();
        device.destroy_swapchain(sc);
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn acquire_round_robins_and_honours_script() {
        let device = HeadlessDevice::new(Completion::Immediate);
        let surface = HeadlessSurface::default();
        let sc = device.create_swapchain(&surface, &config(2), &queues(), None).unwrap();
        let sem = device.create_semaphore().unwrap();
        let t = Duration::from_millis(1);

        device.script_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(
            device.acquire_next_image(&sc, &sem, t).unwrap(),
            AcquireOutcome::OutOfDate
        );
        let indices: Vec<_> = (0..3)
            .map(|_| match device.acquire_next_image(&sc, &sem, t).unwrap() {
                AcquireOutcome::Acquired { index, .. } => index,
                AcquireOutcome::OutOfDate => u32::MAX,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn lost_surface_fails_queries() {
        let device = HeadlessDevice::new(Completion::Immediate);
        let surface = HeadlessSurface::default();
        surface.lose();
        assert!(matches!(
            device.surface_support(&surface),
            Err(RenderError::SurfaceLost)
        ));
    }
}
