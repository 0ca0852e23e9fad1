// SPDX-License-Identifier: CEPL-1.0
//! The per-frame acquire -> record -> submit -> present protocol.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::backend::{AcquireOutcome, FrameRecorder, GpuDevice, PresentOutcome, RenderTarget};
use crate::chain::PresentationChainManager;
use crate::config::{RenderConfig, RetryPolicy};
use crate::error::{RenderError, Result};
use crate::sync::{FrameSynchronizer, ImageFences};
use crate::types::{QueueAssignment, SurfaceConfiguration};
use crate::RenderSize;

/// How many times one frame may rebuild an out-of-date chain and retry
/// acquisition before giving up on it.
const MAX_ACQUIRE_RESTARTS: u32 = 3;

/// Single-slot mailbox for window size changes. Clones share the slot; the
/// latest notification wins and is consumed before the next acquire.
#[derive(Clone, Debug, Default)]
pub struct ResizeSignal {
    pending: Arc<Mutex<Option<RenderSize>>>,
}

impl ResizeSignal {
    pub fn notify(&self, size: RenderSize) {
        *self.pending.lock() = Some(size);
    }

    pub fn take(&self) -> Option<RenderSize> {
        self.pending.lock().take()
    }
}

/// Reports the window's current drawable size. Consulted whenever the chain
/// is rebuilt, so out-of-date rebuilds do not depend on a resize event having
/// arrived first.
pub type ExtentQuery = Box<dyn Fn() -> RenderSize>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The window has no area (minimized).
    ZeroExtent,
    /// The chain kept going out of date during acquisition.
    ChainUnstable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        slot: usize,
        image_index: u32,
        generation: u64,
    },
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_presented: u64,
    pub frames_skipped: u64,
    pub rebuilds: u64,
}

pub struct SubmissionCoordinator<D: GpuDevice> {
    device: D,
    surface: D::Surface,
    queues: QueueAssignment,
    chain: PresentationChainManager<D>,
    sync: FrameSynchronizer<D>,
    image_fences: ImageFences,
    resize: ResizeSignal,
    extent_query: Option<ExtentQuery>,
    extent: RenderSize,
    retry: RetryPolicy,
    fence_timeout: Duration,
    stats: FrameStats,
    shut_down: bool,
}

impl<D: GpuDevice> SubmissionCoordinator<D> {
    /// Creates the frame slots and, unless `extent` has zero area, the first
    /// chain.
    pub fn new(
        device: D,
        surface: D::Surface,
        queues: QueueAssignment,
        config: &RenderConfig,
        extent: RenderSize,
    ) -> Result<Self> {
        config.validate()?;
        let sync =
            FrameSynchronizer::new(&device, config.frames_in_flight, config.fence_timeout())?;
        let mut coordinator = Self {
            device,
            surface,
            queues,
            chain: PresentationChainManager::new(config.chain_preferences()),
            sync,
            image_fences: ImageFences::default(),
            resize: ResizeSignal::default(),
            extent_query: None,
            extent,
            retry: config.retry_policy(),
            fence_timeout: config.fence_timeout(),
            stats: FrameStats::default(),
            shut_down: false,
        };
        if !extent.is_zero_area() {
            coordinator.rebuild_chain()?;
        }
        Ok(coordinator)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Handle for the window layer to report size changes.
    pub fn resize_signal(&self) -> ResizeSignal {
        self.resize.clone()
    }

    /// Installs the window size query used on every rebuild.
    pub fn set_extent_query(&mut self, query: impl Fn() -> RenderSize + 'static) {
        self.extent_query = Some(Box::new(query));
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn extent(&self) -> RenderSize {
        self.extent
    }

    /// Configuration of the current chain, if one exists.
    pub fn surface_config(&self) -> Option<SurfaceConfiguration> {
        self.chain.current().map(|c| *c.config())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    /// Runs one frame.
    pub fn render_frame<R: FrameRecorder<D>>(
        &mut self,
        recorder: &mut R,
    ) -> Result<FrameOutcome> {
        if self.shut_down {
            return Err(RenderError::Backend("coordinator already shut down".into()));
        }
        let slot = self.sync.acquire_slot(&self.device)?;
        self.chain.collect_retired(&self.device, &self.sync)?;

        if let Some(size) = self.resize.take() {
            debug!("resize to {}x{}", size.width, size.height);
            self.extent = size;
            self.chain.mark_stale();
        }
        if self.extent.is_zero_area() && self.refresh_extent() {
            self.chain.mark_stale();
        }
        if self.extent.is_zero_area() {
            return Ok(self.skip(SkipReason::ZeroExtent));
        }

        for restart in 0..=MAX_ACQUIRE_RESTARTS {
            if self.chain.is_stale() || self.chain.current().is_none() {
                if !self.rebuild_chain()? {
                    return Ok(self.skip(SkipReason::ZeroExtent));
                }
            }
            let Some(chain) = self.chain.current() else {
                return Ok(self.skip(SkipReason::ZeroExtent));
            };
            let outcome = self.device.acquire_next_image(
                chain.swapchain(),
                &self.sync.slot(slot).image_acquired,
                self.fence_timeout,
            )?;
            match outcome {
                AcquireOutcome::OutOfDate => {
                    debug!("chain out of date at acquire (restart {restart})");
                    self.chain.mark_stale();
                }
                AcquireOutcome::Acquired { index, suboptimal } => {
                    if suboptimal {
                        trace!("suboptimal acquire, rebuilding after this frame");
                        self.chain.mark_stale();
                    }
                    return self.submit_and_present(slot, index, recorder);
                }
            }
        }

        warn!("chain still out of date after {MAX_ACQUIRE_RESTARTS} rebuilds, skipping frame");
        Ok(self.skip(SkipReason::ChainUnstable))
    }

    fn submit_and_present<R: FrameRecorder<D>>(
        &mut self,
        slot: usize,
        image_index: u32,
        recorder: &mut R,
    ) -> Result<FrameOutcome> {
        // Another slot may still be rendering into this image.
        if let Some(previous) = self.image_fences.get(image_index) {
            if !self.sync.is_complete(&self.device, previous)? {
                trace!(
                    "image {image_index} still owned by slot {}, waiting",
                    previous.slot
                );
                self.sync.wait_for(&self.device, previous)?;
            }
        }

        let chain = self
            .chain
            .current()
            .ok_or_else(|| RenderError::Backend("no presentation chain".into()))?;
        let (image, view) = chain.image(image_index).ok_or_else(|| {
            RenderError::Backend(format!(
                "acquired image {image_index} of a {}-image chain",
                chain.image_count()
            ))
        })?;
        let generation = chain.generation();
        let target = RenderTarget {
            slot,
            image_index,
            image,
            view,
            extent: chain.config().extent,
            format: chain.config().format,
            generation,
        };

        let recorded = recorder.record(&self.device, &target)?;
        let frame = self.sync.slot(slot);
        self.device.submit(
            recorded.queue,
            recorded.commands,
            &frame.image_acquired,
            &frame.render_finished,
            &frame.fence,
        )?;
        let submission = self.sync.mark_submitted(slot);
        self.image_fences.bind(image_index, submission);

        let frame = self.sync.slot(slot);
        let presented = self
            .device
            .present(chain.swapchain(), image_index, &frame.render_finished)?;
        match presented {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                debug!("chain stale after present");
                self.chain.mark_stale();
            }
        }

        self.stats.frames_presented += 1;
        trace!(
            "frame {} presented: slot {slot}, image {image_index}, chain #{generation}",
            self.stats.frames_presented
        );
        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            generation,
        })
    }

    fn skip(&mut self, reason: SkipReason) -> FrameOutcome {
        self.stats.frames_skipped += 1;
        trace!("frame skipped: {reason:?}");
        FrameOutcome::Skipped(reason)
    }

    /// Rebuilds the chain for the current extent, retrying recoverable
    /// failures with linear backoff. `Ok(false)` means the surface has no
    /// area and nothing was built.
    /// Re-reads the window size through the extent query, if one is set.
    /// Returns true when it changed.
    fn refresh_extent(&mut self) -> bool {
        let Some(query) = &self.extent_query else {
            return false;
        };
        let current = query();
        if current == self.extent {
            return false;
        }
        debug!("window reports {}x{}", current.width, current.height);
        self.extent = current;
        true
    }

    fn rebuild_chain(&mut self) -> Result<bool> {
        self.refresh_extent();
        if self.extent.is_zero_area() {
            return Ok(false);
        }
        let in_flight = self.sync.in_flight(&self.device)?;
        let had_chain = self.chain.current().is_some();
        let mut attempt = 1;
        loop {
            match self.chain.rebuild(
                &self.device,
                &self.surface,
                &self.queues,
                self.extent,
                in_flight.clone(),
            ) {
                Ok(built) => {
                    if built {
                        let images = self.chain.current().map_or(0, |c| c.image_count());
                        self.image_fences.reset(images);
                        if had_chain {
                            self.stats.rebuilds += 1;
                            debug!("chain rebuilt ({} total)", self.stats.rebuilds);
                        }
                    }
                    return Ok(built);
                }
                Err(e) if e.is_recoverable() && attempt < self.retry.attempts => {
                    warn!(
                        "chain build failed (attempt {attempt}/{}): {e}",
                        self.retry.attempts
                    );
                    thread::sleep(self.retry.backoff * attempt);
                    attempt += 1;
                }
                Err(e) if e.is_recoverable() => {
                    error!("chain build failed after {attempt} attempt(s): {e}");
                    return Err(RenderError::RebuildExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Waits for the GPU and releases chains and frame slots. Idempotent;
    /// also run on drop.
    ///
    /// Everything is released even when the wait fails; the first error is
    /// returned afterwards.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let waited = self
            .sync
            .wait_idle(&self.device)
            .and_then(|()| self.device.wait_idle())
            .and_then(|()| self.chain.destroy(&self.device, &mut self.sync));
        if let Err(e) = &waited {
            error!("GPU did not go idle during shutdown: {e}");
            if let Err(e) = self.device.wait_idle() {
                warn!("device wait during forced teardown: {e}");
            }
            let released = self.chain.release_all(&self.device);
            debug!("force-released {released} chain(s)");
        }
        self.sync.destroy(&self.device);
        waited?;
        debug!(
            "coordinator shut down: {} presented, {} skipped, {} rebuilds",
            self.stats.frames_presented, self.stats.frames_skipped, self.stats.rebuilds
        );
        Ok(())
    }
}

impl<D: GpuDevice> Drop for SubmissionCoordinator<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("coordinator shutdown failed: {e}");
        }
    }
}
