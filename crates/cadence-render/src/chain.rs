// SPDX-License-Identifier: CEPL-1.0
//! Presentation chain negotiation, ownership and deferred destruction.

use tracing::{debug, info};

use crate::backend::GpuDevice;
use crate::config::ChainPreferences;
use crate::error::{RenderError, Result};
use crate::select::{choose_present_mode, choose_surface_format};
use crate::sync::{FrameSynchronizer, SubmissionRef};
use crate::types::{QueueAssignment, SurfaceCapabilities, SurfaceConfiguration, SurfaceSupport};
use crate::RenderSize;

/// `preferred` (default `min + 1`) clamped to what the surface allows.
/// A `max_image_count` of zero means no upper bound.
pub fn image_count(caps: &SurfaceCapabilities, preferred: Option<u32>) -> u32 {
    let wanted = preferred
        .unwrap_or(caps.min_image_count + 1)
        .max(caps.min_image_count)
        .max(1);
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// The surface's own extent if it dictates one, else `requested` clamped to
/// the supported range.
pub fn extent(caps: &SurfaceCapabilities, requested: RenderSize) -> RenderSize {
    caps.current_extent
        .unwrap_or_else(|| requested.clamp(caps.min_extent, caps.max_extent))
}

pub fn negotiate(
    support: &SurfaceSupport,
    requested: RenderSize,
    preferences: &ChainPreferences,
) -> Result<SurfaceConfiguration> {
    let format = choose_surface_format(&support.formats, preferences.format)
        .ok_or(RenderError::Negotiation("surface reports no formats"))?;
    if support.present_modes.is_empty() {
        return Err(RenderError::Negotiation("surface reports no present modes"));
    }
    let present_mode = choose_present_mode(&support.present_modes, preferences.present_mode);

    Ok(SurfaceConfiguration {
        format,
        present_mode,
        extent: extent(&support.capabilities, requested),
        image_count: image_count(&support.capabilities, preferences.image_count),
    })
}

/// A swapchain with its images and one view per image.
pub struct PresentationChain<D: GpuDevice> {
    swapchain: D::Swapchain,
    images: Vec<D::Image>,
    views: Vec<D::ImageView>,
    config: SurfaceConfiguration,
    generation: u64,
}

impl<D: GpuDevice> PresentationChain<D> {
    pub fn swapchain(&self) -> &D::Swapchain {
        &self.swapchain
    }

    pub fn config(&self) -> &SurfaceConfiguration {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: u32) -> Option<(D::Image, D::ImageView)> {
        let i = index as usize;
        Some((*self.images.get(i)?, *self.views.get(i)?))
    }

    fn destroy(self, device: &D) {
        for view in self.views {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.swapchain);
    }
}

struct Retired<D: GpuDevice> {
    chain: PresentationChain<D>,
    pending: Vec<SubmissionRef>,
}

/// Owns the current chain and every superseded chain the GPU may still read.
pub struct PresentationChainManager<D: GpuDevice> {
    preferences: ChainPreferences,
    current: Option<PresentationChain<D>>,
    retired: Vec<Retired<D>>,
    generation: u64,
    stale: bool,
}

impl<D: GpuDevice> PresentationChainManager<D> {
    pub fn new(preferences: ChainPreferences) -> Self {
        Self {
            preferences,
            current: None,
            retired: Vec::new(),
            generation: 0,
            stale: false,
        }
    }

    pub fn current(&self) -> Option<&PresentationChain<D>> {
        self.current.as_ref()
    }

    /// True when the chain no longer matches the surface and must be rebuilt
    /// before the next acquire.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Builds the first chain. Returns `false` without building anything when
    /// the negotiated extent has zero area.
    pub fn build(
        &mut self,
        device: &D,
        surface: &D::Surface,
        queues: &QueueAssignment,
        requested: RenderSize,
    ) -> Result<bool> {
        self.rebuild(device, surface, queues, requested, Vec::new())
    }

    /// Builds a replacement chain, then retires the previous one until every
    /// submission in `in_flight` has completed. On failure the previous chain
    /// is left in place.
    pub fn rebuild(
        &mut self,
        device: &D,
        surface: &D::Surface,
        queues: &QueueAssignment,
        requested: RenderSize,
        in_flight: Vec<SubmissionRef>,
    ) -> Result<bool> {
        let support = device.surface_support(surface)?;
        let config = negotiate(&support, requested, &self.preferences)?;
        if config.extent.is_zero_area() {
            debug!("surface extent is zero, chain not built");
            return Ok(false);
        }

        let old = self.current.as_ref().map(|c| &c.swapchain);
        let chain = Self::create(device, surface, queues, config, old, self.generation + 1)?;
        self.generation = chain.generation;
        info!(
            "Presentation chain #{}: {}x{}, {:?}/{:?}, {:?}, {} images",
            chain.generation,
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.format.color_space,
            config.present_mode,
            chain.images.len()
        );

        if let Some(previous) = self.current.replace(chain) {
            if in_flight.is_empty() {
                previous.destroy(device);
            } else {
                debug!(
                    "retiring chain #{} behind {} submission(s)",
                    previous.generation,
                    in_flight.len()
                );
                self.retired.push(Retired {
                    chain: previous,
                    pending: in_flight,
                });
            }
        }
        self.stale = false;
        Ok(true)
    }

    fn create(
        device: &D,
        surface: &D::Surface,
        queues: &QueueAssignment,
        config: SurfaceConfiguration,
        old: Option<&D::Swapchain>,
        generation: u64,
    ) -> Result<PresentationChain<D>> {
        let swapchain = device.create_swapchain(surface, &config, queues, old)?;
        let images = match device.swapchain_images(&swapchain) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(swapchain);
                return Err(e);
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match device.create_image_view(image, config.format.format) {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        device.destroy_image_view(view);
                    }
                    device.destroy_swapchain(swapchain);
                    return Err(e);
                }
            }
        }

        Ok(PresentationChain {
            swapchain,
            images,
            views,
            config,
            generation,
        })
    }

    /// Destroys retired chains whose submissions have all completed. Never
    /// blocks.
    pub fn collect_retired(&mut self, device: &D, sync: &FrameSynchronizer<D>) -> Result<usize> {
        let mut freed = 0;
        let mut i = 0;
        while i < self.retired.len() {
            let mut done = true;
            for r in &self.retired[i].pending {
                if !sync.is_complete(device, *r)? {
                    done = false;
                    break;
                }
            }
            if done {
                let retired = self.retired.remove(i);
                debug!("freeing retired chain #{}", retired.chain.generation);
                retired.chain.destroy(device);
                freed += 1;
            } else {
                i += 1;
            }
        }
        Ok(freed)
    }

    /// Waits for every submission that may touch a chain, then destroys all of
    /// them.
    pub fn destroy(&mut self, device: &D, sync: &mut FrameSynchronizer<D>) -> Result<()> {
        for retired in &self.retired {
            for r in &retired.pending {
                sync.wait_for(device, *r)?;
            }
        }
        for retired in self.retired.drain(..) {
            retired.chain.destroy(device);
        }
        if let Some(chain) = self.current.take() {
            sync.wait_idle(device)?;
            chain.destroy(device);
        }
        Ok(())
    }

    /// Destroys every chain without waiting. Only for teardown after the GPU
    /// stopped answering; whatever it still references is abandoned.
    pub fn release_all(&mut self, device: &D) -> usize {
        let mut released = 0;
        for retired in self.retired.drain(..) {
            retired.chain.destroy(device);
            released += 1;
        }
        if let Some(chain) = self.current.take() {
            chain.destroy(device);
            released += 1;
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{desktop_capabilities, Completion, HeadlessDevice, HeadlessSurface};
    use crate::types::{ColorSpace, Format, PresentMode, SurfaceFormat};
    use std::time::Duration;

    fn caps(min: u32, max: u32) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: min,
            max_image_count: max,
            ..desktop_capabilities()
        }
    }

    fn queues() -> QueueAssignment {
        QueueAssignment {
            graphics: 0,
            present: 0,
        }
    }

    #[test]
    fn image_count_stays_in_bounds() {
        assert_eq!(image_count(&caps(2, 3), None), 3);
        assert_eq!(image_count(&caps(2, 2), None), 2);
        assert_eq!(image_count(&caps(3, 3), Some(8)), 3);
        assert_eq!(image_count(&caps(2, 0), None), 3);
        assert_eq!(image_count(&caps(2, 0), Some(9)), 9);
        assert_eq!(image_count(&caps(2, 8), Some(1)), 2);
        for (min, max) in [(1, 1), (1, 4), (2, 3), (3, 0), (4, 16)] {
            for preferred in [None, Some(1), Some(3), Some(20)] {
                let n = image_count(&caps(min, max), preferred);
                assert!(n >= min, "{n} < {min}");
                assert!(max == 0 || n <= max, "{n} > {max}");
            }
        }
    }

    #[test]
    fn extent_is_clamped() {
        let c = desktop_capabilities();
        assert_eq!(extent(&c, RenderSize::new(5000, 5000)), RenderSize::new(4096, 4096));
        assert_eq!(extent(&c, RenderSize::new(1, 1)), RenderSize::new(1, 1));
        assert_eq!(extent(&c, RenderSize::new(800, 9000)), RenderSize::new(800, 4096));
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let c = SurfaceCapabilities {
            current_extent: Some(RenderSize::new(1280, 720)),
            ..desktop_capabilities()
        };
        assert_eq!(extent(&c, RenderSize::new(10, 10)), RenderSize::new(1280, 720));
    }

    #[test]
    fn negotiate_applies_fallbacks() {
        let support = SurfaceSupport {
            capabilities: caps(1, 2),
            formats: vec![SurfaceFormat::new(Format::Rgba8Unorm, ColorSpace::SrgbNonlinear)],
            present_modes: vec![PresentMode::Fifo],
        };
        let prefs = ChainPreferences {
            present_mode: PresentMode::Mailbox,
            ..Default::default()
        };
        let config = negotiate(&support, RenderSize::new(640, 480), &prefs).unwrap();
        assert_eq!(config.format.format, Format::Rgba8Unorm);
        assert_eq!(config.present_mode, PresentMode::Fifo);
        assert_eq!(config.image_count, 2);
        assert_eq!(config.extent, RenderSize::new(640, 480));
    }

    #[test]
    fn negotiate_without_formats_fails() {
        let support = SurfaceSupport {
            capabilities: caps(2, 3),
            formats: vec![],
            present_modes: vec![PresentMode::Fifo],
        };
        assert!(matches!(
            negotiate(&support, RenderSize::new(1, 1), &Default::default()),
            Err(RenderError::Negotiation(_))
        ));
    }

    #[test]
    fn failed_view_cleans_up() {
        let device = HeadlessDevice::new(Completion::Immediate);
        let surface = HeadlessSurface::default();
        let mut chains = PresentationChainManager::<HeadlessDevice>::new(Default::default());

        device.fail_view_after(1);
        let err = chains
            .build(&device, &surface, &queues(), RenderSize::new(640, 480))
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(chains.current().is_none());
        assert_eq!(device.live_views(), 0);
        assert_eq!(device.live_swapchains(), 0);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn zero_extent_builds_nothing() {
        let device = HeadlessDevice::new(Completion::Immediate);
        let surface = HeadlessSurface::default();
        surface.set_current_extent(Some(RenderSize::new(0, 0)));
        let mut chains = PresentationChainManager::<HeadlessDevice>::new(Default::default());
        assert!(!chains
            .build(&device, &surface, &queues(), RenderSize::new(640, 480))
            .unwrap());
        assert_eq!(device.live_swapchains(), 0);
    }

    #[test]
    fn retired_chain_outlives_its_submissions() {
        let device = HeadlessDevice::new(Completion::Manual);
        let surface = HeadlessSurface::default();
        let mut sync =
            FrameSynchronizer::<HeadlessDevice>::new(&device, 2, Duration::from_secs(5)).unwrap();
        let mut chains = PresentationChainManager::<HeadlessDevice>::new(Default::default());
        chains
            .build(&device, &surface, &queues(), RenderSize::new(640, 480))
            .unwrap();
        let first = chains.current().unwrap().generation();

        let slot = sync.acquire_slot(&device).unwrap();
        let cmds = crate::headless::HeadlessCommands {
            swapchain: chains.current().unwrap().swapchain().id(),
            image: 0,
        };
        let s = sync.slot(slot);
        device
            .submit(
                crate::types::QueueRole::Graphics,
                cmds,
                &s.image_acquired,
                &s.render_finished,
                &s.fence,
            )
            .unwrap();
        sync.mark_submitted(slot);

        let in_flight = sync.in_flight(&device).unwrap();
        chains
            .rebuild(&device, &surface, &queues(), RenderSize::new(800, 600), in_flight)
            .unwrap();
        assert_eq!(chains.current().unwrap().generation(), first + 1);
        assert_eq!(chains.retired_count(), 1);
        assert_eq!(device.live_swapchains(), 2);

        assert_eq!(chains.collect_retired(&device, &sync).unwrap(), 0);
        assert_eq!(device.live_swapchains(), 2);

        device.complete_all();
        assert_eq!(chains.collect_retired(&device, &sync).unwrap(), 1);
        assert_eq!(device.live_swapchains(), 1);
        assert!(device.violations().is_empty());

        chains.destroy(&device, &mut sync).unwrap();
        assert_eq!(device.live_swapchains(), 0);
        assert_eq!(device.live_views(), 0);
    }
}
