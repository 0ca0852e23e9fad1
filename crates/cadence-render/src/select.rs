// SPDX-License-Identifier: CEPL-1.0
//! Adapter eligibility, selection and the surface fallback policies.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::GpuInstance;
use crate::config::DeviceRequirements;
use crate::error::{RenderError, Result};
use crate::probe::{probe, AdapterCapabilities};
use crate::types::{DeviceFeatures, Format, PresentMode, QueueAssignment, SurfaceFormat};

/// Why an adapter was passed over.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Ineligible {
    #[error("no graphics-capable queue family")]
    NoGraphicsQueue,
    #[error("no queue family can present to the surface")]
    NoPresentQueue,
    #[error("missing device extensions: {}", .0.join(", "))]
    MissingExtensions(Vec<String>),
    #[error("surface reports no formats")]
    NoSurfaceFormats,
    #[error("surface reports no present modes")]
    NoPresentModes,
    #[error("missing device features: {0:?}")]
    MissingFeatures(DeviceFeatures),
}

/// The chosen adapter and how its queues are used.
#[derive(Clone, Debug)]
pub struct Selection<A> {
    pub adapter: A,
    pub capabilities: AdapterCapabilities,
    pub queues: QueueAssignment,
}

/// Applies the eligibility predicate. On success returns the queue families
/// the adapter would use.
pub fn check_eligibility(
    caps: &AdapterCapabilities,
    requirements: &DeviceRequirements,
) -> std::result::Result<QueueAssignment, Ineligible> {
    let graphics = caps
        .queue_families
        .iter()
        .find(|f| f.is_graphics())
        .ok_or(Ineligible::NoGraphicsQueue)?;

    // Prefer presenting from the graphics family so both roles share a queue.
    let present = if graphics.can_present() {
        graphics
    } else {
        caps.queue_families
            .iter()
            .find(|f| f.can_present())
            .ok_or(Ineligible::NoPresentQueue)?
    };

    let missing = caps.missing_extensions();
    if !missing.is_empty() {
        return Err(Ineligible::MissingExtensions(missing));
    }

    if caps.surface.formats.is_empty() {
        return Err(Ineligible::NoSurfaceFormats);
    }
    if caps.surface.present_modes.is_empty() {
        return Err(Ineligible::NoPresentModes);
    }

    let missing_features = requirements.features.difference(caps.features);
    if !missing_features.is_empty() {
        return Err(Ineligible::MissingFeatures(missing_features));
    }

    Ok(QueueAssignment {
        graphics: graphics.index,
        present: present.index,
    })
}

/// Picks the first eligible adapter in enumeration order.
pub fn select<I: GpuInstance>(
    instance: &I,
    adapters: &[I::Adapter],
    surface: &I::Surface,
    requirements: &DeviceRequirements,
) -> Result<Selection<I::Adapter>> {
    if adapters.is_empty() {
        return Err(RenderError::NoAdapters);
    }

    for adapter in adapters {
        let caps = probe(instance, adapter, surface, requirements);
        match check_eligibility(&caps, requirements) {
            Ok(queues) => {
                info!(
                    "Selected adapter: {} ({:?}), graphics family {}, present family {}",
                    caps.info.name, caps.info.kind, queues.graphics, queues.present
                );
                return Ok(Selection {
                    adapter: adapter.clone(),
                    capabilities: caps,
                    queues,
                });
            }
            Err(reason) => {
                warn!("Skipping adapter ({}): {}", caps.info.name, reason);
            }
        }
    }

    Err(RenderError::NoEligibleAdapter {
        candidates: adapters.len(),
    })
}

/// Enumerates adapters through the instance and selects one.
pub fn select_adapter<I: GpuInstance>(
    instance: &I,
    surface: &I::Surface,
    requirements: &DeviceRequirements,
) -> Result<Selection<I::Adapter>> {
    let adapters = instance.enumerate_adapters()?;
    debug!("{} adapter(s) enumerated", adapters.len());
    select(instance, &adapters, surface, requirements)
}

/// Exact (format, color space) match, else the first supported entry.
///
/// Returns `None` only for an empty list. A lone `Undefined` entry means the
/// surface takes any format, so the preference is honoured as-is.
pub fn choose_surface_format(
    supported: &[SurfaceFormat],
    preferred: SurfaceFormat,
) -> Option<SurfaceFormat> {
    match supported {
        [] => None,
        [only] if only.format == Format::Undefined => Some(preferred),
        _ => Some(
            supported
                .iter()
                .copied()
                .find(|f| *f == preferred)
                .unwrap_or(supported[0]),
        ),
    }
}

/// The preferred mode when offered, else FIFO, else the first mode listed.
/// An empty list yields FIFO.
pub fn choose_present_mode(supported: &[PresentMode], preferred: PresentMode) -> PresentMode {
    if supported.contains(&preferred) {
        preferred
    } else if supported.contains(&PresentMode::Fifo) {
        PresentMode::Fifo
    } else {
        supported.first().copied().unwrap_or(PresentMode::Fifo)
    }
}
