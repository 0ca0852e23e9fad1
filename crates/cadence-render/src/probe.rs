// SPDX-License-Identifier: CEPL-1.0
//! Read-only capability queries for one adapter/surface pair.

use std::collections::BTreeMap;

use tracing::warn;

use crate::backend::GpuInstance;
use crate::config::DeviceRequirements;
use crate::types::{AdapterInfo, DeviceFeatures, QueueFamily, SurfaceSupport};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    pub info: AdapterInfo,
    pub queue_families: Vec<QueueFamily>,
    /// Every extension the adapter reports.
    pub extensions: Vec<String>,
    /// Support for each extension in the required set.
    pub required_extensions: BTreeMap<String, bool>,
    pub surface: SurfaceSupport,
    pub features: DeviceFeatures,
}

impl AdapterCapabilities {
    pub fn missing_extensions(&self) -> Vec<String> {
        self.required_extensions
            .iter()
            .filter(|(_, &present)| !present)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Collects everything the selector needs to judge an adapter.
///
/// Never fails: a query the backend cannot answer is logged and reported as
/// absent (empty list or `false`).
pub fn probe<I: GpuInstance>(
    instance: &I,
    adapter: &I::Adapter,
    surface: &I::Surface,
    requirements: &DeviceRequirements,
) -> AdapterCapabilities {
    let info = instance.adapter_info(adapter);

    let families = instance.queue_families(adapter).unwrap_or_else(|e| {
        warn!("{}: queue family query failed: {e}", info.name);
        Vec::new()
    });
    let queue_families = families
        .into_iter()
        .enumerate()
        .map(|(i, props)| {
            let index = i as u32;
            let present = instance
                .presentation_support(adapter, index, surface)
                .unwrap_or_else(|e| {
                    warn!("{}: present support query for family {index} failed: {e}", info.name);
                    false
                });
            QueueFamily {
                index,
                flags: props.flags,
                queue_count: props.queue_count,
                present,
            }
        })
        .collect();

    let extensions = instance.device_extensions(adapter).unwrap_or_else(|e| {
        warn!("{}: extension query failed: {e}", info.name);
        Vec::new()
    });
    let required_extensions = requirements
        .extensions
        .iter()
        .map(|name| (name.clone(), extensions.iter().any(|e| e == name)))
        .collect();

    let surface = instance
        .surface_support(adapter, surface)
        .unwrap_or_else(|e| {
            warn!("{}: surface query failed: {e}", info.name);
            SurfaceSupport::default()
        });

    let features = instance.device_features(adapter);

    AdapterCapabilities {
        info,
        queue_families,
        extensions,
        required_extensions,
        surface,
        features,
    }
}
