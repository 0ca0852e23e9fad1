// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RenderError, Result};
use crate::types::{DeviceFeatures, PresentMode, SurfaceFormat};

pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";

/// Startup configuration for the rendering core. Read once; changing it later
/// requires a full chain rebuild.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub frames_in_flight: usize,
    pub preferred_format: SurfaceFormat,
    pub present_mode: PresentMode,
    /// Overrides the `min + 1` default; still clamped to what the surface allows.
    pub image_count: Option<u32>,
    pub required_extensions: Vec<String>,
    pub required_features: DeviceFeatures,
    pub fence_timeout_ms: u64,
    pub rebuild_retries: u32,
    pub rebuild_backoff_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            preferred_format: SurfaceFormat::default(),
            present_mode: PresentMode::Fifo,
            image_count: None,
            required_extensions: vec![SWAPCHAIN_EXTENSION.to_owned()],
            required_features: DeviceFeatures::SAMPLER_ANISOTROPY,
            fence_timeout_ms: 2_000,
            rebuild_retries: 3,
            rebuild_backoff_ms: 10,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.rebuild_retries == 0 {
            return Err(RenderError::InvalidConfig(
                "rebuild_retries must be at least 1".into(),
            ));
        }
        if self.image_count == Some(0) {
            return Err(RenderError::InvalidConfig(
                "image_count must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn requirements(&self) -> DeviceRequirements {
        DeviceRequirements {
            extensions: self.required_extensions.clone(),
            features: self.required_features,
        }
    }

    pub fn chain_preferences(&self) -> ChainPreferences {
        ChainPreferences {
            format: self.preferred_format,
            present_mode: self.present_mode,
            image_count: self.image_count,
        }
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.rebuild_retries,
            backoff: Duration::from_millis(self.rebuild_backoff_ms),
        }
    }
}

/// What an adapter must offer to be eligible.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceRequirements {
    pub extensions: Vec<String>,
    pub features: DeviceFeatures,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainPreferences {
    pub format: SurfaceFormat,
    pub present_mode: PresentMode,
    pub image_count: Option<u32>,
}

impl Default for ChainPreferences {
    fn default() -> Self {
        RenderConfig::default().chain_preferences()
    }
}

/// Bounded retry for recoverable chain rebuild failures. Attempt `n` sleeps
/// `backoff * n` before trying again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}
