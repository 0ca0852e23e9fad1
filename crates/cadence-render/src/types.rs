// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use serde::Deserialize;

use crate::RenderSize;

/// Pixel format of presentable images. Only the formats a swapchain commonly
/// exposes are named; anything else is carried as the raw backend value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// The surface has no preference; any format may be requested.
    Undefined,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba8Srgb,
    A2b10g10r10Unorm,
    A2r10g10b10Unorm,
    Rgba16Float,
    Other(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    SrgbNonlinear,
    DisplayP3Nonlinear,
    Hdr10St2084,
    ExtendedSrgbLinear,
    Other(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct SurfaceFormat {
    pub format: Format,
    pub color_space: ColorSpace,
}

impl SurfaceFormat {
    pub const fn new(format: Format, color_space: ColorSpace) -> Self {
        Self {
            format,
            color_space,
        }
    }
}

impl Default for SurfaceFormat {
    fn default() -> Self {
        Self::new(Format::Bgra8Srgb, ColorSpace::SrgbNonlinear)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    Immediate,
    Mailbox,
    /// Always available; the fallback when the preferred mode is missing.
    #[default]
    Fifo,
    FifoRelaxed,
    Other(i32),
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const SPARSE_BINDING = 1 << 3;
    }
}

bitflags! {
    /// Optional device features an adapter may be required to support.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
    #[serde(transparent)]
    pub struct DeviceFeatures: u32 {
        const SAMPLER_ANISOTROPY = 1 << 0;
        const FILL_MODE_NON_SOLID = 1 << 1;
        const WIDE_LINES = 1 << 2;
        const GEOMETRY_SHADER = 1 << 3;
        const TESSELLATION_SHADER = 1 << 4;
        const MULTI_DRAW_INDIRECT = 1 << 5;
        const DEPTH_CLAMP = 1 << 6;
        const SHADER_FLOAT64 = 1 << 7;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    #[default]
    Other,
}

/// Static description of an adapter, used for logging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub kind: DeviceKind,
}

/// Queue family as reported by the driver, before surface support is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyProperties {
    pub flags: QueueFlags,
    pub queue_count: u32,
}

/// Queue family after probing against a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: QueueFlags,
    pub queue_count: u32,
    pub present: bool,
}

impl QueueFamily {
    pub fn is_graphics(&self) -> bool {
        self.queue_count > 0 && self.flags.contains(QueueFlags::GRAPHICS)
    }

    pub fn can_present(&self) -> bool {
        self.queue_count > 0 && self.present
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// Zero means no upper bound.
    pub max_image_count: u32,
    /// Set when the surface dictates its size and ignores the requested extent.
    pub current_extent: Option<RenderSize>,
    pub min_extent: RenderSize,
    pub max_extent: RenderSize,
}

impl Default for SurfaceCapabilities {
    fn default() -> Self {
        Self {
            min_image_count: 0,
            max_image_count: 0,
            current_extent: None,
            min_extent: RenderSize::new(0, 0),
            max_extent: RenderSize::new(0, 0),
        }
    }
}

/// Everything a surface reports for one adapter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfaceSupport {
    pub capabilities: SurfaceCapabilities,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

/// Resolved queue families on the chosen adapter. Both roles may share a family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics: u32,
    pub present: u32,
}

impl QueueAssignment {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// The negotiated shape of a presentation chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    pub format: SurfaceFormat,
    pub present_mode: PresentMode,
    pub extent: RenderSize,
    pub image_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_family_needs_a_queue() {
        let fam = QueueFamily {
            index: 0,
            flags: QueueFlags::GRAPHICS,
            queue_count: 0,
            present: true,
        };
        assert!(!fam.is_graphics());
        assert!(!fam.can_present());
    }

    #[test]
    fn unique_families() {
        let shared = QueueAssignment {
            graphics: 1,
            present: 1,
        };
        assert!(shared.is_shared());
        assert_eq!(shared.unique_families(), vec![1]);

        let split = QueueAssignment {
            graphics: 0,
            present: 2,
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
    }
}
