// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral device selection and frame synchronization.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod headless;
pub mod probe;
pub mod select;
pub mod sync;
pub mod types;

pub use backend::{
    AcquireOutcome, FrameRecorder, GpuDevice, GpuInstance, PresentOutcome, RecordedFrame,
    RenderTarget,
};
pub use config::{ChainPreferences, DeviceRequirements, RenderConfig, RetryPolicy};
pub use coordinator::{
    ExtentQuery, FrameOutcome, FrameStats, ResizeSignal, SkipReason, SubmissionCoordinator,
};
pub use error::{ErrorKind, RenderError, Result};
pub use select::{select, select_adapter, Selection};
pub use types::*;

/// Extent in physical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero dimension; nothing can be built for them.
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Component-wise clamp into `[min, max]`.
    pub fn clamp(self, min: RenderSize, max: RenderSize) -> RenderSize {
        RenderSize {
            width: self.width.max(min.width).min(max.width),
            height: self.height.max(min.height).min(max.height),
        }
    }
}

impl From<(u32, u32)> for RenderSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}
