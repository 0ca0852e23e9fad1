// SPDX-License-Identifier: CEPL-1.0
//! The seam between the core and a concrete GPU API.
//!
//! `GpuInstance` covers everything that happens before a logical device
//! exists (adapter enumeration, capability queries). `GpuDevice` covers the
//! objects the frame loop touches every frame.

use std::fmt;
use std::time::Duration;

use crate::config::DeviceRequirements;
use crate::error::Result;
use crate::select::Selection;
use crate::types::{
    AdapterInfo, DeviceFeatures, Format, QueueAssignment, QueueFamilyProperties, QueueRole,
    SurfaceConfiguration, SurfaceFormat, SurfaceSupport,
};
use crate::RenderSize;

pub trait GpuInstance {
    type Adapter: Clone + fmt::Debug;
    type Surface;
    type Device: GpuDevice<Surface = Self::Surface>;

    /// Adapters in the platform's enumeration order.
    fn enumerate_adapters(&self) -> Result<Vec<Self::Adapter>>;

    fn adapter_info(&self, adapter: &Self::Adapter) -> AdapterInfo;

    fn queue_families(&self, adapter: &Self::Adapter) -> Result<Vec<QueueFamilyProperties>>;

    fn presentation_support(
        &self,
        adapter: &Self::Adapter,
        family: u32,
        surface: &Self::Surface,
    ) -> Result<bool>;

    fn device_extensions(&self, adapter: &Self::Adapter) -> Result<Vec<String>>;

    fn device_features(&self, adapter: &Self::Adapter) -> DeviceFeatures;

    fn surface_support(
        &self,
        adapter: &Self::Adapter,
        surface: &Self::Surface,
    ) -> Result<SurfaceSupport>;

    fn create_device(
        &self,
        selection: &Selection<Self::Adapter>,
        requirements: &DeviceRequirements,
    ) -> Result<Self::Device>;
}

/// Result of asking the chain for its next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

pub trait GpuDevice {
    type Surface;
    type Swapchain;
    type Image: Copy;
    type ImageView: Copy;
    type Fence;
    type Semaphore;
    type CommandList;

    fn surface_support(&self, surface: &Self::Surface) -> Result<SurfaceSupport>;

    fn create_swapchain(
        &self,
        surface: &Self::Surface,
        config: &SurfaceConfiguration,
        queues: &QueueAssignment,
        old: Option<&Self::Swapchain>,
    ) -> Result<Self::Swapchain>;

    fn swapchain_images(&self, swapchain: &Self::Swapchain) -> Result<Vec<Self::Image>>;

    fn destroy_swapchain(&self, swapchain: Self::Swapchain);

    fn create_image_view(&self, image: Self::Image, format: Format) -> Result<Self::ImageView>;

    fn destroy_image_view(&self, view: Self::ImageView);

    /// Creates an unsignaled fence.
    fn create_fence(&self) -> Result<Self::Fence>;

    fn destroy_fence(&self, fence: Self::Fence);

    /// Blocks until the fence signals. `Ok(false)` means the timeout elapsed.
    fn wait_fence(&self, fence: &Self::Fence, timeout: Duration) -> Result<bool>;

    fn fence_signaled(&self, fence: &Self::Fence) -> Result<bool>;

    fn reset_fence(&self, fence: &Self::Fence) -> Result<()>;

    fn create_semaphore(&self) -> Result<Self::Semaphore>;

    fn destroy_semaphore(&self, semaphore: Self::Semaphore);

    /// Requests the next presentable image; `signal` fires once the image may
    /// be written.
    fn acquire_next_image(
        &self,
        swapchain: &Self::Swapchain,
        signal: &Self::Semaphore,
        timeout: Duration,
    ) -> Result<AcquireOutcome>;

    /// Submits recorded work. Execution waits on `wait`; completion signals both
    /// `signal` (GPU side) and `fence` (CPU side).
    fn submit(
        &self,
        queue: QueueRole,
        commands: Self::CommandList,
        wait: &Self::Semaphore,
        signal: &Self::Semaphore,
        fence: &Self::Fence,
    ) -> Result<()>;

    fn present(
        &self,
        swapchain: &Self::Swapchain,
        image_index: u32,
        wait: &Self::Semaphore,
    ) -> Result<PresentOutcome>;

    fn wait_idle(&self) -> Result<()>;
}

/// The image a frame renders into.
pub struct RenderTarget<D: GpuDevice> {
    pub slot: usize,
    pub image_index: u32,
    pub image: D::Image,
    pub view: D::ImageView,
    pub extent: RenderSize,
    pub format: SurfaceFormat,
    /// Chain generation; changes on every rebuild.
    pub generation: u64,
}

/// Commands produced by a [`FrameRecorder`] plus the queue they must run on.
pub struct RecordedFrame<C> {
    pub commands: C,
    pub queue: QueueRole,
}

impl<C> RecordedFrame<C> {
    pub fn graphics(commands: C) -> Self {
        Self {
            commands,
            queue: QueueRole::Graphics,
        }
    }
}

/// Records the GPU work for one frame. Pipelines, meshes and materials live
/// behind this trait.
pub trait FrameRecorder<D: GpuDevice> {
    fn record(
        &mut self,
        device: &D,
        target: &RenderTarget<D>,
    ) -> Result<RecordedFrame<D::CommandList>>;
}
