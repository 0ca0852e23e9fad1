// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use ash::khr::{surface, swapchain};
use ash::{vk, Instance};
use cadence_render::{
    AcquireOutcome, Format, GpuDevice, PresentOutcome, QueueAssignment, QueueRole, RenderError,
    Result, SurfaceConfiguration, SurfaceSupport,
};
use tracing::{debug, warn};

use crate::convert::{self, chain_error, vk_error};
use crate::instance::{query_surface_support, VkSurface};

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Logical device plus the two queues the frame loop submits and presents on.
pub struct VkDevice {
    phys: vk::PhysicalDevice,
    device: ash::Device,
    surface_loader: surface::Instance,
    swapchain_loader: swapchain::Device,
    queues: QueueAssignment,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl VkDevice {
    pub(crate) fn new(
        instance: &Instance,
        surface_loader: surface::Instance,
        phys: vk::PhysicalDevice,
        device: ash::Device,
        queues: QueueAssignment,
    ) -> Self {
        let graphics_queue = unsafe { device.get_device_queue(queues.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queues.present, 0) };
        let swapchain_loader = swapchain::Device::new(instance, &device);
        Self {
            phys,
            device,
            surface_loader,
            swapchain_loader,
            queues,
            graphics_queue,
            present_queue,
        }
    }

    /// Raw device, for recorders that create their own objects.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn queues(&self) -> QueueAssignment {
        self.queues
    }

    fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Present => self.present_queue,
        }
    }
}

impl GpuDevice for VkDevice {
    type Surface = VkSurface;
    type Swapchain = vk::SwapchainKHR;
    type Image = vk::Image;
    type ImageView = vk::ImageView;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type CommandList = vk::CommandBuffer;

    fn surface_support(&self, surface: &VkSurface) -> Result<SurfaceSupport> {
        query_surface_support(&self.surface_loader, self.phys, surface.handle())
    }

    fn create_swapchain(
        &self,
        surface: &VkSurface,
        config: &SurfaceConfiguration,
        queues: &QueueAssignment,
        old: Option<&vk::SwapchainKHR>,
    ) -> Result<vk::SwapchainKHR> {
        // Transform, usage and alpha come from the live capabilities, not a
        // cached copy.
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, surface.handle())
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        let image_usage = convert::chain_image_usage(caps.supported_usage_flags)?;
        let composite_alpha = convert::composite_alpha(caps.supported_composite_alpha);

        let families = queues.unique_families();
        let (sharing_mode, family_count, family_ptr) = if queues.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (
                vk::SharingMode::CONCURRENT,
                families.len() as u32,
                families.as_ptr(),
            )
        };

        let create_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle(),
            min_image_count: config.image_count,
            image_format: convert::format_to_vk(config.format.format),
            image_color_space: convert::color_space_to_vk(config.format.color_space),
            image_extent: vk::Extent2D {
                width: config.extent.width,
                height: config.extent.height,
            },
            image_array_layers: 1,
            image_usage,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: family_ptr,
            pre_transform: caps.current_transform,
            composite_alpha,
            present_mode: convert::present_mode_to_vk(config.present_mode),
            clipped: vk::TRUE,
            old_swapchain: old.copied().unwrap_or_default(),
            ..Default::default()
        };

        let sc = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(chain_error("vkCreateSwapchainKHR"))?;
        debug!(
            "swapchain {:?}: {}x{}, {} image(s), {:?}",
            sc, config.extent.width, config.extent.height, config.image_count, config.present_mode
        );
        Ok(sc)
    }

    fn swapchain_images(&self, swapchain: &vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(*swapchain) }
            .map_err(chain_error("vkGetSwapchainImagesKHR"))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_image_view(&self, image: vk::Image, format: Format) -> Result<vk::ImageView> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: convert::format_to_vk(format),
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&ci, None) }.map_err(chain_error("vkCreateImageView"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_fence(&self) -> Result<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None) }.map_err(vk_error("vkCreateFence"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&self, fence: &vk::Fence, timeout: Duration) -> Result<bool> {
        match unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(fence), true, timeout_ns(timeout))
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error("vkWaitForFences")(e)),
        }
    }

    fn fence_signaled(&self, fence: &vk::Fence) -> Result<bool> {
        unsafe { self.device.get_fence_status(*fence) }.map_err(vk_error("vkGetFenceStatus"))
    }

    fn reset_fence(&self, fence: &vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(std::slice::from_ref(fence)) }
            .map_err(vk_error("vkResetFences"))
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&ci, None) }.map_err(vk_error("vkCreateSemaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: &vk::SwapchainKHR,
        signal: &vk::Semaphore,
        timeout: Duration,
    ) -> Result<AcquireOutcome> {
        let res = unsafe {
            self.swapchain_loader.acquire_next_image(
                *swapchain,
                timeout_ns(timeout),
                *signal,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RenderError::Timeout {
                waiting_for: "swapchain image",
                after: timeout,
            }),
            Err(e) => Err(vk_error("vkAcquireNextImageKHR")(e)),
        }
    }

    fn submit(
        &self,
        queue: QueueRole,
        commands: vk::CommandBuffer,
        wait: &vk::Semaphore,
        signal: &vk::Semaphore,
        fence: &vk::Fence,
    ) -> Result<()> {
        let wait_stage =
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: wait,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &commands,
            signal_semaphore_count: 1,
            p_signal_semaphores: signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue(queue), std::slice::from_ref(&submit), *fence)
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            other => RenderError::Submission(other.to_string()),
        })
    }

    fn present(
        &self,
        swapchain: &vk::SwapchainKHR,
        image_index: u32,
        wait: &vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: wait,
            swapchain_count: 1,
            p_swapchains: swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkQueuePresentKHR")(e)),
        }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("vkDeviceWaitIdle"))
    }
}

// STRICT TEARDOWN ORDER:
// - Swapchains, views, fences and semaphores are released by the coordinator
//   before this runs.
// - Command pools owned by recorders must be gone too.
// - Device before surface; instance last.
impl Drop for VkDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle during teardown: {e}");
            }
            self.device.destroy_device(None);
        }
    }
}
