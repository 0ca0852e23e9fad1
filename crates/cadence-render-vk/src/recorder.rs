// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use cadence_render::{FrameRecorder, RecordedFrame, RenderTarget, Result};

use crate::convert::vk_error;
use crate::device::VkDevice;

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Clears each acquired image to a fixed color. One command buffer per frame
/// slot; a slot's buffer is only re-recorded after its fence has signaled.
pub struct ClearRecorder {
    device: ash::Device,
    pool: vk::CommandPool,
    bufs: Vec<vk::CommandBuffer>,
    clear: vk::ClearColorValue,
}

impl ClearRecorder {
    pub fn new(device: &VkDevice, frames_in_flight: usize, clear: [f32; 4]) -> Result<Self> {
        let raw = device.raw().clone();
        let pool_ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: device.queues().graphics,
            ..Default::default()
        };
        let pool = unsafe { raw.create_command_pool(&pool_ci, None) }
            .map_err(vk_error("vkCreateCommandPool"))?;

        let alloc = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: frames_in_flight as u32,
            ..Default::default()
        };
        let bufs = match unsafe { raw.allocate_command_buffers(&alloc) } {
            Ok(b) => b,
            Err(e) => {
                unsafe { raw.destroy_command_pool(pool, None) };
                return Err(vk_error("vkAllocateCommandBuffers")(e));
            }
        };

        Ok(Self {
            device: raw,
            pool,
            bufs,
            clear: vk::ClearColorValue { float32: clear },
        })
    }

    unsafe fn record_clear(&self, cmd: vk::CommandBuffer, image: vk::Image) -> ash::prelude::VkResult<()> {
        let d = &self.device;
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)?;

            let to_transfer = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: color_range(),
                ..Default::default()
            };
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            d.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &self.clear,
                &[color_range()],
            );

            let to_present = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                dst_access_mask: vk::AccessFlags::empty(),
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: color_range(),
                ..Default::default()
            };
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );

            d.end_command_buffer(cmd)
        }
    }
}

impl FrameRecorder<VkDevice> for ClearRecorder {
    fn record(
        &mut self,
        _device: &VkDevice,
        target: &RenderTarget<VkDevice>,
    ) -> Result<RecordedFrame<vk::CommandBuffer>> {
        let cmd = *self.bufs.get(target.slot).ok_or_else(|| {
            cadence_render::RenderError::Backend(format!(
                "no command buffer for slot {}",
                target.slot
            ))
        })?;
        unsafe { self.record_clear(cmd, target.image) }.map_err(vk_error("recording clear"))?;
        Ok(RecordedFrame::graphics(cmd))
    }
}

// Free command buffers before destroying their pool. The caller guarantees
// the GPU is idle (coordinator shutdown runs first).
impl Drop for ClearRecorder {
    fn drop(&mut self) {
        unsafe {
            if !self.bufs.is_empty() {
                self.device.free_command_buffers(self.pool, &self.bufs);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
