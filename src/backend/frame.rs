// Per-swapchain-image frame resources
//
// Framebuffers and command buffers exist once per swapchain image and are
// rebuilt with the pipeline. Command buffers are recorded exactly once and
// resubmitted every frame until the next rebuild.

use super::pipeline::GraphicsPipeline;
use super::VulkanDevice;
use crate::error::{RenderError, Result};
use ash::vk;
use std::sync::Arc;

pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<VulkanDevice>,
}

impl Framebuffers {
    /// One framebuffer per image view, sized to the swapchain, one layer.
    pub fn new(
        device: Arc<VulkanDevice>,
        image_views: &[vk::ImageView],
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut this = Self {
            framebuffers: Vec::with_capacity(image_views.len()),
            device,
        };

        for (index, &image_view) in image_views.iter().enumerate() {
            let attachments = [image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { this.device.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(|result| RenderError::FramebufferCreationFailed { index, result })?;
            this.framebuffers.push(framebuffer);
        }

        Ok(this)
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

/// Pool for the graphics queue family. Outlives every swapchain generation.
pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::empty());

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(RenderError::CommandPoolCreationFailed)?;

        Ok(Self { pool, device })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Clear value for the single color attachment.
pub fn clear_value(color: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }
}

/// Pre-recorded primary command buffers, one per framebuffer.
/// Must be dropped before the pool they came from.
pub struct CommandBuffers {
    pub buffers: Vec<vk::CommandBuffer>,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandBuffers {
    pub fn new(
        device: Arc<VulkanDevice>,
        pool: &CommandPool,
        framebuffers: &Framebuffers,
        pipeline: &GraphicsPipeline,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);

        let buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(RenderError::CommandBufferAllocationFailed)?;

        let this = Self {
            buffers,
            pool: pool.pool,
            device,
        };

        for (index, (&cmd, &framebuffer)) in this
            .buffers
            .iter()
            .zip(&framebuffers.framebuffers)
            .enumerate()
        {
            this.record(cmd, framebuffer, pipeline, clear_color)
                .map_err(|result| RenderError::CommandRecordingFailed { index, result })?;
        }

        log::info!("Created {} pre-recorded command buffers", this.buffers.len());
        Ok(this)
    }

    /// clear -> bind pipeline -> draw 3 vertices -> end
    fn record(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        pipeline: &GraphicsPipeline,
        clear_color: [f32; 4],
    ) -> ash::prelude::VkResult<()> {
        let device = &self.device.device;

        // Resubmitted every frame without re-recording
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        let clear_values = [clear_value(clear_color)];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(pipeline.render_pass)
            .framebuffer(framebuffer)
            .render_area(pipeline.desc.scissor())
            .clear_values(&clear_values);

        unsafe {
            device.begin_command_buffer(cmd, &begin_info)?;
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)
        }
    }

    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.pool, &self.buffers);
            }
        }
    }
}
