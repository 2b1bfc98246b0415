// Renderer - owns everything between the device and the frame loop
//
// Resources split in two lifetimes:
//   - per device: command pool, semaphores/fence, shader bytecode
//   - per swapchain generation: swapchain, pipeline, framebuffers,
//     recorded command buffers (rebuilt together on every recreation)
//
// Field order matters for Drop: each struct's fields are released top to
// bottom, so dependents are declared before what they depend on.

use crate::backend::frame::{CommandBuffers, CommandPool, Framebuffers};
use crate::backend::pipeline::{GraphicsPipeline, PipelineDesc};
use crate::backend::probe::{query_swapchain_support, SurfaceProbe};
use crate::backend::shader::ShaderBytecode;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome, SwapchainConfig};
use crate::backend::sync::FrameSync;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::{RenderError, Result};
use crate::frame_loop::{is_zero_extent, FrameBackend, RecreateOutcome};
use ash::vk;
use std::sync::Arc;

/// One swapchain generation.
struct SwapchainResources {
    command_buffers: CommandBuffers,
    // Held for Drop only
    _framebuffers: Framebuffers,
    _pipeline: GraphicsPipeline,
    swapchain: Swapchain,
}

pub struct Renderer {
    resources: Option<SwapchainResources>,
    command_pool: CommandPool,
    sync: FrameSync,
    shaders: ShaderBytecode,
    clear_color: [f32; 4],
    wait_stages: [vk::PipelineStageFlags; 1],
    device: Arc<VulkanDevice>,
}

impl Renderer {
    /// Load shaders, create the per-device objects and the first swapchain.
    pub fn new(device: Arc<VulkanDevice>, config: &Config, window_extent: vk::Extent2D) -> Result<Self> {
        let shaders = ShaderBytecode::load(&config.shaders.vertex, &config.shaders.fragment)?;
        let command_pool = CommandPool::new(device.clone())?;
        let sync = FrameSync::new(device.clone(), config.graphics.wait_for_previous_frame)?;

        let mut renderer = Self {
            resources: None,
            command_pool,
            sync,
            shaders,
            clear_color: config.graphics.clear_color,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            device,
        };

        renderer.resources = renderer.build_resources(window_extent)?;
        if renderer.resources.is_none() {
            log::warn!("Surface has no area yet, first swapchain deferred");
        }

        log::info!("Renderer ready on {}", renderer.device.name());
        Ok(renderer)
    }

    /// Derive parameters from the surface as it is right now.
    fn swapchain_config_for(&self, window_extent: vk::Extent2D) -> SwapchainConfig {
        let context = &self.device.context;
        let probe = SurfaceProbe {
            instance: &context.instance,
            surface_loader: &context.surface_loader,
            surface: context.surface,
        };
        let support = query_swapchain_support(&probe, self.device.physical_device);
        SwapchainConfig::derive(&support, window_extent, &self.device.queue_families)
    }

    /// Swapchain -> image views -> render pass + pipeline -> framebuffers ->
    /// recorded command buffers. `None` when the surface is zero-sized.
    fn build_resources(&self, window_extent: vk::Extent2D) -> Result<Option<SwapchainResources>> {
        if is_zero_extent(window_extent) {
            return Ok(None);
        }

        let config = self.swapchain_config_for(window_extent);
        if is_zero_extent(config.extent) {
            return Ok(None);
        }

        let desc = PipelineDesc::from_swapchain(&config);
        let swapchain = Swapchain::new(self.device.clone(), config)?;
        let pipeline = GraphicsPipeline::new(self.device.clone(), desc, &self.shaders)?;
        let framebuffers = Framebuffers::new(
            self.device.clone(),
            &swapchain.image_views,
            pipeline.render_pass,
            swapchain.extent(),
        )?;
        let command_buffers = CommandBuffers::new(
            self.device.clone(),
            &self.command_pool,
            &framebuffers,
            &pipeline,
            self.clear_color,
        )?;

        Ok(Some(SwapchainResources {
            command_buffers,
            _framebuffers: framebuffers,
            _pipeline: pipeline,
            swapchain,
        }))
    }
}

impl FrameBackend for Renderer {
    fn acquire(&mut self) -> Result<AcquireOutcome> {
        let Some(resources) = self.resources.as_ref() else {
            return Ok(AcquireOutcome::OutOfDate);
        };

        self.sync.wait_previous()?;
        resources
            .swapchain
            .acquire_next_image(self.sync.image_available)
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let cmd = self
            .resources
            .as_ref()
            .and_then(|r| r.command_buffers.get(image_index))
            .ok_or(RenderError::MissingCommandBuffer { image_index })?;

        let wait_semaphores = [self.sync.image_available];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = self.sync.arm()?;
        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], fence)
        }
        .map_err(RenderError::vulkan("queue submit"))
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let Some(resources) = self.resources.as_ref() else {
            return Ok(PresentOutcome::OutOfDate);
        };

        resources.swapchain.present(
            self.device.present_queue,
            image_index,
            &[self.sync.render_finished],
        )
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> Result<RecreateOutcome> {
        // Nothing from the old generation may still be in use
        self.device.wait_idle()?;

        // A surface allows one swapchain at a time: release before rebuilding
        self.resources = None;
        self.resources = self.build_resources(extent)?;

        match &self.resources {
            Some(resources) => {
                log::info!(
                    "Swapchain recreated at {}x{} ({:?})",
                    resources.swapchain.extent().width,
                    resources.swapchain.extent().height,
                    resources.swapchain.format()
                );
                Ok(RecreateOutcome::Rebuilt)
            }
            None => Ok(RecreateOutcome::Deferred),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer resources...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait before teardown failed: {}", e);
        }
    }
}
