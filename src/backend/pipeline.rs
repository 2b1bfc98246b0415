// Graphics pipeline creation and management
//
// One fixed pipeline: no vertex buffers (the vertex shader carries the
// triangle), static viewport/scissor baked from the swapchain extent, no
// blending, no descriptors. Any swapchain rebuild invalidates it.

use super::shader::{ShaderBytecode, ShaderModule};
use super::swapchain::SwapchainConfig;
use super::VulkanDevice;
use crate::error::{RenderError, Result};
use ash::vk;
use std::sync::Arc;

/// Everything the pipeline bakes in from the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineDesc {
    pub color_format: vk::Format,
    pub extent: vk::Extent2D,
}

impl PipelineDesc {
    pub fn from_swapchain(config: &SwapchainConfig) -> Self {
        Self {
            color_format: config.format(),
            extent: config.extent,
        }
    }

    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

/// The swapchain image: cleared on load, kept for presentation.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
}

/// Blending off, all channels written.
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
}

fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);

    // The attachment write has to wait for the acquire semaphore, which is
    // waited on at the color output stage.
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment(format)];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .map_err(RenderError::RenderPassCreationFailed)
}

/// Render pass, layout and pipeline for one swapchain generation.
pub struct GraphicsPipeline {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub desc: PipelineDesc,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(device: Arc<VulkanDevice>, desc: PipelineDesc, shaders: &ShaderBytecode) -> Result<Self> {
        let render_pass = create_render_pass(&device, desc.color_format)?;

        // Null handles are valid to destroy, so Drop can clean up a partial build.
        let mut this = Self {
            render_pass,
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            desc,
            device,
        };

        // Modules are dropped at the end of this function, right after the
        // pipeline that consumed them is created.
        let vert_module = ShaderModule::new(&this.device, "vertex", &shaders.vertex)?;
        let frag_module = ShaderModule::new(&this.device, "fragment", &shaders.fragment)?;

        // No descriptor sets, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        this.layout = unsafe { this.device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(RenderError::PipelineCreationFailed)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module.module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module.module)
                .name(c"main"),
        ];

        // Vertex data lives in the shader
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [desc.viewport()];
        let scissors = [desc.scissor()];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(this.layout)
            .render_pass(this.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            this.device.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, result)| RenderError::PipelineCreationFailed(result))?;
        this.pipeline = pipelines[0];

        log::debug!(
            "Created graphics pipeline for {}x{} {:?}",
            desc.extent.width,
            desc.extent.height,
            desc.color_format
        );

        drop(frag_module);
        drop(vert_module);
        Ok(this)
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(width: u32, height: u32) -> PipelineDesc {
        PipelineDesc {
            color_format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D { width, height },
        }
    }

    #[test]
    fn viewport_and_scissor_cover_the_extent() {
        let desc = desc(800, 600);
        let viewport = desc.viewport();
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));

        let scissor = desc.scissor();
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn attachment_clears_and_ends_presentable() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn rasterizer_culls_back_faces_of_clockwise_triangles() {
        let state = rasterization_state();
        assert_eq!(state.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(state.line_width, 1.0);
    }

    #[test]
    fn blending_is_disabled_with_full_write_mask() {
        let blend = color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn resize_keeps_the_attachment_format() {
        let before = desc(800, 600);
        let after = PipelineDesc {
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..before
        };

        assert_eq!(before.color_format, after.color_format);
        assert_ne!(before.viewport().width, after.viewport().width);
    }
}
