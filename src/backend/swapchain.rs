// Swapchain - Window presentation
//
// Presentation parameters are derived by pure functions from what the surface
// reports; `Swapchain` only turns a finished `SwapchainConfig` into handles.
// On invalidation the whole swapchain is dropped and rebuilt, never patched.

use super::probe::{QueueFamilies, SwapchainSupport};
use super::VulkanDevice;
use crate::error::{RenderError, Result};
use ash::vk;
use std::sync::Arc;

/// Format + color space used whenever the surface offers it.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surface format selection.
///
/// A single `UNDEFINED` entry means the surface has no preference. Otherwise
/// the preferred pair wins, then the first reported entry.
pub fn choose_swap_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return PREFERRED_SURFACE_FORMAT;
        }
    }

    formats
        .iter()
        .copied()
        .find(|f| *f == PREFERRED_SURFACE_FORMAT)
        .or_else(|| formats.first().copied())
        .unwrap_or(PREFERRED_SURFACE_FORMAT)
}

/// Present mode selection.
///
/// MAILBOX: no tearing, lowest latency, returned as soon as it is seen
/// IMMEDIATE: may tear, used when mailbox is absent
/// FIFO: vsync, guaranteed available
pub fn choose_swap_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    let mut best = vk::PresentModeKHR::FIFO;

    for &mode in modes {
        if mode == vk::PresentModeKHR::MAILBOX {
            return mode;
        }
        if mode == vk::PresentModeKHR::IMMEDIATE {
            best = mode;
        }
    }

    best
}

/// Extent selection. `current_extent.width == u32::MAX` means the surface lets
/// us pick; anything else is dictated by the surface and used as is.
pub fn choose_swap_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image more than the minimum, capped by the maximum (0 means no cap).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Every parameter of a swapchain, decided before any handle exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    /// Families sharing the images; empty in exclusive mode.
    pub queue_family_indices: Vec<u32>,
}

impl SwapchainConfig {
    pub fn derive(
        support: &SwapchainSupport,
        window_extent: vk::Extent2D,
        families: &QueueFamilies,
    ) -> Self {
        let capabilities = &support.capabilities;

        // Exclusive ownership avoids queue transfers when one family does both jobs.
        let (sharing_mode, queue_family_indices) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, families.unique())
        };

        Self {
            surface_format: choose_swap_surface_format(&support.formats),
            present_mode: choose_swap_present_mode(&support.present_modes),
            extent: choose_swap_extent(capabilities, window_extent),
            image_count: choose_image_count(capabilities),
            pre_transform: capabilities.current_transform,
            sharing_mode,
            queue_family_indices,
        }
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }
}

/// Result of asking for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    /// No image was acquired; the swapchain must be rebuilt.
    OutOfDate,
}

/// Result of a successful present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub config: SwapchainConfig,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, config: SwapchainConfig) -> Result<Self> {
        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.present_mode,
            config.image_count
        );

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.context.surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(config.sharing_mode)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true);
        if config.sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&config.queue_family_indices);
        }

        let swapchain = unsafe {
            device
                .swapchain_loader
                .create_swapchain(&create_info, None)
        }
        .map_err(RenderError::SwapchainCreationFailed)?;

        // From here on, Drop cleans up whatever exists if a later step fails.
        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            config,
            device,
        };

        this.images = unsafe { this.device.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(RenderError::SwapchainCreationFailed)?;
        log::info!("Created swapchain with {} images", this.images.len());

        this.create_image_views()?;
        Ok(this)
    }

    /// One 2D color view per image, identity swizzle, one mip level, one layer.
    fn create_image_views(&mut self) -> Result<()> {
        for (index, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.config.surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .map_err(|result| RenderError::ImageViewCreationFailed { index, result })?;
            self.image_views.push(view);
        }
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn format(&self) -> vk::Format {
        self.config.format()
    }

    /// Acquire next image for rendering. Blocks until an image is free.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::vulkan("image acquisition")(e)),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RenderError::vulkan("presentation")(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}
