// Synchronization primitives
//
// One semaphore pair orders acquire -> submit -> present on the GPU. The
// optional fence lets the host wait for the previous submission before the
// pair is reused. None of this is rebuilt on swapchain recreation.

use super::VulkanDevice;
use crate::error::{RenderError, Result};
use ash::vk;
use std::sync::Arc;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: Option<vk::Fence>,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>, with_fence: bool) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first frame does not wait
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut this = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: None,
            device,
        };

        unsafe {
            this.image_available = this
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::SyncCreationFailed)?;
            this.render_finished = this
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::SyncCreationFailed)?;
            if with_fence {
                this.in_flight = Some(
                    this.device
                        .device
                        .create_fence(&fence_info, None)
                        .map_err(RenderError::SyncCreationFailed)?,
                );
            }
        }

        Ok(this)
    }

    /// Block until the last submission guarded by the fence has finished.
    pub fn wait_previous(&self) -> Result<()> {
        if let Some(fence) = self.in_flight {
            unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
                .map_err(RenderError::vulkan("fence wait"))?;
        }
        Ok(())
    }

    /// Unsignal the fence right before it is handed to a submission.
    /// Returns the fence to submit with, or a null fence.
    pub fn arm(&self) -> Result<vk::Fence> {
        match self.in_flight {
            Some(fence) => {
                unsafe { self.device.device.reset_fences(&[fence]) }
                    .map_err(RenderError::vulkan("fence reset"))?;
                Ok(fence)
            }
            None => Ok(vk::Fence::null()),
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_semaphore(self.image_available, None);
            self.device
                .device
                .destroy_semaphore(self.render_finished, None);
            if let Some(fence) = self.in_flight {
                self.device.device.destroy_fence(fence, None);
            }
        }
    }
}
