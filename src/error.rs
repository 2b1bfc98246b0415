// Renderer errors - one variant per fatal failure
//
// Transient swapchain states (out of date, suboptimal) are not errors; they
// come back as outcome enums from acquire and present.

use ash::vk;
use thiserror::Error;

/// Coarse classification of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The machine cannot run the renderer: no usable GPU, missing layer or extension.
    UnsupportedEnvironment,
    /// An object-creation call reported non-success.
    ResourceCreation,
    /// A per-frame call failed with something other than an out-of-date surface.
    Runtime,
}

/// Every fatal renderer error.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to load the Vulkan library: {0}")]
    LoaderUnavailable(String),

    #[error("Required validation layer not supported: {0}")]
    ValidationLayerUnsupported(String),

    #[error("Required instance extension not supported: {0}")]
    InstanceExtensionUnsupported(String),

    #[error("Failed to create instance: {0}")]
    InstanceCreationFailed(vk::Result),

    #[error("Failed to create window surface: {0}")]
    SurfaceCreationFailed(String),

    #[error("Failed to find GPUs with Vulkan support")]
    NoGpuFound,

    #[error("Failed to find a suitable GPU")]
    NoSuitableGpu,

    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(vk::Result),

    #[error("Failed to create image view {index}: {result}")]
    ImageViewCreationFailed { index: usize, result: vk::Result },

    #[error("Failed to create render pass: {0}")]
    RenderPassCreationFailed(vk::Result),

    #[error("Failed to load shader bytecode {path}: {reason}")]
    ShaderLoadFailed { path: String, reason: String },

    #[error("Failed to create {stage} shader module: {result}")]
    ShaderModuleCreationFailed {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("Failed to create graphics pipeline: {0}")]
    PipelineCreationFailed(vk::Result),

    #[error("Failed to create framebuffer {index}: {result}")]
    FramebufferCreationFailed { index: usize, result: vk::Result },

    #[error("Failed to create command pool: {0}")]
    CommandPoolCreationFailed(vk::Result),

    #[error("Failed to allocate command buffers: {0}")]
    CommandBufferAllocationFailed(vk::Result),

    #[error("Failed to record command buffer {index}: {result}")]
    CommandRecordingFailed { index: usize, result: vk::Result },

    #[error("Failed to create synchronization objects: {0}")]
    SyncCreationFailed(vk::Result),

    #[error("No recorded command buffer for swapchain image {image_index}")]
    MissingCommandBuffer { image_index: u32 },

    #[error("Vulkan error during {operation}: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoaderUnavailable(_)
            | Self::ValidationLayerUnsupported(_)
            | Self::InstanceExtensionUnsupported(_)
            | Self::NoGpuFound
            | Self::NoSuitableGpu => ErrorKind::UnsupportedEnvironment,
            Self::Vulkan { .. } | Self::MissingCommandBuffer { .. } => ErrorKind::Runtime,
            _ => ErrorKind::ResourceCreation,
        }
    }

    /// Adapter for `map_err` on calls whose failure is a runtime error.
    pub fn vulkan(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { operation, result }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
