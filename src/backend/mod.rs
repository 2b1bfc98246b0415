// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash. Every handle is owned by exactly one
// struct whose Drop releases it; owners hold the device through an Arc so
// the device always outlives them.

pub mod debug;
pub mod device;
pub mod frame;
pub mod pipeline;
pub mod probe;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
