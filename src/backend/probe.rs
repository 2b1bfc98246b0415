// Capability probing - can this GPU drive our surface?
//
// Every question the selector asks about a physical device goes through the
// `DeviceQuery` trait, so the selection rules run unchanged against the
// driver (`SurfaceProbe`) or an in-memory device list.

use ash::prelude::VkResult;
use ash::vk;
use std::ffi::{CStr, CString};
use thiserror::Error;

/// Device extensions every candidate must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Read-only view of the physical devices visible to an instance + surface.
pub trait DeviceQuery {
    type Device: Copy;

    fn device_name(&self, device: Self::Device) -> String;
    fn queue_families(&self, device: Self::Device) -> Vec<vk::QueueFamilyProperties>;
    fn supports_present(&self, device: Self::Device, family: u32) -> VkResult<bool>;
    fn extension_names(&self, device: Self::Device) -> VkResult<Vec<CString>>;
    fn surface_capabilities(&self, device: Self::Device) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self, device: Self::Device) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self, device: Self::Device) -> VkResult<Vec<vk::PresentModeKHR>>;
}

/// Queue family roles discovered on a device. Both may name the same family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Complete queue family assignment of the selected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// One graphics queue family serves presentation too.
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families to request queues from, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// What a surface supports on a given device. Empty lists are valid results.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Why a device was passed over.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unsuitable {
    #[error("no graphics queue family")]
    NoGraphicsQueue,
    #[error("no queue family can present to the surface")]
    NoPresentQueue,
    #[error("missing device extension {0}")]
    MissingExtension(String),
    #[error("surface reports no formats or no present modes")]
    InadequateSwapchain,
}

/// First graphics-capable family and first present-capable family, in
/// enumeration order. Stops as soon as both roles are filled.
pub fn find_queue_families<Q: DeviceQuery>(query: &Q, device: Q::Device) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in query.queue_families(device).iter().enumerate() {
        let index = index as u32;
        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }

        if indices.present.is_none() {
            let supported = query.supports_present(device, index).unwrap_or_else(|e| {
                log::warn!("Present support query failed for family {}: {}", index, e);
                false
            });
            if supported {
                indices.present = Some(index);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// First name in `required` missing from `available`, compared exactly
/// (case included).
pub fn first_missing<'a>(required: &[&'a CStr], available: &[CString]) -> Option<&'a CStr> {
    required
        .iter()
        .copied()
        .find(|name| !available.iter().any(|candidate| candidate.as_c_str() == *name))
}

/// Returns the first required extension the device does not expose.
pub fn missing_device_extension<Q: DeviceQuery>(query: &Q, device: Q::Device) -> Option<&'static CStr> {
    let available = query.extension_names(device).unwrap_or_else(|e| {
        log::warn!("Extension enumeration failed: {}", e);
        Vec::new()
    });

    first_missing(REQUIRED_DEVICE_EXTENSIONS, &available)
}

/// Every required device extension is exposed, or the first one that is not.
pub fn check_device_extension_support<Q: DeviceQuery>(
    query: &Q,
    device: Q::Device,
) -> Result<(), Unsuitable> {
    match missing_device_extension(query, device) {
        Some(missing) => Err(Unsuitable::MissingExtension(
            missing.to_string_lossy().into_owned(),
        )),
        None => Ok(()),
    }
}

/// Always returns a descriptor; failed queries show up as empty lists so the
/// suitability check rejects the device.
pub fn query_swapchain_support<Q: DeviceQuery>(query: &Q, device: Q::Device) -> SwapchainSupport {
    SwapchainSupport {
        capabilities: query.surface_capabilities(device).unwrap_or_default(),
        formats: query.surface_formats(device).unwrap_or_default(),
        present_modes: query.present_modes(device).unwrap_or_default(),
    }
}

/// Suitability: `Ok` only when all three checks pass. Complete queue
/// families, required extensions, and a non-empty format and present mode list.
pub fn check_device_suitability<Q: DeviceQuery>(
    query: &Q,
    device: Q::Device,
) -> Result<(), Unsuitable> {
    let indices = find_queue_families(query, device);
    if indices.graphics.is_none() {
        return Err(Unsuitable::NoGraphicsQueue);
    }
    if indices.present.is_none() {
        return Err(Unsuitable::NoPresentQueue);
    }

    check_device_extension_support(query, device)?;

    if !query_swapchain_support(query, device).is_adequate() {
        return Err(Unsuitable::InadequateSwapchain);
    }

    Ok(())
}

/// `DeviceQuery` backed by the driver, scoped to one surface.
pub struct SurfaceProbe<'a> {
    pub instance: &'a ash::Instance,
    pub surface_loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl DeviceQuery for SurfaceProbe<'_> {
    type Device = vk::PhysicalDevice;

    fn device_name(&self, device: vk::PhysicalDevice) -> String {
        let properties = unsafe { self.instance.get_physical_device_properties(device) };
        properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed device>".to_string())
    }

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(device)
        }
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(device, family, self.surface)
        }
    }

    fn extension_names(&self, device: vk::PhysicalDevice) -> VkResult<Vec<CString>> {
        let properties = unsafe { self.instance.enumerate_device_extension_properties(device)? };
        Ok(properties
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
            .collect())
    }

    fn surface_capabilities(
        &self,
        device: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(device, self.surface)
        }
    }

    fn surface_formats(&self, device: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(device, self.surface)
        }
    }

    fn present_modes(&self, device: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(device, self.surface)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// One fake GPU: queue families with their present support, extensions,
    /// and surface support.
    #[derive(Debug, Clone)]
    pub struct MockDevice {
        pub name: &'static str,
        pub families: Vec<(vk::QueueFlags, u32, bool)>,
        pub extensions: Vec<CString>,
        pub support: SwapchainSupport,
    }

    impl MockDevice {
        /// A device with one combined graphics + present family and full support.
        pub fn capable(name: &'static str) -> Self {
            Self {
                name,
                families: vec![(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1, true)],
                extensions: vec![ash::khr::swapchain::NAME.to_owned()],
                support: SwapchainSupport {
                    capabilities: vk::SurfaceCapabilitiesKHR {
                        min_image_count: 2,
                        max_image_count: 8,
                        current_extent: vk::Extent2D {
                            width: u32::MAX,
                            height: u32::MAX,
                        },
                        min_image_extent: vk::Extent2D { width: 1, height: 1 },
                        max_image_extent: vk::Extent2D {
                            width: 4096,
                            height: 4096,
                        },
                        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                        ..Default::default()
                    },
                    formats: vec![vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    }],
                    present_modes: vec![vk::PresentModeKHR::FIFO],
                },
            }
        }
    }

    /// Device handles are indices into `devices`.
    #[derive(Debug, Clone, Default)]
    pub struct MockInstance {
        pub devices: Vec<MockDevice>,
    }

    impl MockInstance {
        pub fn handles(&self) -> Vec<usize> {
            (0..self.devices.len()).collect()
        }
    }

    impl DeviceQuery for MockInstance {
        type Device = usize;

        fn device_name(&self, device: usize) -> String {
            self.devices[device].name.to_string()
        }

        fn queue_families(&self, device: usize) -> Vec<vk::QueueFamilyProperties> {
            self.devices[device]
                .families
                .iter()
                .map(|&(queue_flags, queue_count, _)| vk::QueueFamilyProperties {
                    queue_flags,
                    queue_count,
                    ..Default::default()
                })
                .collect()
        }

        fn supports_present(&self, device: usize, family: u32) -> VkResult<bool> {
            Ok(self.devices[device].families[family as usize].2)
        }

        fn extension_names(&self, device: usize) -> VkResult<Vec<CString>> {
            Ok(self.devices[device].extensions.clone())
        }

        fn surface_capabilities(&self, device: usize) -> VkResult<vk::SurfaceCapabilitiesKHR> {
            Ok(self.devices[device].support.capabilities)
        }

        fn surface_formats(&self, device: usize) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
            Ok(self.devices[device].support.formats.clone())
        }

        fn present_modes(&self, device: usize) -> VkResult<Vec<vk::PresentModeKHR>> {
            Ok(self.devices[device].support.present_modes.clone())
        }
    }
}
