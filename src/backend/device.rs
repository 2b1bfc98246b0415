// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layer and extension checks
// - Window surface creation
// - Physical device selection (first suitable device, enumeration order)
// - Logical device + graphics/present queue creation

use super::debug::{DebugMessenger, DebugSink, VALIDATION_LAYER};
use super::probe::{
    self, first_missing, DeviceQuery, QueueFamilies, SurfaceProbe, REQUIRED_DEVICE_EXTENSIONS,
};
use crate::error::{RenderError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

/// Instance-level handles: loader, instance, diagnostics and the window surface.
///
/// Dropping destroys them surface first, instance last. Everything created
/// from the instance must already be gone.
pub struct InstanceContext {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug_messenger: Option<DebugMessenger>,
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub properties: vk::PhysicalDeviceProperties,

    // Dropped after `device` is destroyed in `Drop::drop`.
    pub context: InstanceContext,
}

impl VulkanDevice {
    /// Create instance, surface and logical device for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `window` - Window providing the native handles for the surface
    /// * `diagnostics` - Validation message sink; `None` disables validation
    pub fn new<W>(app_name: &str, window: &W, diagnostics: Option<DebugSink>) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);
        let enable_validation = diagnostics.is_some();

        let display_handle = window
            .display_handle()
            .map_err(|e| RenderError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| RenderError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| RenderError::LoaderUnavailable(e.to_string()))?;

        let instance =
            Self::create_instance(&entry, app_name, display_handle, enable_validation)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let mut context = InstanceContext {
            entry,
            instance,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
            debug_messenger: None,
        };

        if let Some(sink) = diagnostics {
            context.debug_messenger = Some(DebugMessenger::new(
                &context.entry,
                &context.instance,
                sink,
            )?);
        }

        context.surface = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .map_err(|e| RenderError::SurfaceCreationFailed(e.to_string()))?;

        let probe = SurfaceProbe {
            instance: &context.instance,
            surface_loader: &context.surface_loader,
            surface: context.surface,
        };
        let candidates = unsafe { context.instance.enumerate_physical_devices() }
            .map_err(RenderError::vulkan("physical device enumeration"))?;
        let physical_device = pick_physical_device(&probe, &candidates)?;
        let queue_families = probe::find_queue_families(&probe, physical_device)
            .resolve()
            .ok_or(RenderError::NoSuitableGpu)?;

        let properties = unsafe {
            context
                .instance
                .get_physical_device_properties(physical_device)
        };
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let device = create_logical_device(
            &context.instance,
            physical_device,
            &queue_families,
            enable_validation,
        )?;

        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(queue_families.graphics, 0),
                device.get_device_queue(queue_families.present, 0),
            )
        };
        log::debug!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        let swapchain_loader = ash::khr::swapchain::Device::new(&context.instance, &device);

        Ok(Arc::new(Self {
            device,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            swapchain_loader,
            properties,
            context,
        }))
    }

    fn create_instance(
        entry: &ash::Entry,
        app_name: &str,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_else(|_| c"Hello Triangle".to_owned());

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Platform surface extensions, plus debug utils for diagnostics
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .map_err(|e| RenderError::InstanceExtensionUnsupported(e.to_string()))?
                .to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let required_extensions: Vec<&CStr> = extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        check_instance_extension_support(entry, &required_extensions)?;

        let layer_names: Vec<*const c_char> = if enable_validation {
            check_validation_layer_support(entry, &[VALIDATION_LAYER])?;
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .map_err(RenderError::InstanceCreationFailed)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RenderError::vulkan("device wait idle"))
    }

    /// Human-readable name of the selected GPU.
    pub fn name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // The instance context is dropped right after this, in field order.
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// Select the first suitable device in enumeration order.
///
/// No scoring: when several devices qualify, the one
/// the driver lists first wins.
pub fn pick_physical_device<Q: DeviceQuery>(query: &Q, devices: &[Q::Device]) -> Result<Q::Device> {
    if devices.is_empty() {
        return Err(RenderError::NoGpuFound);
    }

    for &device in devices {
        let name = query.device_name(device);
        match probe::check_device_suitability(query, device) {
            Ok(()) => {
                log::info!("Selected GPU: {}", name);
                return Ok(device);
            }
            Err(reason) => log::debug!("Skipping GPU `{}`: {}", name, reason),
        }
    }

    Err(RenderError::NoSuitableGpu)
}

/// One queue per distinct family, all at priority 1.0.
pub fn queue_create_infos<'a>(
    families: &QueueFamilies,
    priorities: &'a [f32],
) -> Vec<vk::DeviceQueueCreateInfo<'a>> {
    families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(priorities)
        })
        .collect()
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilies,
    enable_validation: bool,
) -> Result<ash::Device> {
    let priorities = [1.0];
    let queue_infos = queue_create_infos(families, &priorities);

    let extensions: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    // Device layers are ignored by modern loaders but still honored by old ones.
    let layer_names: Vec<*const c_char> = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    #[allow(deprecated)]
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(RenderError::DeviceCreationFailed)
}

fn log_name_check(kind: &str, required: &[&CStr], available: &[CString]) {
    log::debug!("Supported {}:", kind);
    for name in available {
        log::debug!("\t{}", name.to_string_lossy());
    }
    log::debug!("Checking required {}:", kind);
    for name in required {
        let found = available.iter().any(|candidate| candidate.as_c_str() == *name);
        log::debug!(
            "\t{} -> {}",
            name.to_string_lossy(),
            if found { "Found!" } else { "Not supported!" }
        );
    }
}

fn check_validation_layer_support(entry: &ash::Entry, required: &[&CStr]) -> Result<()> {
    let available: Vec<CString> = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(RenderError::vulkan("layer enumeration"))?
        .iter()
        .filter_map(|layer| layer.layer_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    log_name_check("validation layers", required, &available);
    match first_missing(required, &available) {
        Some(missing) => Err(RenderError::ValidationLayerUnsupported(
            missing.to_string_lossy().into_owned(),
        )),
        None => Ok(()),
    }
}

fn check_instance_extension_support(entry: &ash::Entry, required: &[&CStr]) -> Result<()> {
    let available: Vec<CString> = unsafe { entry.enumerate_instance_extension_properties(None) }
        .map_err(RenderError::vulkan("instance extension enumeration"))?
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    log_name_check("instance extensions", required, &available);
    match first_missing(required, &available) {
        Some(missing) => Err(RenderError::InstanceExtensionUnsupported(
            missing.to_string_lossy().into_owned(),
        )),
        None => Ok(()),
    }
}
