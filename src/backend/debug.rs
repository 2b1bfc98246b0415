// Validation-layer diagnostics
//
// The driver calls back into a plain `extern "system"` function; the sink the
// application injected rides along in the messenger's user-data pointer.

use crate::error::{RenderError, Result};
use ash::vk;
use std::ffi::{c_void, CStr};

/// Validation layer requested when diagnostics are enabled.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Message severity passed to a [`DebugSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Receives every warning and error message the validation layer emits.
pub type DebugSink = Box<dyn Fn(Severity, &str) + Send + Sync>;

/// Sink that forwards to the `log` facade.
pub fn log_sink() -> DebugSink {
    Box::new(|severity: Severity, message: &str| match severity {
        Severity::Error => log::error!("[Vulkan] {}", message),
        Severity::Warning => log::warn!("[Vulkan] {}", message),
    })
}

/// Registered debug messenger. Must be destroyed before its instance.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // Boxed twice so the pointer handed to the driver stays thin and stable.
    _sink: Box<DebugSink>,
}

impl DebugMessenger {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, sink: DebugSink) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let sink = Box::new(sink);
        let user_data = &*sink as *const DebugSink as *mut c_void;

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(user_data);

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(RenderError::vulkan("debug messenger creation"))?;

        Ok(Self {
            loader,
            messenger,
            _sink: sink,
        })
    }

    /// # Safety
    /// The owning instance must still be alive.
    pub unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || p_user_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }

    let sink = &*(p_user_data as *const DebugSink);
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();
    let severity = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Severity::Error
    } else {
        Severity::Warning
    };

    sink(severity, &*message);

    vk::FALSE
}
