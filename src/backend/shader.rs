// Shader module loading and management
//
// Vulkan consumes SPIR-V as 32-bit words. Bytecode is read once at startup
// and kept as words so the pipeline can be rebuilt on every recreation.

use super::VulkanDevice;
use crate::error::{RenderError, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// Compiled vertex + fragment bytecode for the triangle pipeline.
#[derive(Debug, Clone)]
pub struct ShaderBytecode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBytecode {
    pub fn load(vertex: &Path, fragment: &Path) -> Result<Self> {
        Ok(Self {
            vertex: load_spirv(vertex)?,
            fragment: load_spirv(fragment)?,
        })
    }
}

/// Read a SPIR-V file into properly aligned words.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| RenderError::ShaderLoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    spirv_words(&bytes).map_err(|reason| RenderError::ShaderLoadFailed {
        path: path.display().to_string(),
        reason,
    })
}

/// Re-align raw bytes to words; rejects sizes that are not a multiple of 4.
pub fn spirv_words(bytes: &[u8]) -> std::result::Result<Vec<u32>, String> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| e.to_string())
}

/// Shader module that only lives until the pipeline using it is built.
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a VulkanDevice,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a VulkanDevice, stage: &'static str, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(|result| RenderError::ShaderModuleCreationFailed { stage, result })?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}
