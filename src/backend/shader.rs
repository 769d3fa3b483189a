// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. build.rs compiles the GLSL
// sources next to themselves; modules are loaded by name at runtime.

use ash::vk;
use std::path::Path;

use super::device::check;
use crate::error::{GpuError, GpuResult};

/// Load `{dir}/{name}.spv` and create a shader module
pub fn load_shader_module(
    device: &ash::Device,
    dir: &Path,
    name: &str,
) -> GpuResult<vk::ShaderModule> {
    let path = dir.join(format!("{name}.spv"));
    let shader_error = |reason: String| GpuError::Shader {
        name: name.to_string(),
        reason,
    };

    let mut file = std::fs::File::open(&path)
        .map_err(|e| shader_error(format!("opening {}: {e}", path.display())))?;

    // read_spv handles alignment and endianness of the word stream
    let code = ash::util::read_spv(&mut file)
        .map_err(|e| shader_error(format!("reading {}: {e}", path.display())))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    log::debug!("Loaded shader {} ({} words)", name, code.len());
    check("vkCreateShaderModule", unsafe {
        device.create_shader_module(&create_info, None)
    })
}
