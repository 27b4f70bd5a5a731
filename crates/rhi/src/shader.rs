//! SPIR-V loading and shader module lifetime.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use ash::vk;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::shader::Shader;
//!
//! # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
//! let shader = Shader::from_spirv_file(
//!     device,
//!     Path::new("shaders/spirv/raytrace.comp.spv"),
//!     vk::ShaderStageFlags::COMPUTE,
//! )?;
//! let _stage = shader.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl Shader {
    /// Loads a compiled SPIR-V module from disk. The entry point is `main`.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: vk::ShaderStageFlags,
    ) -> RhiResult<Self> {
        debug!("Loading {:?} shader from {}", stage, path.display());

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_spirv_bytes(device, &bytes, stage)
    }

    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> RhiResult<Self> {
        let code = decode_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        info!("Created {:?} shader module ({} words)", stage, code.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(c"main")
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {:?} shader module", self.stage);
    }
}

/// Decodes SPIR-V bytes into words, rejecting anything that is not a module.
pub fn decode_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RhiError::ShaderError(format!("Invalid SPIR-V: {}", e)))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(RhiError::ShaderError(format!(
            "Invalid SPIR-V magic {:#010x}",
            other
        ))),
        None => Err(RhiError::ShaderError("Empty SPIR-V module".to_string())),
    }
}
