//! SPIR-V shader module loading.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{GfxError, GfxResult};

/// Stable identity of a shader, independent of the `vk::ShaderModule`
/// handle.
///
/// Used in pipeline cache keys: two pipelines built from the same shader
/// source must key identically even across module reloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderId(String);

impl ShaderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A compiled SPIR-V shader module.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    id: ShaderId,
}

impl ShaderModule {
    /// Creates a shader module from raw SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid SPIR-V (wrong length or
    /// alignment) or module creation fails.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        id: ShaderId,
        bytes: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> GfxResult<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| GfxError::Shader(format!("invalid SPIR-V for '{}': {}", id, e)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("Created shader module '{}' ({:?})", id, stage);

        Ok(Self {
            device,
            module,
            stage,
            id,
        })
    }

    /// Loads a SPIR-V file from disk. The path doubles as the shader's
    /// identity.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: impl AsRef<Path>,
        stage: vk::ShaderStageFlags,
    ) -> GfxResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| GfxError::Shader(format!("failed to read '{}': {}", path.display(), e)))?;

        let id = ShaderId::new(path.to_string_lossy());
        Self::from_spirv_bytes(device, id, &bytes, stage)
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the pipeline stage this module is meant for.
    #[inline]
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    /// Returns the shader's cache identity.
    #[inline]
    pub fn id(&self) -> &ShaderId {
        &self.id
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        // Modules can be destroyed as soon as the pipelines built from them
        // exist, so no deferral is needed here.
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_id_equality_and_hash() {
        use std::collections::HashSet;

        let a = ShaderId::new("shaders/mesh.vert.spv");
        let b = ShaderId::new("shaders/mesh.vert.spv");
        let c = ShaderId::new("shaders/mesh.frag.spv");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<ShaderId> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
