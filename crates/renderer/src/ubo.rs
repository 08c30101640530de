//! Uniform buffer layouts shared with the shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Per-frame scene uniforms, std140-compatible.
///
/// Must match the uniform block at binding 0 in `shaders/mesh.vert`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneUniform {
    /// Combined model-view-projection matrix.
    pub mvp: Mat4,
}

impl SceneUniform {
    /// Builds the demo transform: a quad spinning around the Y axis,
    /// viewed from a fixed camera.
    pub fn spinning_quad(elapsed_secs: f32, aspect_ratio: f32) -> Self {
        let model = Mat4::from_rotation_y(elapsed_secs * 0.8);
        let view = Mat4::look_at_rh(
            Vec3::new(0.0, 0.8, 2.5),
            Vec3::ZERO,
            Vec3::Y,
        );
        let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect_ratio, 0.1, 100.0);
        // Vulkan clip space has Y pointing down
        projection.y_axis.y *= -1.0;

        Self {
            mvp: projection * view * model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_uniform_size() {
        // One mat4, 16 floats
        assert_eq!(std::mem::size_of::<SceneUniform>(), 64);
    }

    #[test]
    fn test_spinning_quad_is_finite() {
        let ubo = SceneUniform::spinning_quad(1.5, 16.0 / 9.0);
        assert!(ubo.mvp.to_cols_array().iter().all(|v| v.is_finite()));
    }
}
