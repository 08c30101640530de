//! Vertex formats and input layout descriptions.
//!
//! Layouts are plain hashable values so they can participate in pipeline
//! cache keys; conversion to the `vk::VertexInput*` structs happens only
//! when a pipeline is actually built.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Component format of a single vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    /// Size of one attribute of this format, in bytes.
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }

    /// The matching Vulkan format.
    pub const fn to_vk(self) -> vk::Format {
        match self {
            VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
            VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

/// One attribute within a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Component format.
    pub format: VertexFormat,
    /// Byte offset from the start of the vertex.
    pub offset: u32,
}

/// Layout of one bound vertex buffer.
///
/// Part of the pipeline cache key: two meshes with the same attribute
/// layout share a pipeline, two with different strides or offsets do not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    /// Bytes between consecutive vertices.
    pub stride: u32,
    /// Attributes read from this buffer.
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    /// Builds the Vulkan binding description for binding index `binding`.
    pub fn binding_description(&self, binding: u32) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Builds the Vulkan attribute descriptions for binding index `binding`.
    pub fn attribute_descriptions(&self, binding: u32) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                binding,
                location: attr.location,
                format: attr.format.to_vk(),
                offset: attr.offset,
            })
            .collect()
    }
}

/// Vertex format used by the built-in demo geometry.
///
/// Layout (`#[repr(C)]`):
/// - offset 0: position (12 bytes), shader location 0
/// - offset 12: color (12 bytes), shader location 1
/// - offset 24: uv (8 bytes), shader location 2
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }

    /// The input layout matching this vertex type.
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            stride: std::mem::size_of::<Self>() as u32,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x2,
                    offset: 24,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_vertex_size_and_offsets() {
        use std::mem::offset_of;

        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, color), 12);
        assert_eq!(offset_of!(Vertex, uv), 24);
    }

    #[test]
    fn test_vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.attributes.len(), 3);
        assert_eq!(layout.attributes[2].offset, 24);
        assert_eq!(layout.attributes[2].format, VertexFormat::Float32x2);
    }

    #[test]
    fn test_binding_description() {
        let layout = Vertex::layout();
        let binding = layout.binding_description(0);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 32);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_descriptions_map_formats() {
        let layout = Vertex::layout();
        let attrs = layout.attribute_descriptions(0);
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[2].location, 2);
    }

    #[test]
    fn test_layout_hash_distinguishes_strides() {
        let a = Vertex::layout();
        let mut b = Vertex::layout();
        b.stride += 4;

        assert_ne!(a, b);
        assert_ne!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_layout_hash_distinguishes_offsets() {
        let a = Vertex::layout();
        let mut b = Vertex::layout();
        b.attributes[1].offset = 16;

        assert_ne!(a, b);
        assert_ne!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_vertex_pod_cast() {
        let vertex = Vertex::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(0.5, 0.6, 0.7),
            Vec2::new(0.25, 0.75),
        );

        let bytes: &[u8] = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 32);

        let back: &Vertex = bytemuck::from_bytes(bytes);
        assert_eq!(back.position, vertex.position);
        assert_eq!(back.uv, vertex.uv);
    }
}
