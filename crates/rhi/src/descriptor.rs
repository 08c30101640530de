//! Descriptor pools, sets, and the builder that wires them up.
//!
//! A [`DescriptorSetBuilder`] collects binding declarations, resolves the
//! set layout through the resource cache, allocates the set, creates the
//! backing uniform buffers, and performs one batched descriptor update.
//! After `build`, the only mutation allowed is
//! [`DescriptorSet::set_uniform`], which writes into persistently mapped
//! memory and never touches the descriptor itself.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::buffer::Buffer;
use crate::cache::ResourceCache;
use crate::device::Device;
use crate::error::{GfxError, GfxResult};
use crate::reclaim::{DeferredReclaimer, Garbage};

/// What a binding holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl BindingKind {
    pub const fn to_vk(self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One binding in a descriptor set layout.
///
/// The full binding list is the cache key for descriptor set layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingDesc {
    pub binding: u32,
    pub kind: BindingKind,
    pub stages: vk::ShaderStageFlags,
}

impl BindingDesc {
    pub fn to_vk(self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.kind.to_vk())
            .descriptor_count(1)
            .stage_flags(self.stages)
    }
}

/// Descriptor pool sized for the renderer's modest needs.
///
/// Created with `FREE_DESCRIPTOR_SET` so individual sets can be returned
/// through the deferred reclaimer when their owners drop.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    const MAX_SETS: u32 = 256;

    pub fn new(device: Arc<Device>) -> GfxResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: Self::MAX_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: Self::MAX_SETS,
            },
        ];

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(Self::MAX_SETS)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!("Created descriptor pool ({} max sets)", Self::MAX_SETS);

        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum BindingRequest {
    Uniform {
        binding: u32,
        stages: vk::ShaderStageFlags,
        size: u64,
    },
    Sampler {
        binding: u32,
        stages: vk::ShaderStageFlags,
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

/// Collects bindings and produces an immutable [`DescriptorSet`].
pub struct DescriptorSetBuilder {
    device: Arc<Device>,
    reclaimer: Arc<DeferredReclaimer>,
    pool: vk::DescriptorPool,
    requests: Vec<BindingRequest>,
    label: String,
}

impl DescriptorSetBuilder {
    pub fn new(
        device: Arc<Device>,
        reclaimer: Arc<DeferredReclaimer>,
        pool: &DescriptorPool,
        label: impl Into<String>,
    ) -> Self {
        Self {
            device,
            reclaimer,
            pool: pool.handle(),
            requests: Vec::new(),
            label: label.into(),
        }
    }

    /// Declares a uniform buffer binding sized for `T`.
    ///
    /// The buffer itself is created in [`build`](Self::build), host-visible
    /// and persistently mapped, and owned by the resulting set.
    pub fn add_uniform<T: Pod>(mut self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.requests.push(BindingRequest::Uniform {
            binding,
            stages,
            size: std::mem::size_of::<T>() as u64,
        });
        self
    }

    /// Declares a combined image sampler binding.
    ///
    /// The view and sampler are borrowed, not owned; the caller must keep
    /// them alive for the set's lifetime.
    pub fn add_sampler(
        mut self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        self.requests.push(BindingRequest::Sampler {
            binding,
            stages,
            view,
            sampler,
        });
        self
    }

    /// Resolves the layout through the cache, allocates the set, creates
    /// the uniform buffers, and writes every binding in one update.
    ///
    /// # Errors
    ///
    /// Returns an error if two requests use the same binding index, the
    /// pool is exhausted, or buffer creation fails.
    pub fn build(self, cache: &ResourceCache) -> GfxResult<DescriptorSet> {
        let mut bindings: Vec<BindingDesc> = self
            .requests
            .iter()
            .map(|request| match request {
                BindingRequest::Uniform {
                    binding, stages, ..
                } => BindingDesc {
                    binding: *binding,
                    kind: BindingKind::UniformBuffer,
                    stages: *stages,
                },
                BindingRequest::Sampler {
                    binding, stages, ..
                } => BindingDesc {
                    binding: *binding,
                    kind: BindingKind::CombinedImageSampler,
                    stages: *stages,
                },
            })
            .collect();
        bindings.sort_by_key(|b| b.binding);

        if bindings.windows(2).any(|pair| pair[0].binding == pair[1].binding) {
            return Err(GfxError::InvalidArgument(format!(
                "descriptor set '{}' declares a binding index twice",
                self.label
            )));
        }

        let layout = cache.descriptor_set_layout(&bindings)?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let set = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)?[0] };

        // Create the uniform buffers, keyed by binding index.
        let mut uniforms = Vec::new();
        for request in &self.requests {
            if let BindingRequest::Uniform { binding, size, .. } = request {
                let buffer = Buffer::new(
                    self.device.clone(),
                    self.reclaimer.clone(),
                    *size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("{}:u{}", self.label, binding),
                )?;
                uniforms.push((*binding, buffer));
            }
        }

        // One batched update covering every binding. The info structs must
        // outlive the writes, hence the two-pass construction.
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = uniforms
            .iter()
            .map(|(_, buffer)| {
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer.handle())
                    .offset(0)
                    .range(buffer.size())
            })
            .collect();

        let image_infos: Vec<(u32, vk::DescriptorImageInfo)> = self
            .requests
            .iter()
            .filter_map(|request| match request {
                BindingRequest::Sampler {
                    binding,
                    view,
                    sampler,
                    ..
                } => Some((
                    *binding,
                    vk::DescriptorImageInfo::default()
                        .image_view(*view)
                        .sampler(*sampler)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                )),
                _ => None,
            })
            .collect();

        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();
        for ((binding, _), info) in uniforms.iter().zip(buffer_infos.iter()) {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }
        for (binding, info) in &image_infos {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }

        unsafe {
            self.device.handle().update_descriptor_sets(&writes, &[]);
        }

        debug!(
            "Built descriptor set '{}' ({} binding(s))",
            self.label,
            bindings.len()
        );

        Ok(DescriptorSet {
            reclaimer: self.reclaimer,
            pool: self.pool,
            set,
            layout,
            uniforms,
        })
    }
}

/// An allocated, fully written descriptor set.
///
/// Owns the uniform buffers behind its buffer bindings. The layout handle
/// is shared with the cache and not destroyed here.
pub struct DescriptorSet {
    reclaimer: Arc<DeferredReclaimer>,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    layout: vk::DescriptorSetLayout,
    uniforms: Vec<(u32, Buffer)>,
}

impl DescriptorSet {
    /// Returns the Vulkan descriptor set handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Returns the set's layout handle.
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Writes `value` into the uniform buffer at `binding`.
    ///
    /// # Errors
    ///
    /// Returns an error if `binding` is not a uniform binding of this set
    /// or `T` does not match the declared size.
    pub fn set_uniform<T: Pod>(&mut self, binding: u32, value: &T) -> GfxResult<()> {
        let (_, buffer) = self
            .uniforms
            .iter_mut()
            .find(|(b, _)| *b == binding)
            .ok_or_else(|| {
                GfxError::InvalidArgument(format!("no uniform buffer at binding {}", binding))
            })?;

        let bytes = bytemuck::bytes_of(value);
        if bytes.len() as u64 != buffer.size() {
            return Err(GfxError::InvalidArgument(format!(
                "uniform at binding {} is {} bytes, write is {} bytes",
                binding,
                buffer.size(),
                bytes.len()
            )));
        }

        buffer.write_bytes(0, bytes)
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // The uniform buffers defer themselves through their own Drop.
        self.reclaimer.discard(Garbage::DescriptorSet {
            pool: self.pool,
            set: self.set,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_kind_maps_to_vk() {
        assert_eq!(
            BindingKind::UniformBuffer.to_vk(),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            BindingKind::CombinedImageSampler.to_vk(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_binding_desc_hash_distinguishes_stages() {
        use std::collections::HashSet;

        let vertex_only = BindingDesc {
            binding: 0,
            kind: BindingKind::UniformBuffer,
            stages: vk::ShaderStageFlags::VERTEX,
        };
        let both = BindingDesc {
            binding: 0,
            kind: BindingKind::UniformBuffer,
            stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        };

        let set: HashSet<BindingDesc> = [vertex_only, both].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
