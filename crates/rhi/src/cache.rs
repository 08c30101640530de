//! Content-addressed caching of pipelines and descriptor set layouts.
//!
//! Pipelines are keyed by what actually distinguishes them on the GPU:
//! the shader identities, the render-target description, and the vertex
//! buffer layouts. The cache holds [`Weak`] references, so a pipeline's
//! lifetime is governed entirely by the meshes holding `Arc`s to it;
//! dropping the last user releases the pipeline through the deferred
//! reclaimer, and a later request with the same key rebuilds it.
//!
//! Descriptor set layouts are cheap and immortal by comparison, so those
//! are cached strongly by their binding list and destroyed with the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use ash::vk;
use tracing::{debug, info};

use crate::descriptor::BindingDesc;
use crate::device::Device;
use crate::error::GfxResult;
use crate::pipeline::{
    GraphicsPipelineDesc, RenderTargetDesc, build_graphics_pipeline, create_pipeline_layout,
};
use crate::reclaim::{DeferredReclaimer, Garbage};
use crate::shader::{ShaderId, ShaderModule};
use crate::vertex::VertexBufferLayout;

/// Identity of a graphics pipeline.
///
/// Two requests with equal keys receive the same cached pipeline; any
/// field differing yields a distinct one. Polygon mode is absent on
/// purpose: wireframe is a global cache state, not a per-pipeline key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub vertex_shader: ShaderId,
    pub fragment_shader: ShaderId,
    pub targets: RenderTargetDesc,
    pub vertex_layouts: Vec<VertexBufferLayout>,
}

/// A cached pipeline plus everything needed to rebuild it.
///
/// The raw handle sits behind an `RwLock` so the wireframe toggle can swap
/// in a rebuilt pipeline that existing `Arc` holders observe on their next
/// draw. The layout never changes across rebuilds.
pub struct CachedPipeline {
    handle: RwLock<vk::Pipeline>,
    layout: vk::PipelineLayout,
    vertex_shader: Arc<ShaderModule>,
    fragment_shader: Arc<ShaderModule>,
    targets: RenderTargetDesc,
    vertex_layouts: Vec<VertexBufferLayout>,
    reclaimer: Arc<DeferredReclaimer>,
}

impl CachedPipeline {
    /// Returns the current pipeline handle.
    ///
    /// Taken fresh each draw; holding it across a wireframe toggle would
    /// bind a retired pipeline.
    pub fn handle(&self) -> vk::Pipeline {
        *self
            .handle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the pipeline layout.
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Rebuilds the pipeline with a new polygon mode, retiring the old
    /// handle through the reclaimer.
    fn rebuild(&self, device: &Device, polygon_mode: vk::PolygonMode) -> GfxResult<()> {
        let new_handle = build_graphics_pipeline(
            device,
            &GraphicsPipelineDesc {
                vertex_shader: &self.vertex_shader,
                fragment_shader: &self.fragment_shader,
                vertex_layouts: &self.vertex_layouts,
                targets: &self.targets,
                layout: self.layout,
                polygon_mode,
            },
        )?;

        let old_handle = {
            let mut handle = self
                .handle
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *handle, new_handle)
        };
        self.reclaimer.discard(Garbage::Pipeline(old_handle));
        Ok(())
    }
}

impl Drop for CachedPipeline {
    fn drop(&mut self) {
        let handle = *self
            .handle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.reclaimer.discard(Garbage::Pipeline(handle));
        self.reclaimer.discard(Garbage::PipelineLayout(self.layout));
    }
}

/// Polygon mode implied by the cache's global wireframe flag.
fn polygon_mode_for(wireframe: bool) -> vk::PolygonMode {
    if wireframe {
        vk::PolygonMode::LINE
    } else {
        vk::PolygonMode::FILL
    }
}

/// Drops entries whose pipelines no longer have live users.
fn prune_dead_entries<K: Eq + std::hash::Hash, V>(entries: &mut HashMap<K, Weak<V>>) {
    entries.retain(|_, weak| weak.strong_count() > 0);
}

struct CacheState {
    pipelines: HashMap<PipelineKey, Weak<CachedPipeline>>,
    set_layouts: HashMap<Vec<BindingDesc>, vk::DescriptorSetLayout>,
    wireframe: bool,
}

/// Cache of pipelines and descriptor set layouts.
pub struct ResourceCache {
    device: Arc<Device>,
    reclaimer: Arc<DeferredReclaimer>,
    state: Mutex<CacheState>,
}

impl ResourceCache {
    pub fn new(device: Arc<Device>, reclaimer: Arc<DeferredReclaimer>) -> Self {
        Self {
            device,
            reclaimer,
            state: Mutex::new(CacheState {
                pipelines: HashMap::new(),
                set_layouts: HashMap::new(),
                wireframe: false,
            }),
        }
    }

    /// Returns the cached pipeline for `key`, building it if no live user
    /// currently holds one.
    ///
    /// The shader modules must be the ones the key's identities refer to;
    /// they are retained inside the cached pipeline so the wireframe toggle
    /// can rebuild it later.
    pub fn get_or_create_pipeline(
        &self,
        key: &PipelineKey,
        vertex_shader: &Arc<ShaderModule>,
        fragment_shader: &Arc<ShaderModule>,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> GfxResult<Arc<CachedPipeline>> {
        debug_assert_eq!(&key.vertex_shader, vertex_shader.id());
        debug_assert_eq!(&key.fragment_shader, fragment_shader.id());

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(weak) = state.pipelines.get(key)
            && let Some(pipeline) = weak.upgrade()
        {
            return Ok(pipeline);
        }

        let polygon_mode = polygon_mode_for(state.wireframe);

        let layout = create_pipeline_layout(&self.device, set_layouts)?;
        let handle = match build_graphics_pipeline(
            &self.device,
            &GraphicsPipelineDesc {
                vertex_shader,
                fragment_shader,
                vertex_layouts: &key.vertex_layouts,
                targets: &key.targets,
                layout,
                polygon_mode,
            },
        ) {
            Ok(handle) => handle,
            Err(e) => {
                // The layout has no owner yet; destroy it rather than leak.
                unsafe {
                    self.device.handle().destroy_pipeline_layout(layout, None);
                }
                return Err(e);
            }
        };

        let pipeline = Arc::new(CachedPipeline {
            handle: RwLock::new(handle),
            layout,
            vertex_shader: vertex_shader.clone(),
            fragment_shader: fragment_shader.clone(),
            targets: key.targets.clone(),
            vertex_layouts: key.vertex_layouts.clone(),
            reclaimer: self.reclaimer.clone(),
        });

        state.pipelines.insert(key.clone(), Arc::downgrade(&pipeline));
        debug!(
            "Cached new pipeline (vs '{}', fs '{}')",
            key.vertex_shader, key.fragment_shader
        );

        Ok(pipeline)
    }

    /// Returns the cached descriptor set layout for the given binding list,
    /// creating it on first use.
    ///
    /// Bindings must be sorted by binding index so equal sets key equally.
    pub fn descriptor_set_layout(
        &self,
        bindings: &[BindingDesc],
    ) -> GfxResult<vk::DescriptorSetLayout> {
        debug_assert!(bindings.windows(2).all(|p| p[0].binding < p[1].binding));

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(&layout) = state.set_layouts.get(bindings) {
            return Ok(layout);
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> =
            bindings.iter().map(|b| b.to_vk()).collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        let layout = unsafe {
            self.device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        state.set_layouts.insert(bindings.to_vec(), layout);
        debug!(
            "Cached new descriptor set layout ({} binding(s))",
            bindings.len()
        );

        Ok(layout)
    }

    /// Toggles wireframe rendering.
    ///
    /// Every live cached pipeline is rebuilt exactly once with the new
    /// polygon mode; retired handles go through the reclaimer so in-flight
    /// frames finish with the pipelines they were recorded with. Returns
    /// the number of pipelines rebuilt. A no-op when the state is
    /// unchanged.
    pub fn set_wireframe(&self, enabled: bool) -> GfxResult<usize> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.wireframe == enabled {
            return Ok(0);
        }
        state.wireframe = enabled;

        let polygon_mode = polygon_mode_for(enabled);

        let mut rebuilt = 0;
        prune_dead_entries(&mut state.pipelines);
        for weak in state.pipelines.values() {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.rebuild(&self.device, polygon_mode)?;
                rebuilt += 1;
            }
        }

        info!(
            "Wireframe {} ({} pipeline(s) rebuilt)",
            if enabled { "enabled" } else { "disabled" },
            rebuilt
        );
        Ok(rebuilt)
    }

    /// Returns whether wireframe mode is active.
    pub fn is_wireframe(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .wireframe
    }

    /// Number of live pipelines in the cache. Dead weak entries are not
    /// counted.
    pub fn live_pipeline_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pipelines
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Drop for ResourceCache {
    fn drop(&mut self) {
        // Set layouts are owned strongly by the cache. The renderer waits
        // for device idle before dropping it, so direct destruction is safe.
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for &layout in state.set_layouts.values() {
            unsafe {
                self.device
                    .handle()
                    .destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::Vertex;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn sample_key() -> PipelineKey {
        PipelineKey {
            vertex_shader: ShaderId::new("shaders/mesh.vert.spv"),
            fragment_shader: ShaderId::new("shaders/mesh.frag.spv"),
            targets: RenderTargetDesc::single_color(vk::Format::B8G8R8A8_SRGB),
            vertex_layouts: vec![Vertex::layout()],
        }
    }

    #[test]
    fn test_identical_keys_are_equal() {
        let a = sample_key();
        let b = sample_key();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_key_distinguishes_shaders() {
        let a = sample_key();
        let mut b = sample_key();
        b.fragment_shader = ShaderId::new("shaders/unlit.frag.spv");
        assert_ne!(a, b);
        assert_ne!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_key_distinguishes_targets() {
        let a = sample_key();
        let mut b = sample_key();
        b.targets =
            RenderTargetDesc::color_depth(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_distinguishes_vertex_layouts() {
        let a = sample_key();
        let mut b = sample_key();
        b.vertex_layouts[0].stride += 4;
        assert_ne!(a, b);
        assert_ne!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_polygon_mode_follows_wireframe_flag() {
        assert_eq!(polygon_mode_for(false), vk::PolygonMode::FILL);
        assert_eq!(polygon_mode_for(true), vk::PolygonMode::LINE);
    }

    #[test]
    fn test_prune_keeps_only_live_entries() {
        let mut entries: HashMap<u32, Weak<u32>> = HashMap::new();

        let live = Arc::new(1u32);
        entries.insert(0, Arc::downgrade(&live));

        let dead = Arc::new(2u32);
        entries.insert(1, Arc::downgrade(&dead));
        drop(dead);

        prune_dead_entries(&mut entries);
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key(&0));

        // The surviving entry is still upgradeable
        assert_eq!(entries[&0].upgrade().as_deref(), Some(&1));
    }

    #[test]
    fn test_key_works_as_hashmap_key() {
        let mut map: HashMap<PipelineKey, u32> = HashMap::new();
        map.insert(sample_key(), 1);
        assert_eq!(map.get(&sample_key()), Some(&1));

        let mut other = sample_key();
        other.vertex_shader = ShaderId::new("shaders/other.vert.spv");
        assert_eq!(map.get(&other), None);
    }
}
