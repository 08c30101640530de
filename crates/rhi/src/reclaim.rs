//! Deferred destruction of GPU resources.
//!
//! CPU-side drops happen while the GPU may still be reading the resource
//! from a command buffer in flight. Instead of destroying immediately,
//! resource wrappers push their raw handles into the [`DeferredReclaimer`],
//! which files them under the frame slot that was recording when the drop
//! happened. Once that slot's fence has been waited on, every command
//! buffer that could reference the handles has finished, and the queue is
//! drained.
//!
//! The reclaimer is shared as `Arc<DeferredReclaimer>` and its state is
//! behind a `Mutex`, since `Drop` can run on any thread.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use tracing::{debug, trace};

use crate::device::Device;
use crate::sync::MAX_FRAMES_IN_FLIGHT;

/// A raw handle awaiting destruction.
///
/// Entries carry everything needed to destroy them without consulting the
/// wrapper that discarded them, which is gone by the time the queue drains.
pub enum Garbage {
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    Buffer(vk::Buffer),
    Allocation(Allocation),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorSet {
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    },
    ImageView(vk::ImageView),
    Image(vk::Image),
    Sampler(vk::Sampler),
    Swapchain {
        loader: ash::khr::swapchain::Device,
        handle: vk::SwapchainKHR,
    },
}

impl std::fmt::Debug for Garbage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Garbage::Pipeline(_) => "Pipeline",
            Garbage::PipelineLayout(_) => "PipelineLayout",
            Garbage::Buffer(_) => "Buffer",
            Garbage::Allocation(_) => "Allocation",
            Garbage::DescriptorSetLayout(_) => "DescriptorSetLayout",
            Garbage::DescriptorSet { .. } => "DescriptorSet",
            Garbage::ImageView(_) => "ImageView",
            Garbage::Image(_) => "Image",
            Garbage::Sampler(_) => "Sampler",
            Garbage::Swapchain { .. } => "Swapchain",
        };
        f.write_str(name)
    }
}

/// Per-slot pending queues with an active-slot cursor.
///
/// Pure bookkeeping, no Vulkan calls, so the retire ordering can be tested
/// without a device.
struct SlotQueues<T> {
    active: usize,
    queues: Vec<Vec<T>>,
}

impl<T> SlotQueues<T> {
    fn new(slot_count: usize) -> Self {
        Self {
            active: 0,
            queues: (0..slot_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Files an entry under the currently recording slot.
    fn push(&mut self, entry: T) {
        self.queues[self.active].push(entry);
    }

    /// Takes every entry filed under `slot` and makes it the active slot.
    fn begin_slot(&mut self, slot: usize) -> Vec<T> {
        self.active = slot;
        std::mem::take(&mut self.queues[slot])
    }

    /// Takes every pending entry from all slots.
    fn drain_all(&mut self) -> Vec<T> {
        let mut all = Vec::new();
        for queue in &mut self.queues {
            all.append(queue);
        }
        all
    }

    fn pending_in_slot(&self, slot: usize) -> usize {
        self.queues[slot].len()
    }
}

/// Collects dropped GPU resources and destroys them once the owning frame
/// slot's fence has been waited on.
pub struct DeferredReclaimer {
    device: Arc<Device>,
    slots: Mutex<SlotQueues<Garbage>>,
}

impl DeferredReclaimer {
    /// Creates a reclaimer with one queue per frame slot.
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        Arc::new(Self {
            device,
            slots: Mutex::new(SlotQueues::new(MAX_FRAMES_IN_FLIGHT)),
        })
    }

    /// Files a handle for destruction under the currently recording slot.
    ///
    /// The handle must not be used for new work after this call.
    pub fn discard(&self, garbage: Garbage) {
        trace!("Deferring destruction of {:?}", garbage);
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(garbage);
    }

    /// Marks `slot` as the recording slot and destroys everything filed
    /// under it.
    ///
    /// Must be called after waiting on the slot's in-flight fence; at that
    /// point no submitted work can still reference the queued handles.
    pub fn begin_slot(&self, slot: usize) {
        let drained = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .begin_slot(slot);

        if !drained.is_empty() {
            debug!("Reclaiming {} resource(s) for slot {}", drained.len(), slot);
        }
        for entry in drained {
            self.destroy(entry);
        }
    }

    /// Destroys everything pending in every slot.
    ///
    /// Must only be called with the device idle (shutdown, swapchain
    /// recreation has already waited).
    pub fn flush_all(&self) {
        let drained = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain_all();

        if !drained.is_empty() {
            debug!("Reclaiming {} resource(s) at flush", drained.len());
        }
        for entry in drained {
            self.destroy(entry);
        }
    }

    /// Number of entries waiting in the given slot. Used by tests and debug
    /// overlays.
    pub fn pending_in_slot(&self, slot: usize) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pending_in_slot(slot)
    }

    fn destroy(&self, entry: Garbage) {
        let device = self.device.handle();
        unsafe {
            match entry {
                Garbage::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
                Garbage::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
                Garbage::Buffer(buffer) => device.destroy_buffer(buffer, None),
                Garbage::Allocation(allocation) => {
                    let mut allocator = self
                        .device
                        .allocator()
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free GPU allocation: {}", e);
                    }
                }
                Garbage::DescriptorSetLayout(layout) => {
                    device.destroy_descriptor_set_layout(layout, None)
                }
                Garbage::DescriptorSet { pool, set } => {
                    if let Err(e) = device.free_descriptor_sets(pool, &[set]) {
                        tracing::error!("Failed to free descriptor set: {:?}", e);
                    }
                }
                Garbage::ImageView(view) => device.destroy_image_view(view, None),
                Garbage::Image(image) => device.destroy_image(image, None),
                Garbage::Sampler(sampler) => device.destroy_sampler(sampler, None),
                Garbage::Swapchain { loader, handle } => loader.destroy_swapchain(handle, None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_targets_active_slot() {
        let mut slots: SlotQueues<u32> = SlotQueues::new(2);

        slots.push(1);
        slots.push(2);
        assert_eq!(slots.pending_in_slot(0), 2);
        assert_eq!(slots.pending_in_slot(1), 0);

        // Move to slot 1 and file more entries there
        slots.begin_slot(1);
        slots.push(3);
        assert_eq!(slots.pending_in_slot(1), 1);
    }

    #[test]
    fn test_begin_slot_drains_only_that_slot() {
        let mut slots: SlotQueues<u32> = SlotQueues::new(2);

        slots.push(1);
        slots.begin_slot(1);
        slots.push(2);

        // Coming back around to slot 0 releases only slot 0's entries
        let drained = slots.begin_slot(0);
        assert_eq!(drained, vec![1]);
        assert_eq!(slots.pending_in_slot(1), 1);
    }

    #[test]
    fn test_entries_survive_until_their_slot_cycles() {
        let mut slots: SlotQueues<u32> = SlotQueues::new(2);

        // Frame N records on slot 0 and drops a resource
        slots.push(10);

        // Frame N+1 records on slot 1; the entry must still be pending
        let drained = slots.begin_slot(1);
        assert!(drained.is_empty());
        assert_eq!(slots.pending_in_slot(0), 1);

        // Frame N+2 returns to slot 0 after its fence wait
        let drained = slots.begin_slot(0);
        assert_eq!(drained, vec![10]);
    }

    #[test]
    fn test_drain_all_empties_every_slot() {
        let mut slots: SlotQueues<u32> = SlotQueues::new(2);

        slots.push(1);
        slots.begin_slot(1);
        slots.push(2);

        let mut drained = slots.drain_all();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(slots.pending_in_slot(0), 0);
        assert_eq!(slots.pending_in_slot(1), 0);
    }

    #[test]
    fn test_reclaimer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeferredReclaimer>();
    }
}
