//! Physical device selection and logical device management.
//!
//! Selection scans the available GPUs for one that exposes a graphics queue,
//! a present-capable queue for the target surface, the swapchain extension,
//! and the features the renderer relies on (dynamic rendering, non-solid
//! fill modes). Discrete GPUs win ties.
//!
//! The [`Device`] wraps the logical device, its queues, and the
//! gpu-allocator instance used for all buffer and image memory.

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::{GfxError, GfxResult};
use crate::instance::Instance;

/// Device extensions the renderer requires.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices resolved during physical device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics and transfer work.
    pub graphics: u32,
    /// Family used for presentation. Usually equals `graphics`.
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Returns the distinct families, for building queue create infos.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        if self.present != self.graphics {
            families.push(self.present);
        }
        families
    }

    /// Returns true when graphics and present share a family.
    #[inline]
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }
}

/// A physical device that passed suitability checks.
pub struct AdapterInfo {
    /// The physical device handle.
    pub physical_device: vk::PhysicalDevice,
    /// Resolved queue families.
    pub queue_families: QueueFamilyIndices,
    /// Device properties (name, limits, type).
    pub properties: vk::PhysicalDeviceProperties,
}

impl AdapterInfo {
    /// Returns the device name as a lossy UTF-8 string.
    pub fn name(&self) -> String {
        let raw = unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) };
        raw.to_string_lossy().into_owned()
    }
}

/// Selects a physical device that can render to the given surface.
///
/// Candidates must provide a graphics family, a present family for the
/// surface, the swapchain extension, and `fillModeNonSolid` for the
/// wireframe toggle. Among suitable candidates a discrete GPU is preferred.
///
/// # Errors
///
/// Returns [`GfxError::NoSuitableGpu`] if no device qualifies.
pub fn select_adapter(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> GfxResult<AdapterInfo> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };
    debug!("Found {} physical device(s)", physical_devices.len());

    let mut best: Option<(u32, AdapterInfo)> = None;

    for &physical_device in &physical_devices {
        let Some(info) = check_adapter(instance, physical_device, surface, surface_loader)? else {
            continue;
        };

        let score = match info.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 100,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 50,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 25,
            _ => 10,
        };

        debug!("Candidate GPU '{}' scored {}", info.name(), score);

        if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
            best = Some((score, info));
        }
    }

    let (_, info) = best.ok_or(GfxError::NoSuitableGpu)?;
    info!("Selected GPU: {}", info.name());
    Ok(info)
}

/// Checks a single physical device, returning its info if suitable.
fn check_adapter(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> GfxResult<Option<AdapterInfo>> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };

    // Dynamic rendering needs Vulkan 1.3
    if properties.api_version < vk::API_VERSION_1_3 {
        return Ok(None);
    }

    let features = unsafe { instance.get_physical_device_features(physical_device) };
    if features.fill_mode_non_solid == vk::FALSE {
        return Ok(None);
    }

    if !supports_extensions(instance, physical_device)? {
        return Ok(None);
    }

    let Some(queue_families) =
        find_queue_families(instance, physical_device, surface, surface_loader)?
    else {
        return Ok(None);
    };

    Ok(Some(AdapterInfo {
        physical_device,
        queue_families,
        properties,
    }))
}

/// Checks that all required device extensions are available.
fn supports_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> GfxResult<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device)? };

    let supported = DEVICE_EXTENSIONS.iter().all(|&required| {
        available.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == required
        })
    });

    Ok(supported)
}

/// Finds graphics and present queue families, preferring a single family
/// that can do both.
fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> GfxResult<Option<QueueFamilyIndices>> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        let is_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let is_present = unsafe {
            surface_loader.get_physical_device_surface_support(physical_device, index, surface)?
        };

        // A unified family beats split families
        if is_graphics && is_present {
            return Ok(Some(QueueFamilyIndices {
                graphics: index,
                present: index,
            }));
        }

        if is_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if is_present && present.is_none() {
            present = Some(index);
        }
    }

    match (graphics, present) {
        (Some(graphics), Some(present)) => Ok(Some(QueueFamilyIndices { graphics, present })),
        _ => Ok(None),
    }
}

/// Vulkan logical device wrapper.
///
/// Shared across the crate as `Arc<Device>`. The allocator sits behind a
/// `Mutex` so buffers can allocate and free from any thread, including from
/// `Drop` implementations.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device the logical device was created from.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator. `ManuallyDrop` so `Drop` can tear it down
    /// before the device it allocates through.
    allocator: Mutex<ManuallyDrop<Allocator>>,
    /// Graphics queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle.
    present_queue: vk::Queue,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the logical device, retrieves its queues, and initializes
    /// the gpu-allocator.
    ///
    /// Enabled features: dynamic rendering and synchronization2 from
    /// Vulkan 1.3, plus `fillModeNonSolid` for wireframe pipelines.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(instance: &Instance, adapter: &AdapterInfo) -> GfxResult<Arc<Self>> {
        let queue_families = adapter.queue_families;

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features = vk::PhysicalDeviceFeatures::default().fill_mode_non_solid(true);

        let extension_names: Vec<*const c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(adapter.physical_device, &create_info, None)?
        };

        info!(
            "Logical device created ({} queue create info(s))",
            queue_create_infos.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            queue_families.graphics, queue_families.present
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: adapter.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: adapter.physical_device,
            allocator: Mutex::new(ManuallyDrop::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Returns the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<ManuallyDrop<Allocator>> {
        &self.allocator
    }

    /// Blocks until all queues are idle.
    ///
    /// Used before swapchain recreation and during shutdown.
    pub fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded, and the fence must not be
    /// in use by a previous submission.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> GfxResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
            // The allocator frees its memory blocks through the device, so
            // it has to go first.
            {
                let mut allocator = self
                    .allocator
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                ManuallyDrop::drop(&mut *allocator);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: the ash device is Send+Sync, queue handles are plain Copy values,
// and the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_queue_family_indices_unique() {
        let unified = QueueFamilyIndices {
            graphics: 0,
            present: 0,
        };
        assert_eq!(unified.unique(), vec![0]);
        assert!(unified.is_unified());

        let split = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        assert_eq!(split.unique(), vec![0, 2]);
        assert!(!split.is_unified());
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
