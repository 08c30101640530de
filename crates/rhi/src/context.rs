//! The explicitly owned graphics context.
//!
//! [`GraphicsContext`] bundles the objects with process lifetime: the
//! instance (with its optional debug messenger), the presentation surface,
//! the logical device, and the process-wide command and descriptor pools.
//! It is constructed once at startup and passed by reference to everything
//! that needs it; nothing in the crate reaches for globals.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::command::CommandPool;
use crate::descriptor::DescriptorPool;
use crate::device::{Device, select_adapter};
use crate::error::GfxResult;
use crate::instance::Instance;

/// RAII wrapper for a Vulkan surface.
///
/// Owns the `vk::SurfaceKHR` and the loader needed to destroy it. The
/// instance must outlive the surface; the context's field order
/// guarantees it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for the given window handles.
    ///
    /// # Errors
    ///
    /// Returns an error if surface creation fails or the platform is
    /// unsupported.
    pub fn new(
        instance: &Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> GfxResult<Self> {
        // SAFETY: the handles come from a live window, and the entry and
        // instance are valid. The surface is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display_handle,
                window_handle,
                None,
            )?
        };
        let surface_loader =
            ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        info!("Vulkan surface created");

        Ok(Self {
            handle,
            surface_loader,
        })
    }

    /// Returns the raw surface handle.
    ///
    /// Valid only while this `Surface` exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Returns the surface loader, for capability and support queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// Owns the process-lifetime Vulkan objects.
///
/// Field order doubles as destruction order: the pools go before the
/// device, the surface before the instance.
pub struct GraphicsContext {
    command_pool: CommandPool,
    descriptor_pool: DescriptorPool,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl GraphicsContext {
    /// Brings up the instance, surface, device, and pools for a window.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage of device bring-up fails, including
    /// when no suitable GPU is present.
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        enable_validation: bool,
    ) -> GfxResult<Self> {
        let instance = Instance::new(display_handle, enable_validation)?;
        let surface = Surface::new(&instance, display_handle, window_handle)?;

        let adapter = select_adapter(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &adapter)?;

        let command_pool = CommandPool::new(device.clone())?;
        let descriptor_pool = DescriptorPool::new(device.clone())?;

        let debug_utils = instance
            .has_validation()
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), device.handle()));

        info!("Graphics context initialized");

        Ok(Self {
            command_pool,
            descriptor_pool,
            debug_utils,
            device,
            surface,
            instance,
        })
    }

    /// Returns the instance wrapper.
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Returns the presentation surface.
    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Returns the logical device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the process-wide command pool.
    #[inline]
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Returns the process-wide descriptor pool.
    #[inline]
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    /// Returns the device-level debug utils loader when validation is
    /// active.
    #[inline]
    pub fn debug_utils(&self) -> Option<ash::ext::debug_utils::Device> {
        self.debug_utils.clone()
    }
}
