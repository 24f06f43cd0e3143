//! Device context management.

use crate::error::{GpuError, Result};
use crate::instance::{
    create_instance, default_adapter_score, find_graphics_present_family, select_physical_device,
    AdapterScorer,
};
use crate::surface::SurfaceContext;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Core Vulkan context: instance, device, and the graphics queue.
///
/// Created once at startup and immutable thereafter. Every other component
/// borrows it, so it must be the last thing destroyed.
pub struct DeviceContext {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) graphics_queue_family: u32,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get a shared handle to the device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        self.device.clone()
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the physical device's memory type table.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a device context.
pub struct DeviceContextBuilder {
    app_name: String,
    app_version: u32,
    enable_validation: bool,
    scorer: AdapterScorer,
}

impl Default for DeviceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Hearth".to_string(),
            app_version: vk::make_api_version(0, 0, 1, 0),
            enable_validation: cfg!(debug_assertions),
            scorer: default_adapter_score,
        }
    }
}

impl DeviceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the application version (`vk::make_api_version` encoding).
    pub fn app_version(mut self, version: u32) -> Self {
        self.app_version = version;
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Replace the adapter ranking policy.
    pub fn adapter_scorer(mut self, scorer: AdapterScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Build a headless context (no surface, presentation not required).
    ///
    /// Used by compute-style work and device-dependent tests.
    pub fn build(self) -> Result<DeviceContext> {
        let entry = load_entry()?;
        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.app_version,
                self.enable_validation,
                None,
            )
        }?;

        match unsafe { finish_build(&entry, &instance, None, self.scorer) } {
            Ok(context) => Ok(context),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    /// Build a context able to present to the given window, along with the
    /// surface it presents to.
    ///
    /// The queue family is required to support both graphics and
    /// presentation; there is no split-queue fallback.
    pub fn build_presentable<W>(self, window: &W) -> Result<(DeviceContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("no display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("no window handle: {e}")))?
            .as_raw();

        let entry = load_entry()?;
        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.app_version,
                self.enable_validation,
                Some(display),
            )
        }?;

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display, window_handle, None)
                .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
        }?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let context = unsafe {
            finish_build(
                &entry,
                &instance,
                Some((&surface_loader, surface)),
                self.scorer,
            )
        };
        let context = match context {
            Ok(context) => context,
            Err(e) => {
                // Surface before instance: the context drop path never runs
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let surface_ctx = SurfaceContext::new(surface, surface_loader, &context);
        Ok((context, surface_ctx))
    }
}

fn load_entry() -> Result<ash::Entry> {
    unsafe { ash::Entry::load() }
        .map_err(|e| GpuError::InvalidState(format!("failed to load Vulkan: {e}")))
}

/// Select the adapter, create the logical device, and fetch the queue.
///
/// The caller owns the instance and destroys it if this fails.
///
/// # Safety
/// The instance must be valid; if a surface is given, its loader must belong
/// to the instance.
unsafe fn finish_build(
    entry: &ash::Entry,
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    scorer: AdapterScorer,
) -> Result<DeviceContext> {
    let (physical_device, profile) = select_physical_device(instance, surface, scorer)?;
    tracing::info!("Selected GPU: {}", profile.summary());

    let queue_family = find_graphics_present_family(instance, physical_device, surface)
        .ok_or(GpuError::NoSuitableQueueFamily)?;

    let (device, graphics_queue) = create_device(instance, physical_device, queue_family)?;
    let memory_properties = instance.get_physical_device_memory_properties(physical_device);

    Ok(DeviceContext {
        entry: entry.clone(),
        instance: instance.clone(),
        physical_device,
        device: Arc::new(device),
        graphics_queue,
        graphics_queue_family: queue_family,
        memory_properties,
    })
}

/// Create the logical device and retrieve the graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extensions);

    let device = instance.create_device(physical_device, &device_create_info, None)?;
    let graphics_queue = device.get_device_queue(queue_family, 0);

    Ok((device, graphics_queue))
}
