//! Vulkan instance creation and adapter selection.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable when requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// Instance extensions are taken from the windowing system's requirements;
/// pass `None` for `display` to create a headless instance with no surface
/// extensions.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    app_version: u32,
    enable_validation: bool,
    display: Option<RawDisplayHandle>,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidState("application name contains NUL".to_string()))?;
    let engine_name = c"Hearth";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(app_version)
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    let extension_names: Vec<*const c_char> = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)?.to_vec(),
        None => Vec::new(),
    };

    // Only request layers that are actually installed
    let mut layer_names: Vec<*const c_char> = Vec::new();
    if enable_validation {
        let available = entry.enumerate_instance_layer_properties()?;
        for layer in validation_layers() {
            let found = available.iter().any(|props| {
                CStr::from_ptr(props.layer_name.as_ptr()) == layer
            });
            if found {
                layer_names.push(layer.as_ptr());
            } else {
                tracing::warn!("Validation layer {:?} not available", layer);
            }
        }
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// What the ranking policy knows about a physical device.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    /// Device name, for logging.
    pub name: String,
    /// Discrete, integrated, virtual, CPU.
    pub device_type: vk::PhysicalDeviceType,
    /// Total device-local heap size in MiB.
    pub device_local_mb: u64,
    /// Whether a queue family supports both graphics and presentation
    /// (always true for headless selection, where presentation is not
    /// required).
    pub has_present_queue: bool,
}

impl AdapterProfile {
    /// One-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {} MiB local)",
            self.name, self.device_type, self.device_local_mb
        )
    }
}

/// Scoring function for adapter selection.
pub type AdapterScorer = fn(&AdapterProfile) -> i32;

/// Default adapter score: discrete over integrated over virtual, plus one
/// point per GiB of device-local memory. Adapters without a usable
/// graphics/present queue are rejected.
pub fn default_adapter_score(profile: &AdapterProfile) -> i32 {
    if !profile.has_present_queue {
        return -1;
    }

    let mut score = match profile.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };
    score += (profile.device_local_mb / 1024) as i32;
    score
}

/// Rank adapter profiles and return the index of the best one.
///
/// Returns `None` when no profile scores above zero.
pub fn rank_adapters(profiles: &[AdapterProfile], scorer: AdapterScorer) -> Option<usize> {
    let mut best = None;
    let mut best_score = 0i32;
    for (i, profile) in profiles.iter().enumerate() {
        let score = scorer(profile);
        if score > best_score {
            best_score = score;
            best = Some(i);
        }
    }
    best
}

/// Build an [`AdapterProfile`] for a physical device.
///
/// # Safety
/// The instance and physical device must be valid; if a surface is given,
/// its loader must belong to the same instance.
pub unsafe fn profile_adapter(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> AdapterProfile {
    let properties = instance.get_physical_device_properties(device);
    let name = CStr::from_ptr(properties.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    let memory = instance.get_physical_device_memory_properties(device);
    let device_local_mb: u64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size / (1024 * 1024))
        .sum();

    let has_present_queue = find_graphics_present_family(instance, device, surface).is_some();

    AdapterProfile {
        name,
        device_type: properties.device_type,
        device_local_mb,
        has_present_queue,
    }
}

/// Find a queue family that supports graphics and, when a surface is given,
/// presentation to it.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_graphics_present_family(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Option<u32> {
    let families = instance.get_physical_device_queue_family_properties(device);

    families.iter().enumerate().find_map(|(i, family)| {
        let i = i as u32;
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            return None;
        }
        match surface {
            Some((loader, surface)) => {
                let supported = loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false);
                supported.then_some(i)
            }
            None => Some(i),
        }
    })
}

/// Select the best physical device under the given scorer.
///
/// # Safety
/// The instance must be valid; if a surface is given, its loader must belong
/// to the same instance.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    scorer: AdapterScorer,
) -> Result<(vk::PhysicalDevice, AdapterProfile)> {
    let devices = instance.enumerate_physical_devices()?;
    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let profiles: Vec<AdapterProfile> = devices
        .iter()
        .map(|&device| profile_adapter(instance, device, surface))
        .collect();

    let best = rank_adapters(&profiles, scorer).ok_or(GpuError::NoSuitableDevice)?;
    Ok((devices[best], profiles[best].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(
        name: &str,
        device_type: vk::PhysicalDeviceType,
        device_local_mb: u64,
        has_present_queue: bool,
    ) -> AdapterProfile {
        AdapterProfile {
            name: name.to_string(),
            device_type,
            device_local_mb,
            has_present_queue,
        }
    }

    #[test]
    fn discrete_beats_integrated() {
        let profiles = [
            profile("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU, 2048, true),
            profile("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU, 8192, true),
        ];
        assert_eq!(rank_adapters(&profiles, default_adapter_score), Some(1));
    }

    #[test]
    fn more_vram_breaks_ties() {
        let profiles = [
            profile("small", vk::PhysicalDeviceType::DISCRETE_GPU, 4096, true),
            profile("big", vk::PhysicalDeviceType::DISCRETE_GPU, 16384, true),
        ];
        assert_eq!(rank_adapters(&profiles, default_adapter_score), Some(1));
    }

    #[test]
    fn adapters_without_present_queue_are_rejected() {
        let profiles = [
            profile("no-present", vk::PhysicalDeviceType::DISCRETE_GPU, 8192, false),
            profile("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU, 1024, true),
        ];
        assert_eq!(rank_adapters(&profiles, default_adapter_score), Some(1));
    }

    #[test]
    fn empty_or_unsuitable_list_selects_nothing() {
        assert_eq!(rank_adapters(&[], default_adapter_score), None);

        let profiles = [profile(
            "cpu-no-present",
            vk::PhysicalDeviceType::CPU,
            0,
            false,
        )];
        assert_eq!(rank_adapters(&profiles, default_adapter_score), None);
    }

    #[test]
    fn custom_scorer_is_honored() {
        // A scorer that prefers the smallest device, e.g. for power saving
        let prefer_small: AdapterScorer =
            |p| 10_000 - p.device_local_mb.min(9_999) as i32;
        let profiles = [
            profile("big", vk::PhysicalDeviceType::DISCRETE_GPU, 8192, true),
            profile("small", vk::PhysicalDeviceType::INTEGRATED_GPU, 1024, true),
        ];
        assert_eq!(rank_adapters(&profiles, prefer_small), Some(1));
    }
}
