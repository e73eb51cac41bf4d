//! Physical device (GPU) selection.
//!
//! A GPU qualifies if it supports Vulkan 1.3 (dynamic rendering), exposes
//! `VK_KHR_swapchain`, and has a graphics queue family plus a family that
//! can present to the target surface. Among qualifying GPUs discrete ones
//! win, then the one with the most device-local memory.

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Queue family indices used by the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }

    /// Graphics and present families, once the set is complete.
    pub fn resolved(&self) -> Option<(u32, u32)> {
        Some((self.graphics_family?, self.present_family?))
    }
}

/// A GPU that passed the suitability checks.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Total device-local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

fn supports_api_1_3(api_version: u32) -> bool {
    (vk::api_version_major(api_version), vk::api_version_minor(api_version)) >= (1, 3)
}

/// Picks the most suitable GPU for presenting to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }
    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    let Some((info, score)) = selected else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}), score {}",
        info.device_name(),
        info.device_type_name(),
        score
    );
    Ok(info)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !supports_api_1_3(properties.api_version) {
        debug!("GPU '{}' skipped: Vulkan 1.3 not supported", name);
        return None;
    }

    let extensions =
        unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
    let has_swapchain = extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|ext_name| ext_name == ash::khr::swapchain::NAME)
    });
    if !has_swapchain {
        debug!("GPU '{}' skipped: VK_KHR_swapchain missing", name);
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: missing queue families (graphics={}, present={})",
            name,
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        );
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features: unsafe { instance.get_physical_device_features(device) },
        memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
        queue_families,
    })
}

/// Finds a graphics family and a present family, preferring one family
/// that does both.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        if graphics && present {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u64 {
    let type_score: u64 = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 1,
    };

    // VRAM in MB, capped at 64 GB
    let vram_mb = (info.device_local_memory() / (1024 * 1024)).min(65_536);

    type_score + vram_mb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_completeness() {
        assert!(!QueueFamilyIndices::default().is_complete());
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!indices.is_complete());
        assert_eq!(indices.resolved(), None);

        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(indices.resolved(), Some((0, 2)));
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(1),
            present_family: Some(1),
        };
        assert_eq!(shared.unique_families(), vec![1]);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(3),
        };
        assert_eq!(split.unique_families(), vec![0, 3]);
    }

    #[test]
    fn test_api_version_gate() {
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!supports_api_1_3(vk::make_api_version(0, 1, 2, 198)));
    }

    #[test]
    fn test_device_type_names() {
        assert_eq!(
            device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU),
            "Discrete GPU"
        );
        assert_eq!(device_type_name(vk::PhysicalDeviceType::OTHER), "Other");
    }
}
