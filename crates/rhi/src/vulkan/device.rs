//! Vulkan logical device, queues and memory allocator.
//!
//! [`Device`] is the shared core every Vulkan resource holds an `Arc` to.
//! It owns, in destruction order, the allocator, the logical device, the
//! presentation surface and finally the instance, so no resource can
//! outlive the objects it was created from.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use super::instance::Instance;
use super::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
use crate::error::{RhiError, RhiResult};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// Shared across threads through `Arc`. The allocator and the upload
/// command pool are behind mutexes; queue submission is externally
/// synchronized by the single recording thread.
pub struct Device {
    allocator: ManuallyDrop<Mutex<Allocator>>,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    physical_device: PhysicalDeviceInfo,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    surface: vk::SurfaceKHR,
    instance: Instance,
}

impl Device {
    /// Selects a GPU able to present to `surface` and creates the logical device.
    ///
    /// Takes ownership of `surface`; it is destroyed with the device, or
    /// immediately if creation fails.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] if no GPU qualifies, or the
    /// Vulkan/allocator error that stopped device creation.
    pub fn new(instance: Instance, surface: vk::SurfaceKHR) -> RhiResult<Arc<Self>> {
        match Self::create(&instance, surface) {
            Ok((device, physical_device, allocator)) => {
                Ok(Arc::new(Self::assemble(instance, surface, device, physical_device, allocator)))
            }
            Err(e) => {
                unsafe { instance.surface_loader().destroy_surface(surface, None) };
                Err(e)
            }
        }
    }

    fn create(
        instance: &Instance,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<(ash::Device, PhysicalDeviceInfo, Allocator)> {
        let physical_device =
            select_physical_device(instance.handle(), surface, instance.surface_loader())?;

        let unique_families = physical_device.queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        // Optional features: enabled only when present.
        let supported = &physical_device.features;
        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device.device, &create_info, None)?
        };
        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        info!("GPU memory allocator initialized");

        Ok((device, physical_device, allocator))
    }

    fn assemble(
        instance: Instance,
        surface: vk::SurfaceKHR,
        device: ash::Device,
        physical_device: PhysicalDeviceInfo,
        allocator: Allocator,
    ) -> Self {
        let queue_families = physical_device.queue_families;
        // Completeness was checked during selection.
        let (graphics_family, present_family) = queue_families.resolved().unwrap_or((0, 0));

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            swapchain_loader,
            physical_device,
            graphics_queue,
            present_queue,
            queue_families,
            surface,
            instance,
        }
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Locks the GPU memory allocator.
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RhiError::from_vk)
    }

    /// Whether wireframe rasterization can be requested.
    #[inline]
    pub fn supports_wireframe(&self) -> bool {
        self.physical_device.features.fill_mode_non_solid == vk::TRUE
    }

    /// Minimum alignment for dynamic uniform buffer offsets.
    #[inline]
    pub fn min_uniform_offset_alignment(&self) -> u64 {
        self.physical_device
            .properties
            .limits
            .min_uniform_buffer_offset_alignment
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // All allocations are freed by now; the allocator must go before the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.instance
                .surface_loader()
                .destroy_surface(self.surface, None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device and the loaders are plain function tables, the handles
// are Copy, and the allocator is behind a Mutex.
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
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
