//! Adapter enumeration, suitability checks and scoring.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::{QueueCapabilities, QueueFamilyIndices, QueueFamilyInfo, discover_queue_families};
use crate::error::{RhiError, RhiResult};

use super::instance::REQUIRED_API_VERSION;

/// An adapter that passed every suitability check.
pub(crate) struct PhysicalDevice {
    pub(crate) handle: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) families: Vec<QueueFamilyInfo>,
    pub(crate) queue_families: QueueFamilyIndices,
}

impl PhysicalDevice {
    pub(crate) fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    pub(crate) fn device_local_memory(&self) -> u64 {
        device_local_bytes(&self.memory_properties)
    }

    fn score(&self) -> u32 {
        rate_device(
            self.properties.device_type,
            self.properties.limits.max_image_dimension2_d,
            self.device_local_memory(),
            &self.queue_families,
        )
    }
}

impl std::fmt::Debug for PhysicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDevice")
            .field("name", &self.name())
            .field("type", &device_type_name(self.properties.device_type))
            .field(
                "api",
                &format_args!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("vram_mb", &(self.device_local_memory() / (1024 * 1024)))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the adapter to create the device on.
///
/// `preferred` indexes the enumerated adapters. It wins when that adapter is
/// suitable; otherwise the best-scoring suitable adapter is used.
pub(crate) fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    preferred: Option<usize>,
) -> RhiResult<PhysicalDevice> {
    let handles = unsafe { instance.enumerate_physical_devices()? };
    if handles.is_empty() {
        return Err(RhiError::NoSuitableGpu);
    }
    info!("Found {} physical device(s)", handles.len());

    let mut candidates = Vec::new();
    for (index, &handle) in handles.iter().enumerate() {
        match inspect(instance, surface_loader, surface, handle)? {
            Some(device) => {
                debug!("Adapter {}: {:?} (score {})", index, device, device.score());
                candidates.push((index, device));
            }
            None => debug!("Adapter {} is not suitable", index),
        }
    }

    if let Some(preferred) = preferred {
        match candidates.iter().position(|(index, _)| *index == preferred) {
            Some(position) => {
                let (_, device) = candidates.swap_remove(position);
                info!("Using preferred adapter {}: {}", preferred, device.name());
                return Ok(device);
            }
            None => warn!(
                "Preferred adapter {} is missing or unsuitable; picking the best adapter",
                preferred
            ),
        }
    }

    let (_, device) = candidates
        .into_iter()
        .max_by_key(|(_, device)| device.score())
        .ok_or(RhiError::NoSuitableGpu)?;
    info!(
        "Selected adapter: {} ({}, {} MB)",
        device.name(),
        device_type_name(device.properties.device_type),
        device.device_local_memory() / (1024 * 1024)
    );
    Ok(device)
}

/// Returns `None` if the adapter cannot run this backend.
fn inspect(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    handle: vk::PhysicalDevice,
) -> RhiResult<Option<PhysicalDevice>> {
    let properties = unsafe { instance.get_physical_device_properties(handle) };
    if properties.api_version < REQUIRED_API_VERSION {
        return Ok(None);
    }
    if !supports_timeline_semaphores(instance, handle) {
        return Ok(None);
    }
    if !supports_swapchain(instance, handle)? {
        return Ok(None);
    }

    let families = queue_family_infos(instance, surface_loader, surface, handle)?;
    let queue_families = match discover_queue_families(&families) {
        Ok(indices) if indices.present.is_some() => indices,
        _ => return Ok(None),
    };

    let memory_properties = unsafe { instance.get_physical_device_memory_properties(handle) };
    Ok(Some(PhysicalDevice {
        handle,
        properties,
        memory_properties,
        families,
        queue_families,
    }))
}

fn supports_timeline_semaphores(instance: &ash::Instance, handle: vk::PhysicalDevice) -> bool {
    let mut features_12 = vk::PhysicalDeviceVulkan12Features::default();
    {
        let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_12);
        unsafe { instance.get_physical_device_features2(handle, &mut features) };
    }
    features_12.timeline_semaphore == vk::TRUE
}

fn supports_swapchain(instance: &ash::Instance, handle: vk::PhysicalDevice) -> RhiResult<bool> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(handle)? };
    Ok(extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    }))
}

fn queue_family_infos(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    handle: vk::PhysicalDevice,
) -> RhiResult<Vec<QueueFamilyInfo>> {
    let properties = unsafe { instance.get_physical_device_queue_family_properties(handle) };
    let mut families = Vec::with_capacity(properties.len());
    for (index, family) in (0u32..).zip(properties.iter()) {
        let present = unsafe {
            surface_loader.get_physical_device_surface_support(handle, index, surface)?
        };
        families.push(QueueFamilyInfo {
            index,
            queue_count: family.queue_count,
            capabilities: capabilities_from_vk(family.queue_flags, present),
        });
    }
    Ok(families)
}

fn capabilities_from_vk(flags: vk::QueueFlags, present: bool) -> QueueCapabilities {
    let mut capabilities = QueueCapabilities::empty();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        capabilities |= QueueCapabilities::GRAPHICS;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        capabilities |= QueueCapabilities::COMPUTE;
    }
    // Graphics and compute queues support transfers implicitly.
    if flags.intersects(vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
        capabilities |= QueueCapabilities::TRANSFER;
    }
    if present {
        capabilities |= QueueCapabilities::PRESENT;
    }
    capabilities
}

fn device_local_bytes(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps_as_slice()
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "other",
    }
}

/// Higher is better. Device type dominates; image limits, memory and
/// dedicated queue families break ties.
fn rate_device(
    device_type: vk::PhysicalDeviceType,
    max_image_dimension_2d: u32,
    device_local_bytes: u64,
    families: &QueueFamilyIndices,
) -> u32 {
    let mut score: u32 = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };
    score = score.saturating_add(max_image_dimension_2d);

    let vram_mb = u32::try_from(device_local_bytes / (1024 * 1024)).unwrap_or(u32::MAX);
    score = score.saturating_add(vram_mb.min(16_000));

    if families.present.is_some_and(|present| present != families.graphics) {
        score += 100;
    }
    if families.has_dedicated_compute() {
        score += 100;
    }
    if families.has_dedicated_transfer() {
        score += 100;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_families() -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: 0,
            present: Some(0),
            compute: 0,
            transfer: 0,
        }
    }

    #[test]
    fn test_device_type_dominates_score() {
        let families = shared_families();
        let discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, 0, &families);
        let integrated = rate_device(
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            16384,
            2 * 1024 * 1024 * 1024,
            &families,
        );
        assert!(discrete > integrated);
        assert_eq!(discrete, 10_000 + 16384);
        assert_eq!(integrated, 1_000 + 16384 + 2048);
    }

    #[test]
    fn test_vram_contribution_is_capped() {
        let families = shared_families();
        let huge = rate_device(vk::PhysicalDeviceType::CPU, 0, 64 * 1024 * 1024 * 1024, &families);
        assert_eq!(huge, 10 + 16_000);
        let small = rate_device(vk::PhysicalDeviceType::CPU, 0, 512 * 1024 * 1024, &families);
        assert_eq!(small, 10 + 512);
    }

    #[test]
    fn test_dedicated_families_add_to_score() {
        let shared = rate_device(vk::PhysicalDeviceType::OTHER, 0, 0, &shared_families());
        let dedicated = rate_device(
            vk::PhysicalDeviceType::OTHER,
            0,
            0,
            &QueueFamilyIndices {
                graphics: 0,
                present: Some(1),
                compute: 2,
                transfer: 3,
            },
        );
        assert_eq!(shared, 1);
        assert_eq!(dedicated, 301);
    }

    #[test]
    fn test_capabilities_from_queue_flags() {
        assert_eq!(
            capabilities_from_vk(vk::QueueFlags::GRAPHICS, true),
            QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER | QueueCapabilities::PRESENT
        );
        assert_eq!(
            capabilities_from_vk(vk::QueueFlags::TRANSFER, false),
            QueueCapabilities::TRANSFER
        );
        assert_eq!(
            capabilities_from_vk(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
            QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER
        );
        assert!(capabilities_from_vk(vk::QueueFlags::SPARSE_BINDING, false).is_empty());
    }

    #[test]
    fn test_device_local_bytes_sums_local_heaps() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 3,
            ..Default::default()
        };
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 4096,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        memory.memory_heaps[1] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        memory.memory_heaps[2] = vk::MemoryHeap {
            size: 1024,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        assert_eq!(device_local_bytes(&memory), 5120);
    }
}
