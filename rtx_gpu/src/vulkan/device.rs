use super::VulkanInstance;
use crate::{
    backend::{calls, RayTracingProperties},
    Error, Result,
};
use ash::{extensions::khr, vk};
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocatorDebugSettings,
};
use log::{debug, info};
use std::{
    ffi::CStr,
    mem::ManuallyDrop,
    sync::{Arc, Mutex},
};

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub application_name: String,
    pub validation: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            application_name: "RayTracer".to_string(),
            validation: cfg!(debug_assertions),
        }
    }
}

pub struct Extensions {
    pub acceleration_structure: khr::AccelerationStructure,
    pub ray_tracing_pipeline: khr::RayTracingPipeline,
    pub deferred_host_operations: khr::DeferredHostOperations,
}

struct Candidate {
    raw: vk::PhysicalDevice,
    name: String,
    queue_family_index: u32,
}

/// A logical device with ray tracing enabled, its allocator and a graphics
/// queue with a command pool.
pub struct Device {
    raw: ash::Device,
    ext: Extensions,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    physical_device: vk::PhysicalDevice,
    name: String,
    queue: vk::Queue,
    queue_family_index: u32,
    command_pool: vk::CommandPool,
    ray_tracing_properties: RayTracingProperties,
    instance: VulkanInstance,
}

impl Device {
    pub fn new(config: &DeviceConfig) -> Result<Arc<Device>> {
        let instance = VulkanInstance::new(&config.application_name, config.validation)?;
        let candidate = Self::select_physical_device(&instance)?;
        info!("Selected physical device {}", candidate.name);

        let raw = Self::create_device(&instance, &candidate)?;
        let ext = unsafe {
            Extensions {
                acceleration_structure: khr::AccelerationStructure::new(instance.raw(), &raw),
                ray_tracing_pipeline: khr::RayTracingPipeline::new(instance.raw(), &raw),
                deferred_host_operations: khr::DeferredHostOperations::new(instance.raw(), &raw),
            }
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: unsafe { instance.raw() }.clone(),
            device: raw.clone(),
            physical_device: candidate.raw,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: true,
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(error) => {
                unsafe { raw.destroy_device(None) };
                return Err(super::backend::allocation_error("device allocator", error));
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(candidate.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { raw.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(result) => {
                drop(allocator);
                unsafe { raw.destroy_device(None) };
                return Err(Error::backend(calls::CREATE_COMMAND_POOL, "command pool", result));
            }
        };

        let queue = unsafe { raw.get_device_queue(candidate.queue_family_index, 0) };
        let ray_tracing_properties = Self::query_ray_tracing_properties(&instance, candidate.raw);
        info!("Ray tracing properties: {:?}", ray_tracing_properties);

        Ok(Arc::new(Device {
            raw,
            ext,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            physical_device: candidate.raw,
            name: candidate.name,
            queue,
            queue_family_index: candidate.queue_family_index,
            command_pool,
            ray_tracing_properties,
            instance,
        }))
    }

    fn required_extensions() -> [&'static CStr; 3] {
        [
            khr::AccelerationStructure::name(),
            khr::RayTracingPipeline::name(),
            khr::DeferredHostOperations::name(),
        ]
    }

    fn select_physical_device(instance: &VulkanInstance) -> Result<Candidate> {
        let vulkan = unsafe { instance.raw() };
        let mut selected = None;

        for raw in instance.physical_devices()? {
            let properties = unsafe { vulkan.get_physical_device_properties(raw) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned();

            let extensions =
                unsafe { vulkan.enumerate_device_extension_properties(raw) }.unwrap_or_default();
            let supports_ray_tracing = Self::required_extensions().iter().all(|required| {
                extensions
                    .iter()
                    .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == *required)
            });

            let graphics_family = unsafe { vulkan.get_physical_device_queue_family_properties(raw) }
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS));

            debug!(
                "Found physical device {} (ray tracing: {}, graphics queue family: {:?})",
                name, supports_ray_tracing, graphics_family
            );

            if selected.is_none() && supports_ray_tracing {
                if let Some(index) = graphics_family {
                    selected = Some(Candidate {
                        raw,
                        name,
                        queue_family_index: index as u32,
                    });
                }
            }
        }

        selected.ok_or(Error::NoSuitableDevice)
    }

    fn create_device(instance: &VulkanInstance, candidate: &Candidate) -> Result<ash::Device> {
        let priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(candidate.queue_family_index)
            .queue_priorities(&priorities)
            .build()];

        let extension_names: Vec<_> = Self::required_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let mut features_12 = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .build();
        let mut features_rt =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(true);
        let mut features_as = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
            .acceleration_structure(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_12)
            .push_next(&mut features_rt)
            .push_next(&mut features_as);

        unsafe {
            instance
                .raw()
                .create_device(candidate.raw, &create_info, None)
        }
        .map_err(|result| Error::backend(calls::CREATE_DEVICE, candidate.name.clone(), result))
    }

    fn query_ray_tracing_properties(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> RayTracingProperties {
        let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut as_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        let mut props = vk::PhysicalDeviceProperties2::builder()
            .push_next(&mut rt_props)
            .push_next(&mut as_props);

        unsafe {
            instance
                .raw()
                .get_physical_device_properties2(physical_device, &mut props);
        }

        RayTracingProperties {
            shader_group_handle_size: rt_props.shader_group_handle_size,
            shader_group_handle_alignment: rt_props.shader_group_handle_alignment,
            shader_group_base_alignment: rt_props.shader_group_base_alignment,
            max_ray_recursion_depth: rt_props.max_ray_recursion_depth,
            min_scratch_offset_alignment: as_props
                .min_acceleration_structure_scratch_offset_alignment,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ray_tracing_properties(&self) -> RayTracingProperties {
        self.ray_tracing_properties
    }

    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    pub unsafe fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub unsafe fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub unsafe fn ext(&self) -> &Extensions {
        &self.ext
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(result) = self.raw.device_wait_idle() {
                log::warn!("Waiting for {} to idle failed: {}", self.name, result);
            }

            // The allocator must release its memory before the device goes.
            ManuallyDrop::drop(&mut self.allocator);
            self.raw.destroy_command_pool(self.command_pool, None);
            self.raw.destroy_device(None);
        }
    }
}
