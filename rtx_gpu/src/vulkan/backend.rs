use super::Device;
use crate::{
    acceleration_structures::{BuildCommand, BuildGeometry, BuildSizes},
    backend::{calls, PipelineLayoutHandles, RayTracingProperties, SlotBinding},
    shader_binding_table::DeviceAddressRegions,
    shaders::{ShaderGroup, ShaderStage},
    Backend, Error, Result,
};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    AllocationError, MemoryLocation,
};
use std::{
    collections::HashMap,
    io::Cursor,
    slice,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

pub(super) fn allocation_error(name: &str, error: AllocationError) -> Error {
    match error {
        AllocationError::OutOfMemory => Error::ResourceExhaustion {
            call: calls::ALLOCATE_MEMORY,
            name: name.to_string(),
        },
        error => {
            log::error!("Allocating {:?} failed: {}", name, error);
            Error::backend(calls::ALLOCATE_MEMORY, name, vk::Result::ERROR_UNKNOWN)
        }
    }
}

fn spirv_words(name: &str, code: &[u8]) -> Result<Vec<u32>> {
    if code.is_empty() {
        log::error!("Shader module {:?} is empty", name);
        return Err(Error::backend(
            calls::CREATE_SHADER_MODULE,
            name,
            vk::Result::ERROR_INVALID_SHADER_NV,
        ));
    }

    ash::util::read_spv(&mut Cursor::new(code)).map_err(|error| {
        log::error!("Shader module {:?} is not SPIR-V: {}", name, error);
        Error::backend(
            calls::CREATE_SHADER_MODULE,
            name,
            vk::Result::ERROR_INVALID_SHADER_NV,
        )
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BufferAllocation {
    name: String,
    allocation: Allocation,
}

/// [`Backend`] over a real device. Buffer memory comes from the device's
/// gpu-allocator and is tracked per buffer so it can be released on destroy.
pub struct VulkanBackend {
    device: Arc<Device>,
    buffers: Mutex<HashMap<vk::Buffer, BufferAllocation>>,
    // Also guards the command pool, which must be externally synchronised.
    command_buffers: Mutex<HashMap<vk::CommandBuffer, String>>,
}

impl VulkanBackend {
    pub fn new(device: Arc<Device>) -> VulkanBackend {
        VulkanBackend {
            device,
            buffers: Mutex::new(HashMap::new()),
            command_buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn free_allocation(&self, buffer: BufferAllocation) {
        log::debug!("Freeing {:?}", buffer.name);
        if let Err(error) = lock(self.device.allocator()).free(buffer.allocation) {
            log::error!("Freeing {:?} failed: {}", buffer.name, error);
        }
    }

    fn command_buffer_name(&self, cmd: vk::CommandBuffer) -> String {
        lock(&self.command_buffers)
            .get(&cmd)
            .cloned()
            .unwrap_or_else(|| format!("{:?}", cmd))
    }

    fn build_geometry_info<'a>(
        geometry: &BuildGeometry,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        geometries: &'a [vk::AccelerationStructureGeometryKHR],
    ) -> vk::AccelerationStructureBuildGeometryInfoKHRBuilder<'a> {
        vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(geometry.ty())
            .flags(flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(geometries)
    }
}

impl Backend for VulkanBackend {
    fn ray_tracing_properties(&self) -> RayTracingProperties {
        self.device.ray_tracing_properties()
    }

    fn create_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    ) -> Result<vk::Buffer> {
        log::debug!("Allocating {:?} ({} bytes)", name, size);
        let device = unsafe { self.device.raw() };

        let usage = usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|result| Error::backend(calls::CREATE_BUFFER, name, result))?;

        let mut requirements = unsafe { device.get_buffer_memory_requirements(raw) };
        if usage.contains(vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR) {
            let base_alignment = self.ray_tracing_properties().shader_group_base_alignment;
            requirements.alignment = requirements.alignment.max(base_alignment as u64);
        }

        let location = if memory.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        let allocation = lock(self.device.allocator()).allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(error) => {
                unsafe { device.destroy_buffer(raw, None) };
                return Err(allocation_error(name, error));
            }
        };

        let allocation = BufferAllocation {
            name: name.to_string(),
            allocation,
        };
        let bound = unsafe {
            device.bind_buffer_memory(
                raw,
                allocation.allocation.memory(),
                allocation.allocation.offset(),
            )
        };
        if let Err(result) = bound {
            self.free_allocation(allocation);
            unsafe { device.destroy_buffer(raw, None) };
            return Err(Error::backend(calls::BIND_BUFFER_MEMORY, name, result));
        }

        lock(&self.buffers).insert(raw, allocation);
        Ok(raw)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let allocation = lock(&self.buffers).remove(&buffer);
        match allocation {
            Some(allocation) => self.free_allocation(allocation),
            None => log::warn!("Destroying untracked buffer {:?}", buffer),
        }

        unsafe { self.device.raw().destroy_buffer(buffer, None) };
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut buffers = lock(&self.buffers);
        let entry = buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::precondition(format!("{:?} is not a live buffer", buffer)))?;
        let name = entry.name.clone();

        let mapped = entry
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| Error::precondition(format!("{:?} is not host visible", name)))?;

        let start = offset as usize;
        let end = start + data.len();
        if end > mapped.len() {
            return Err(Error::precondition(format!(
                "writing {} bytes at {} overruns {:?}",
                data.len(),
                offset,
                name
            )));
        }

        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        len: usize,
    ) -> Result<Vec<u8>> {
        let buffers = lock(&self.buffers);
        let entry = buffers
            .get(&buffer)
            .ok_or_else(|| Error::precondition(format!("{:?} is not a live buffer", buffer)))?;

        let mapped = entry
            .allocation
            .mapped_slice()
            .ok_or_else(|| Error::precondition(format!("{:?} is not host visible", entry.name)))?;

        let start = offset as usize;
        mapped
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::precondition(format!("reading past the end of {:?}", entry.name)))
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        unsafe { self.device.raw().get_buffer_device_address(&info) }
    }

    fn acceleration_structure_build_sizes(
        &self,
        geometry: &BuildGeometry,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> BuildSizes {
        let (geometries, _) = geometry.to_vk();
        let info = Self::build_geometry_info(geometry, flags, &geometries);

        let sizes = unsafe {
            self.device
                .ext()
                .acceleration_structure
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &info,
                    &geometry.primitive_counts(),
                )
        };

        BuildSizes {
            acceleration_structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        }
    }

    fn create_acceleration_structure(
        &self,
        name: &str,
        ty: vk::AccelerationStructureTypeKHR,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<vk::AccelerationStructureKHR> {
        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer)
            .size(size)
            .ty(ty);

        unsafe {
            self.device
                .ext()
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        }
        .map_err(|result| Error::backend(calls::CREATE_ACCELERATION_STRUCTURE, name, result))
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: vk::AccelerationStructureKHR) {
        unsafe {
            self.device
                .ext()
                .acceleration_structure
                .destroy_acceleration_structure(acceleration_structure, None);
        }
    }

    fn acceleration_structure_device_address(
        &self,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) -> vk::DeviceAddress {
        let info = vk::AccelerationStructureDeviceAddressInfoKHR::builder()
            .acceleration_structure(acceleration_structure);
        unsafe {
            self.device
                .ext()
                .acceleration_structure
                .get_acceleration_structure_device_address(&info)
        }
    }

    fn begin_one_time_commands(&self, name: &str) -> Result<vk::CommandBuffer> {
        let device = unsafe { self.device.raw() };
        let mut command_buffers = lock(&self.command_buffers);

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.device.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&allocate_info) }
            .map_err(|result| Error::backend(calls::ALLOCATE_COMMAND_BUFFERS, name, result))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::backend(
                    calls::ALLOCATE_COMMAND_BUFFERS,
                    name,
                    vk::Result::ERROR_UNKNOWN,
                )
            })?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(result) = unsafe { device.begin_command_buffer(cmd, &begin_info) } {
            unsafe { device.free_command_buffers(self.device.command_pool(), &[cmd]) };
            return Err(Error::backend(calls::BEGIN_COMMAND_BUFFER, name, result));
        }

        log::debug!("Recording {:?}", name);
        command_buffers.insert(cmd, name.to_string());
        Ok(cmd)
    }

    fn cmd_build_acceleration_structure(&self, cmd: vk::CommandBuffer, build: &BuildCommand) {
        let (geometries, ranges) = build.geometry.to_vk();
        let info = Self::build_geometry_info(build.geometry, build.flags, &geometries)
            .dst_acceleration_structure(build.destination)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: build.scratch_address,
            })
            .build();

        unsafe {
            self.device
                .ext()
                .acceleration_structure
                .cmd_build_acceleration_structures(cmd, slice::from_ref(&info), &[&ranges]);
        }
    }

    fn cmd_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();

        unsafe {
            self.device.raw().cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR
                    | vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    fn cmd_bind_ray_tracing_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        let device = unsafe { self.device.raw() };
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, pipeline);
            if !descriptor_sets.is_empty() {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    layout,
                    0,
                    descriptor_sets,
                    &[],
                );
            }
        }
    }

    fn cmd_trace_rays(
        &self,
        cmd: vk::CommandBuffer,
        regions: &DeviceAddressRegions,
        extent: vk::Extent3D,
    ) {
        unsafe {
            self.device.ext().ray_tracing_pipeline.cmd_trace_rays(
                cmd,
                &regions.raygen,
                &regions.miss,
                &regions.hit,
                &regions.callable,
                extent.width,
                extent.height,
                extent.depth,
            );
        }
    }

    fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let name = self.command_buffer_name(cmd);
        let device = unsafe { self.device.raw() };

        unsafe { device.end_command_buffer(cmd) }
            .map_err(|result| Error::backend(calls::END_COMMAND_BUFFER, name.as_str(), result))?;

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|result| Error::backend(calls::CREATE_FENCE, name.as_str(), result))?;

        log::debug!("Submitting {:?}", name);
        let submits = [vk::SubmitInfo::builder()
            .command_buffers(slice::from_ref(&cmd))
            .build()];
        let result = unsafe { device.queue_submit(self.device.queue(), &submits, fence) }
            .map_err(|result| Error::backend(calls::QUEUE_SUBMIT, name.as_str(), result))
            .and_then(|_| {
                unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
                    .map_err(|result| Error::backend(calls::WAIT_FOR_FENCES, name.as_str(), result))
            });

        unsafe { device.destroy_fence(fence, None) };
        log::debug!("{:?} complete", name);
        result
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        let mut command_buffers = lock(&self.command_buffers);
        command_buffers.remove(&cmd);
        unsafe {
            self.device
                .raw()
                .free_command_buffers(self.device.command_pool(), &[cmd]);
        }
    }

    fn create_shader_module(&self, name: &str, code: &[u8]) -> Result<vk::ShaderModule> {
        let words = spirv_words(name, code)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        unsafe { self.device.raw().create_shader_module(&create_info, None) }
            .map_err(|result| Error::backend(calls::CREATE_SHADER_MODULE, name, result))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.raw().destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(&self, bindings: &[SlotBinding]) -> Result<PipelineLayoutHandles> {
        let device = unsafe { self.device.raw() };

        let layout_bindings: Vec<_> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect();
        let set_layout_info =
            vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let descriptor_set_layout =
            unsafe { device.create_descriptor_set_layout(&set_layout_info, None) }.map_err(
                |result| {
                    Error::backend(calls::CREATE_DESCRIPTOR_SET_LAYOUT, "pipeline layout", result)
                },
            )?;

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(slice::from_ref(&descriptor_set_layout));
        match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(pipeline_layout) => Ok(PipelineLayoutHandles {
                descriptor_set_layout,
                pipeline_layout,
            }),
            Err(result) => {
                unsafe { device.destroy_descriptor_set_layout(descriptor_set_layout, None) };
                Err(Error::backend(
                    calls::CREATE_PIPELINE_LAYOUT,
                    "pipeline layout",
                    result,
                ))
            }
        }
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandles) {
        let device = unsafe { self.device.raw() };
        unsafe {
            device.destroy_pipeline_layout(layout.pipeline_layout, None);
            device.destroy_descriptor_set_layout(layout.descriptor_set_layout, None);
        }
    }

    fn create_ray_tracing_pipeline(
        &self,
        stages: &[ShaderStage],
        groups: &[ShaderGroup],
        max_recursion_depth: u32,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let stage_infos: Vec<_> = stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.kind().flags())
                    .module(stage.module().raw())
                    .name(stage.entry_point().as_c_str())
                    .build()
            })
            .collect();
        let group_infos: Vec<_> = groups.iter().map(ShaderGroup::to_vk).collect();

        let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stage_infos)
            .groups(&group_infos)
            .max_pipeline_ray_recursion_depth(max_recursion_depth)
            .layout(layout)
            .build();

        let name = "ray tracing pipeline";
        unsafe {
            self.device
                .ext()
                .ray_tracing_pipeline
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    slice::from_ref(&create_info),
                    None,
                )
        }
        .map_err(|result| Error::backend(calls::CREATE_RAY_TRACING_PIPELINES, name, result))?
        .into_iter()
        .next()
        .ok_or_else(|| {
            Error::backend(
                calls::CREATE_RAY_TRACING_PIPELINES,
                name,
                vk::Result::ERROR_UNKNOWN,
            )
        })
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.raw().destroy_pipeline(pipeline, None) };
    }

    fn shader_group_handles(
        &self,
        pipeline: vk::Pipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>> {
        let handle_size = self.ray_tracing_properties().shader_group_handle_size as usize;
        unsafe {
            self.device
                .ext()
                .ray_tracing_pipeline
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    first_group,
                    group_count,
                    group_count as usize * handle_size,
                )
        }
        .map_err(|result| {
            Error::backend(calls::GET_SHADER_GROUP_HANDLES, "ray tracing pipeline", result)
        })
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let leaked: Vec<_> = lock(&self.buffers).drain().collect();
        for (buffer, allocation) in leaked {
            log::warn!("Buffer {:?} was never destroyed", allocation.name);
            self.free_allocation(allocation);
            unsafe { self.device.raw().destroy_buffer(buffer, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_words_are_little_endian() {
        let code = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(
            spirv_words("ray_gen", &code).unwrap(),
            vec![0x0723_0203, 0x0001_0000]
        );
    }

    #[test]
    fn malformed_spirv_names_the_module() {
        for code in [&[][..], &[0x03, 0x02, 0x23][..]] {
            let error = spirv_words("ray_gen", code).unwrap_err();

            assert_eq!(error.failed_call(), Some(calls::CREATE_SHADER_MODULE));
            assert!(matches!(
                error,
                Error::BackendCreateFailure { ref name, .. } if name == "ray_gen"
            ));
        }
    }
}
