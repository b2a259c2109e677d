//! The boundary between scene setup and the graphics API.
//!
//! Everything above this module talks to a [`Backend`] rather than to Vulkan
//! directly. [`crate::vulkan::VulkanBackend`] is the real implementation.

#[cfg(test)]
pub(crate) mod mock;

use crate::{
    acceleration_structures::{BuildCommand, BuildGeometry, BuildSizes},
    shader_binding_table::DeviceAddressRegions,
    shaders::{ShaderGroup, ShaderStage},
    Result,
};
use ash::vk;

/// Names of the API calls reported in errors.
pub mod calls {
    pub const CREATE_INSTANCE: &str = "vkCreateInstance";
    pub const ENUMERATE_PHYSICAL_DEVICES: &str = "vkEnumeratePhysicalDevices";
    pub const CREATE_DEVICE: &str = "vkCreateDevice";
    pub const CREATE_COMMAND_POOL: &str = "vkCreateCommandPool";
    pub const CREATE_BUFFER: &str = "vkCreateBuffer";
    pub const ALLOCATE_MEMORY: &str = "vkAllocateMemory";
    pub const BIND_BUFFER_MEMORY: &str = "vkBindBufferMemory";
    pub const CREATE_ACCELERATION_STRUCTURE: &str = "vkCreateAccelerationStructureKHR";
    pub const ALLOCATE_COMMAND_BUFFERS: &str = "vkAllocateCommandBuffers";
    pub const BEGIN_COMMAND_BUFFER: &str = "vkBeginCommandBuffer";
    pub const END_COMMAND_BUFFER: &str = "vkEndCommandBuffer";
    pub const CREATE_FENCE: &str = "vkCreateFence";
    pub const QUEUE_SUBMIT: &str = "vkQueueSubmit";
    pub const WAIT_FOR_FENCES: &str = "vkWaitForFences";
    pub const CREATE_SHADER_MODULE: &str = "vkCreateShaderModule";
    pub const CREATE_DESCRIPTOR_SET_LAYOUT: &str = "vkCreateDescriptorSetLayout";
    pub const CREATE_PIPELINE_LAYOUT: &str = "vkCreatePipelineLayout";
    pub const CREATE_RAY_TRACING_PIPELINES: &str = "vkCreateRayTracingPipelinesKHR";
    pub const GET_SHADER_GROUP_HANDLES: &str = "vkGetRayTracingShaderGroupHandlesKHR";
}

/// Device limits that decide shader binding table and scratch layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayTracingProperties {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_ray_recursion_depth: u32,
    pub min_scratch_offset_alignment: u32,
}

/// One binding in the single descriptor set a ray tracing pipeline uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineLayoutHandles {
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
}

/// Creation, recording and destruction of the objects a ray traced scene
/// needs.
///
/// Handles returned here are owned by the caller until they are passed back
/// to the matching `destroy_*` method. The RAII wrappers elsewhere in the
/// crate take care of that.
pub trait Backend {
    fn ray_tracing_properties(&self) -> RayTracingProperties;

    fn create_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    ) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Only valid for host visible buffers.
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()>;
    fn read_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, len: usize)
        -> Result<Vec<u8>>;
    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress;

    fn acceleration_structure_build_sizes(
        &self,
        geometry: &BuildGeometry,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> BuildSizes;
    fn create_acceleration_structure(
        &self,
        name: &str,
        ty: vk::AccelerationStructureTypeKHR,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<vk::AccelerationStructureKHR>;
    fn destroy_acceleration_structure(&self, acceleration_structure: vk::AccelerationStructureKHR);
    fn acceleration_structure_device_address(
        &self,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) -> vk::DeviceAddress;

    fn begin_one_time_commands(&self, name: &str) -> Result<vk::CommandBuffer>;
    fn cmd_build_acceleration_structure(&self, cmd: vk::CommandBuffer, build: &BuildCommand);
    fn cmd_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    );
    fn cmd_bind_ray_tracing_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    );
    fn cmd_trace_rays(
        &self,
        cmd: vk::CommandBuffer,
        regions: &DeviceAddressRegions,
        extent: vk::Extent3D,
    );
    /// Ends recording, submits and blocks until the queue has finished the
    /// work.
    fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn free_command_buffer(&self, cmd: vk::CommandBuffer);

    fn create_shader_module(&self, name: &str, code: &[u8]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_pipeline_layout(&self, bindings: &[SlotBinding]) -> Result<PipelineLayoutHandles>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandles);

    fn create_ray_tracing_pipeline(
        &self,
        stages: &[ShaderStage],
        groups: &[ShaderGroup],
        max_recursion_depth: u32,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    /// Opaque handles for `group_count` groups, `shader_group_handle_size`
    /// bytes each, packed back to back.
    fn shader_group_handles(
        &self,
        pipeline: vk::Pipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>>;
}
