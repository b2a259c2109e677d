//! An in-memory [`Backend`] that records what it is asked to do.

use super::{calls, Backend, PipelineLayoutHandles, RayTracingProperties, SlotBinding};
use crate::{
    acceleration_structures::{BuildCommand, BuildGeometry, BuildSizes},
    shader_binding_table::DeviceAddressRegions,
    shaders::{ShaderGroup, ShaderStage, ShaderStageKind},
    Error, Result,
};
use ash::vk::{self, Handle};
use std::{cell::RefCell, collections::HashMap};

#[derive(Clone, Debug)]
pub enum Call {
    CreateBuffer {
        name: String,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    },
    DestroyBuffer {
        name: String,
    },
    WriteBuffer {
        name: String,
        offset: vk::DeviceSize,
        data: Vec<u8>,
    },
    CreateAccelerationStructure {
        name: String,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        raw: vk::AccelerationStructureKHR,
    },
    DestroyAccelerationStructure {
        name: String,
    },
    AccelerationStructureAddress {
        raw: vk::AccelerationStructureKHR,
    },
    BeginCommands {
        name: String,
    },
    BuildAccelerationStructure {
        destination: vk::AccelerationStructureKHR,
        ty: vk::AccelerationStructureTypeKHR,
        primitive_counts: Vec<u32>,
        scratch_address: vk::DeviceAddress,
    },
    MemoryBarrier {
        src: vk::AccessFlags,
        dst: vk::AccessFlags,
    },
    BindPipeline {
        pipeline: vk::Pipeline,
        descriptor_sets: usize,
    },
    TraceRays {
        regions: DeviceAddressRegions,
        extent: vk::Extent3D,
    },
    SubmitAndWait {
        name: String,
    },
    FreeCommands {
        name: String,
    },
    CreateShaderModule {
        name: String,
    },
    DestroyShaderModule,
    CreatePipelineLayout {
        bindings: Vec<SlotBinding>,
    },
    DestroyPipelineLayout,
    CreatePipeline {
        stage_kinds: Vec<ShaderStageKind>,
        groups: Vec<ShaderGroup>,
        max_recursion_depth: u32,
    },
    DestroyPipeline,
    ShaderGroupHandles {
        first_group: u32,
        group_count: u32,
    },
}

struct Failure {
    call: &'static str,
    name_fragment: String,
    result: vk::Result,
}

struct MockBuffer {
    name: String,
    data: Vec<u8>,
    memory: vk::MemoryPropertyFlags,
    address: vk::DeviceAddress,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    buffers: HashMap<vk::Buffer, MockBuffer>,
    acceleration_structures: HashMap<vk::AccelerationStructureKHR, String>,
    command_buffers: HashMap<vk::CommandBuffer, String>,
    shader_modules: HashMap<vk::ShaderModule, String>,
    pipeline_layouts: HashMap<vk::PipelineLayout, vk::DescriptorSetLayout>,
    pipelines: HashMap<vk::Pipeline, u32>,
}

impl MockState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check(&mut self, call: &'static str, name: &str) -> Result<()> {
        let position = self
            .failures
            .iter()
            .position(|f| f.call == call && name.contains(&f.name_fragment));

        match position {
            Some(position) => {
                let failure = self.failures.remove(position);
                Err(Error::backend(call, name, failure.result))
            }
            None => Ok(()),
        }
    }

    fn command_buffer_name(&self, cmd: vk::CommandBuffer) -> String {
        match self.command_buffers.get(&cmd) {
            Some(name) => name.clone(),
            None => panic!("command buffer {:?} is not live", cmd),
        }
    }
}

pub struct MockBackend {
    properties: RayTracingProperties,
    state: RefCell<MockState>,
}

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend::with_properties(RayTracingProperties {
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
            max_ray_recursion_depth: 31,
            min_scratch_offset_alignment: 128,
        })
    }

    pub fn with_properties(properties: RayTracingProperties) -> MockBackend {
        MockBackend {
            properties,
            state: RefCell::new(MockState::default()),
        }
    }

    /// Makes the next `call` whose object name contains `name_fragment` fail.
    pub fn fail_on(&self, call: &'static str, name_fragment: &str) {
        self.fail_on_with(call, name_fragment, vk::Result::ERROR_INITIALIZATION_FAILED);
    }

    pub fn fail_on_with(&self, call: &'static str, name_fragment: &str, result: vk::Result) {
        self.state.borrow_mut().failures.push(Failure {
            call,
            name_fragment: name_fragment.to_string(),
            result,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_objects(&self) -> usize {
        let state = self.state.borrow();
        state.buffers.len()
            + state.acceleration_structures.len()
            + state.command_buffers.len()
            + state.shader_modules.len()
            + state.pipeline_layouts.len()
            + state.pipelines.len()
    }

    /// Every buffer ever created whose name contains `fragment`.
    pub fn created_buffers(&self, fragment: &str) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::CreateBuffer { name, .. } if name.contains(fragment) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// The handle the mock hands out for a group.
    pub fn group_handle(&self, group: u32) -> Vec<u8> {
        vec![group as u8 + 1; self.properties.shader_group_handle_size as usize]
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Backend for MockBackend {
    fn ray_tracing_properties(&self) -> RayTracingProperties {
        self.properties
    }

    fn create_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    ) -> Result<vk::Buffer> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::CreateBuffer {
            name: name.to_string(),
            size,
            usage,
            memory,
        });
        state.check(calls::CREATE_BUFFER, name)?;
        state.check(calls::ALLOCATE_MEMORY, name)?;

        let handle = state.next_handle();
        let raw = vk::Buffer::from_raw(handle);
        state.buffers.insert(
            raw,
            MockBuffer {
                name: name.to_string(),
                data: vec![0; size as usize],
                memory,
                // Offset so that only explicitly aligned addresses are aligned.
                address: 0x1_0000_0000 + handle * 0x1_0000 + 0x40,
            },
        );
        Ok(raw)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.borrow_mut();
        let removed = match state.buffers.remove(&buffer) {
            Some(removed) => removed,
            None => panic!("buffer {:?} destroyed twice", buffer),
        };
        state.calls.push(Call::DestroyBuffer { name: removed.name });
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let target = match state.buffers.get_mut(&buffer) {
            Some(target) => target,
            None => panic!("write to dead buffer {:?}", buffer),
        };
        if !target.memory.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(Error::precondition(format!(
                "{} is not host visible",
                target.name
            )));
        }

        let start = offset as usize;
        target.data[start..start + data.len()].copy_from_slice(data);
        let name = target.name.clone();
        state.calls.push(Call::WriteBuffer {
            name,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        len: usize,
    ) -> Result<Vec<u8>> {
        let state = self.state.borrow();
        let target = match state.buffers.get(&buffer) {
            Some(target) => target,
            None => panic!("read from dead buffer {:?}", buffer),
        };
        let start = offset as usize;
        Ok(target.data[start..start + len].to_vec())
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        match self.state.borrow().buffers.get(&buffer) {
            Some(target) => target.address,
            None => panic!("address of dead buffer {:?}", buffer),
        }
    }

    fn acceleration_structure_build_sizes(
        &self,
        geometry: &BuildGeometry,
        _flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> BuildSizes {
        let primitives: u64 = geometry.primitive_counts().iter().map(|&c| c as u64).sum();
        match geometry {
            BuildGeometry::Triangles(_) => BuildSizes {
                acceleration_structure_size: 1024 + 64 * primitives,
                build_scratch_size: 512 + 32 * primitives,
                update_scratch_size: 0,
            },
            BuildGeometry::Instances(_) => BuildSizes {
                acceleration_structure_size: 1024 + 128 * primitives,
                build_scratch_size: 256 + 16 * primitives,
                update_scratch_size: 0,
            },
        }
    }

    fn create_acceleration_structure(
        &self,
        name: &str,
        ty: vk::AccelerationStructureTypeKHR,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<vk::AccelerationStructureKHR> {
        let mut state = self.state.borrow_mut();
        assert!(state.buffers.contains_key(&buffer), "storage buffer is not live");
        state.check(calls::CREATE_ACCELERATION_STRUCTURE, name)?;

        let raw = vk::AccelerationStructureKHR::from_raw(state.next_handle());
        state.acceleration_structures.insert(raw, name.to_string());
        state.calls.push(Call::CreateAccelerationStructure {
            name: name.to_string(),
            ty,
            size,
            raw,
        });
        Ok(raw)
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: vk::AccelerationStructureKHR) {
        let mut state = self.state.borrow_mut();
        let name = match state.acceleration_structures.remove(&acceleration_structure) {
            Some(name) => name,
            None => panic!("{:?} destroyed twice", acceleration_structure),
        };
        state.calls.push(Call::DestroyAccelerationStructure { name });
    }

    fn acceleration_structure_device_address(
        &self,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) -> vk::DeviceAddress {
        self.record(Call::AccelerationStructureAddress {
            raw: acceleration_structure,
        });
        0xA_0000_0000 + acceleration_structure.as_raw() * 0x100
    }

    fn begin_one_time_commands(&self, name: &str) -> Result<vk::CommandBuffer> {
        let mut state = self.state.borrow_mut();
        state.check(calls::ALLOCATE_COMMAND_BUFFERS, name)?;

        let raw = vk::CommandBuffer::from_raw(state.next_handle());
        state.command_buffers.insert(raw, name.to_string());
        state.calls.push(Call::BeginCommands {
            name: name.to_string(),
        });
        Ok(raw)
    }

    fn cmd_build_acceleration_structure(&self, cmd: vk::CommandBuffer, build: &BuildCommand) {
        let mut state = self.state.borrow_mut();
        state.command_buffer_name(cmd);
        state.calls.push(Call::BuildAccelerationStructure {
            destination: build.destination,
            ty: build.geometry.ty(),
            primitive_counts: build.geometry.primitive_counts(),
            scratch_address: build.scratch_address,
        });
    }

    fn cmd_memory_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        let mut state = self.state.borrow_mut();
        state.command_buffer_name(cmd);
        state.calls.push(Call::MemoryBarrier {
            src: src_access,
            dst: dst_access,
        });
    }

    fn cmd_bind_ray_tracing_pipeline(
        &self,
        _cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
        _layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.record(Call::BindPipeline {
            pipeline,
            descriptor_sets: descriptor_sets.len(),
        });
    }

    fn cmd_trace_rays(
        &self,
        _cmd: vk::CommandBuffer,
        regions: &DeviceAddressRegions,
        extent: vk::Extent3D,
    ) {
        self.record(Call::TraceRays {
            regions: *regions,
            extent,
        });
    }

    fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let name = state.command_buffer_name(cmd);
        state.calls.push(Call::SubmitAndWait { name: name.clone() });
        state.check(calls::QUEUE_SUBMIT, &name)
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        let mut state = self.state.borrow_mut();
        let name = match state.command_buffers.remove(&cmd) {
            Some(name) => name,
            None => panic!("command buffer {:?} freed twice", cmd),
        };
        state.calls.push(Call::FreeCommands { name });
    }

    fn create_shader_module(&self, name: &str, code: &[u8]) -> Result<vk::ShaderModule> {
        let mut state = self.state.borrow_mut();
        state.check(calls::CREATE_SHADER_MODULE, name)?;
        if code.is_empty() || code.len() % 4 != 0 {
            return Err(Error::backend(
                calls::CREATE_SHADER_MODULE,
                name,
                vk::Result::ERROR_INVALID_SHADER_NV,
            ));
        }

        let raw = vk::ShaderModule::from_raw(state.next_handle());
        state.shader_modules.insert(raw, name.to_string());
        state.calls.push(Call::CreateShaderModule {
            name: name.to_string(),
        });
        Ok(raw)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        let mut state = self.state.borrow_mut();
        if state.shader_modules.remove(&module).is_none() {
            panic!("shader module {:?} destroyed twice", module);
        }
        state.calls.push(Call::DestroyShaderModule);
    }

    fn create_pipeline_layout(&self, bindings: &[SlotBinding]) -> Result<PipelineLayoutHandles> {
        let mut state = self.state.borrow_mut();
        state.check(calls::CREATE_PIPELINE_LAYOUT, "pipeline layout")?;

        let handles = PipelineLayoutHandles {
            descriptor_set_layout: vk::DescriptorSetLayout::from_raw(state.next_handle()),
            pipeline_layout: vk::PipelineLayout::from_raw(state.next_handle()),
        };
        state
            .pipeline_layouts
            .insert(handles.pipeline_layout, handles.descriptor_set_layout);
        state.calls.push(Call::CreatePipelineLayout {
            bindings: bindings.to_vec(),
        });
        Ok(handles)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandles) {
        let mut state = self.state.borrow_mut();
        if state.pipeline_layouts.remove(&layout.pipeline_layout).is_none() {
            panic!("pipeline layout {:?} destroyed twice", layout);
        }
        state.calls.push(Call::DestroyPipelineLayout);
    }

    fn create_ray_tracing_pipeline(
        &self,
        stages: &[ShaderStage],
        groups: &[ShaderGroup],
        max_recursion_depth: u32,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let mut state = self.state.borrow_mut();
        assert!(
            state.pipeline_layouts.contains_key(&layout),
            "pipeline layout is not live"
        );
        for stage in stages {
            assert!(
                state.shader_modules.contains_key(&stage.module().raw()),
                "shader module for {:?} is not live",
                stage.entry_point()
            );
        }
        state.check(calls::CREATE_RAY_TRACING_PIPELINES, "ray tracing pipeline")?;

        let raw = vk::Pipeline::from_raw(state.next_handle());
        state.pipelines.insert(raw, groups.len() as u32);
        state.calls.push(Call::CreatePipeline {
            stage_kinds: stages.iter().map(|s| s.kind()).collect(),
            groups: groups.to_vec(),
            max_recursion_depth,
        });
        Ok(raw)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state.borrow_mut();
        if state.pipelines.remove(&pipeline).is_none() {
            panic!("pipeline {:?} destroyed twice", pipeline);
        }
        state.calls.push(Call::DestroyPipeline);
    }

    fn shader_group_handles(
        &self,
        pipeline: vk::Pipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        let pipeline_groups = match state.pipelines.get(&pipeline) {
            Some(&groups) => groups,
            None => panic!("pipeline {:?} is not live", pipeline),
        };
        assert!(first_group + group_count <= pipeline_groups);
        state.calls.push(Call::ShaderGroupHandles {
            first_group,
            group_count,
        });
        state.check(calls::GET_SHADER_GROUP_HANDLES, "ray tracing pipeline")?;
        drop(state);

        Ok((first_group..first_group + group_count)
            .flat_map(|group| self.group_handle(group))
            .collect())
    }
}
