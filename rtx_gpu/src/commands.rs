use crate::{
    acceleration_structures::{AccelerationStructure, ScratchBuffer},
    shader_binding_table::ShaderBindingTable,
    Backend, Result,
};
use ash::vk;
use std::sync::Arc;

/// A primary command buffer that is recorded once, submitted, and waited on.
///
/// The buffer is returned to its pool when this is dropped, whether or not it
/// was ever submitted.
pub struct OneTimeCommands {
    backend: Arc<dyn Backend>,
    name: String,
    raw: vk::CommandBuffer,
}

impl OneTimeCommands {
    pub fn begin(backend: &Arc<dyn Backend>, name: impl Into<String>) -> Result<OneTimeCommands> {
        let name = name.into();
        let raw = backend.begin_one_time_commands(&name)?;
        log::debug!("{}: recording", name);

        Ok(OneTimeCommands {
            backend: backend.clone(),
            name,
            raw,
        })
    }

    /// Records with `func`, then submits and blocks until the work is done.
    pub fn now<F>(backend: &Arc<dyn Backend>, name: impl Into<String>, func: F) -> Result<()>
    where
        F: FnOnce(&OneTimeCommands) -> Result<()>,
    {
        let commands = OneTimeCommands::begin(backend, name)?;
        func(&commands)?;
        commands.submit_and_wait()
    }

    pub fn build_acceleration_structure(
        &self,
        destination: &AccelerationStructure,
        scratch: &ScratchBuffer,
    ) {
        let build = destination.build_command(scratch.device_address());
        log::debug!(
            "{}: building {} ({:?})",
            self.name,
            destination.name(),
            build.geometry.primitive_counts()
        );
        self.backend.cmd_build_acceleration_structure(self.raw, &build);
    }

    /// Makes acceleration structure writes visible to later builds and to
    /// ray tracing shaders.
    pub fn acceleration_structure_barrier(&self) {
        self.backend.cmd_memory_barrier(
            self.raw,
            vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
        );
    }

    pub fn bind_ray_tracing_pipeline(
        &self,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.backend
            .cmd_bind_ray_tracing_pipeline(self.raw, pipeline, layout, descriptor_sets);
    }

    pub fn trace_rays(&self, binding_table: &ShaderBindingTable, size: (u32, u32, u32)) {
        let extent = vk::Extent3D {
            width: size.0,
            height: size.1,
            depth: size.2,
        };
        self.backend
            .cmd_trace_rays(self.raw, &binding_table.device_regions(), extent);
    }

    pub fn submit_and_wait(self) -> Result<()> {
        log::debug!("Waiting upon command {}", self.name);
        self.backend.submit_and_wait(self.raw)?;
        log::debug!("Command {} complete", self.name);
        Ok(())
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for OneTimeCommands {
    fn drop(&mut self) {
        self.backend.free_command_buffer(self.raw);
    }
}
