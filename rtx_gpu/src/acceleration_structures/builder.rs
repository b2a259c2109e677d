use super::{
    AccelerationStructure, BuildGeometry, GeometryInstance, InstanceRecord, InstancesGeometry,
    ScratchBuffer, TriangleGeometry,
};
use crate::{
    commands::OneTimeCommands,
    storage::{memory, OwnedBuffer},
    Backend, Error, Result,
};
use ash::vk;
use std::sync::Arc;

/// Creates acceleration structures and builds them in a single submission.
pub struct AccelerationStructureBuilder {
    backend: Arc<dyn Backend>,
}

impl AccelerationStructureBuilder {
    pub fn new(backend: &Arc<dyn Backend>) -> AccelerationStructureBuilder {
        AccelerationStructureBuilder {
            backend: backend.clone(),
        }
    }

    pub fn create_bottom_level(
        &self,
        name: impl Into<String>,
        geometries: Vec<TriangleGeometry>,
    ) -> Result<AccelerationStructure> {
        let name = name.into();
        if geometries.is_empty() {
            return Err(Error::precondition(format!(
                "bottom level structure {} has no geometry",
                name
            )));
        }
        if geometries.iter().any(|g| g.primitive_count == 0) {
            return Err(Error::precondition(format!(
                "bottom level structure {} has a geometry without triangles",
                name
            )));
        }

        AccelerationStructure::new(&self.backend, name, BuildGeometry::Triangles(geometries))
    }

    /// Packs `instances` into a buffer the top level build can read.
    pub fn upload_instances(
        &self,
        name: impl Into<String>,
        instances: &[GeometryInstance],
    ) -> Result<OwnedBuffer> {
        let records = instances
            .iter()
            .map(GeometryInstance::to_record)
            .collect::<Result<Vec<InstanceRecord>>>()?;

        OwnedBuffer::new_from_data(
            &self.backend,
            name,
            &records,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            memory::host_visible(),
        )
    }

    pub fn create_top_level(
        &self,
        name: impl Into<String>,
        instances: &OwnedBuffer,
    ) -> Result<AccelerationStructure> {
        let count = instances.count::<InstanceRecord>() as u32;
        if count == 0 {
            return Err(Error::precondition(format!(
                "instance buffer {} is empty",
                instances.name()
            )));
        }

        let geometry = InstancesGeometry {
            data: instances.device_address(),
            count,
            flags: vk::GeometryFlagsKHR::OPAQUE,
        };
        AccelerationStructure::new(&self.backend, name, BuildGeometry::Instances(geometry))
    }

    /// Builds every bottom level structure, then the top level structure,
    /// and waits for the device to finish.
    ///
    /// One scratch buffer sized for the largest build is shared, so a barrier
    /// follows every build. The barrier after the last bottom level build is
    /// also what makes the instances' targets readable by the top level build.
    pub fn build(
        &self,
        bottom_levels: &mut [AccelerationStructure],
        top_level: &mut AccelerationStructure,
    ) -> Result<()> {
        if bottom_levels.is_empty() {
            return Err(Error::precondition(
                "no bottom level structures to build",
            ));
        }
        if let Some(wrong) = bottom_levels
            .iter()
            .find(|b| b.ty() != vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
        {
            return Err(Error::precondition(format!(
                "{} is not a bottom level structure",
                wrong.name()
            )));
        }
        if top_level.ty() != vk::AccelerationStructureTypeKHR::TOP_LEVEL {
            return Err(Error::precondition(format!(
                "{} is not a top level structure",
                top_level.name()
            )));
        }
        if let Some(built) = bottom_levels
            .iter()
            .chain(Some(&*top_level))
            .find(|s| s.is_built())
        {
            return Err(Error::precondition(format!(
                "{} has already been built",
                built.name()
            )));
        }

        let scratch_size = bottom_levels
            .iter()
            .chain(Some(&*top_level))
            .map(|s| s.sizes().build_scratch_size)
            .max()
            .unwrap_or_default();
        let scratch = ScratchBuffer::new(&self.backend, scratch_size)?;

        OneTimeCommands::now(&self.backend, "acceleration structure build", |cmd| {
            for bottom_level in bottom_levels.iter() {
                cmd.build_acceleration_structure(bottom_level, &scratch);
                cmd.acceleration_structure_barrier();
            }
            cmd.build_acceleration_structure(top_level, &scratch);
            cmd.acceleration_structure_barrier();
            Ok(())
        })?;

        for bottom_level in bottom_levels.iter_mut() {
            bottom_level.mark_built();
        }
        top_level.mark_built();

        log::info!(
            "Built {} bottom level structures and {} with {} bytes of scratch",
            bottom_levels.len(),
            top_level.name(),
            scratch.size()
        );
        Ok(())
    }
}
