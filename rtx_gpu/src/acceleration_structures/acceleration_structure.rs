use super::{BuildCommand, BuildGeometry, BuildSizes};
use crate::{
    storage::{memory, OwnedBuffer},
    Backend, Result,
};
use ash::vk;
use std::{fmt, sync::Arc};

/// One bottom or top level acceleration structure and the memory behind it.
///
/// Built at most once. The device handle is fixed when the structure is
/// created, so instances can reference it before the build is submitted.
pub struct AccelerationStructure {
    backend: Arc<dyn Backend>,
    name: String,
    geometry: BuildGeometry,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    sizes: BuildSizes,
    raw: vk::AccelerationStructureKHR,
    device_handle: vk::DeviceAddress,
    built: bool,
    // Dropped after the structure itself is destroyed.
    buffer: OwnedBuffer,
}

impl AccelerationStructure {
    pub(super) fn new(
        backend: &Arc<dyn Backend>,
        name: impl Into<String>,
        geometry: BuildGeometry,
    ) -> Result<AccelerationStructure> {
        let name = name.into();
        let flags = vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
        let sizes = backend.acceleration_structure_build_sizes(&geometry, flags);

        let buffer = OwnedBuffer::new(
            backend,
            format!("{} storage", name),
            sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            memory::device_local(),
        )?;

        let raw = backend.create_acceleration_structure(
            &name,
            geometry.ty(),
            buffer.raw(),
            sizes.acceleration_structure_size,
        )?;
        let device_handle = backend.acceleration_structure_device_address(raw);
        log::debug!(
            "Created {:?} {} ({} bytes, {} scratch)",
            geometry.ty(),
            name,
            sizes.acceleration_structure_size,
            sizes.build_scratch_size
        );

        Ok(AccelerationStructure {
            backend: backend.clone(),
            name,
            geometry,
            flags,
            sizes,
            raw,
            device_handle,
            built: false,
            buffer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> vk::AccelerationStructureTypeKHR {
        self.geometry.ty()
    }

    pub fn geometry(&self) -> &BuildGeometry {
        &self.geometry
    }

    pub fn flags(&self) -> vk::BuildAccelerationStructureFlagsKHR {
        self.flags
    }

    pub fn sizes(&self) -> BuildSizes {
        self.sizes
    }

    pub fn raw(&self) -> vk::AccelerationStructureKHR {
        self.raw
    }

    /// The 64-bit reference instances use to point at this structure.
    pub fn device_handle(&self) -> vk::DeviceAddress {
        self.device_handle
    }

    pub fn buffer(&self) -> &OwnedBuffer {
        &self.buffer
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub(crate) fn build_command(&self, scratch_address: vk::DeviceAddress) -> BuildCommand<'_> {
        BuildCommand {
            geometry: &self.geometry,
            flags: self.flags,
            destination: self.raw,
            scratch_address,
        }
    }

    pub(super) fn mark_built(&mut self) {
        self.built = true;
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        log::debug!("Destroying acceleration structure {:?}", self.name);
        self.backend.destroy_acceleration_structure(self.raw);
    }
}

impl fmt::Debug for AccelerationStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelerationStructure")
            .field("name", &self.name)
            .field("ty", &self.ty())
            .field("raw", &self.raw)
            .field("device_handle", &self.device_handle)
            .field("built", &self.built)
            .finish()
    }
}
