use super::AccelerationStructure;
use crate::{Error, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

const MAX_24_BIT: u32 = (1 << 24) - 1;

/// A placement of a bottom level structure in the top level structure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryInstance {
    transform: Mat4,
    custom_index: u32,
    mask: u8,
    sbt_offset: u32,
    flags: vk::GeometryInstanceFlagsKHR,
    acceleration_structure: vk::DeviceAddress,
}

impl GeometryInstance {
    pub fn new(bottom_level: &AccelerationStructure) -> GeometryInstance {
        GeometryInstance::from_device_handle(bottom_level.device_handle())
    }

    pub fn from_device_handle(acceleration_structure: vk::DeviceAddress) -> GeometryInstance {
        GeometryInstance {
            transform: Mat4::IDENTITY,
            custom_index: 0,
            mask: 0xff,
            sbt_offset: 0,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
            acceleration_structure,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    /// Exposed to shaders as `gl_InstanceCustomIndexEXT`.
    pub fn with_custom_index(mut self, custom_index: u32) -> Self {
        self.custom_index = custom_index;
        self
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_sbt_offset(mut self, sbt_offset: u32) -> Self {
        self.sbt_offset = sbt_offset;
        self
    }

    pub fn with_flags(mut self, flags: vk::GeometryInstanceFlagsKHR) -> Self {
        self.flags = flags;
        self
    }

    pub fn acceleration_structure(&self) -> vk::DeviceAddress {
        self.acceleration_structure
    }

    pub fn to_record(&self) -> Result<InstanceRecord> {
        if self.custom_index > MAX_24_BIT {
            return Err(Error::precondition(format!(
                "instance custom index {} does not fit in 24 bits",
                self.custom_index
            )));
        }
        if self.sbt_offset > MAX_24_BIT {
            return Err(Error::precondition(format!(
                "instance SBT offset {} does not fit in 24 bits",
                self.sbt_offset
            )));
        }
        let flags = self.flags.as_raw();
        if flags > 0xff {
            return Err(Error::precondition(format!(
                "instance flags {:?} do not fit in 8 bits",
                self.flags
            )));
        }

        // Row major 3x4: the first three rows of the matrix.
        let rows = self.transform.transpose().to_cols_array();
        let mut transform = [0.0; 12];
        transform.copy_from_slice(&rows[..12]);

        Ok(InstanceRecord {
            transform,
            custom_index_and_mask: self.custom_index | (self.mask as u32) << 24,
            sbt_offset_and_flags: self.sbt_offset | flags << 24,
            acceleration_structure_reference: self.acceleration_structure,
        })
    }
}

/// The device layout of `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub transform: [f32; 12],
    pub custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

impl InstanceRecord {
    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & MAX_24_BIT
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    pub fn sbt_offset(&self) -> u32 {
        self.sbt_offset_and_flags & MAX_24_BIT
    }

    pub fn flags(&self) -> vk::GeometryInstanceFlagsKHR {
        vk::GeometryInstanceFlagsKHR::from_raw(self.sbt_offset_and_flags >> 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::mem;

    #[test]
    fn record_matches_the_vulkan_layout() {
        assert_eq!(mem::size_of::<InstanceRecord>(), 64);
        assert_eq!(
            mem::size_of::<InstanceRecord>(),
            mem::size_of::<vk::AccelerationStructureInstanceKHR>()
        );
    }

    #[test]
    fn packs_index_mask_and_flags() {
        let record = GeometryInstance::from_device_handle(0xdead_beef_0000)
            .with_custom_index(7)
            .with_mask(0x0f)
            .with_sbt_offset(1)
            .to_record()
            .unwrap();

        assert_eq!(record.custom_index(), 7);
        assert_eq!(record.mask(), 0x0f);
        assert_eq!(record.sbt_offset(), 1);
        assert_eq!(
            record.flags(),
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE
        );
        assert_eq!(record.acceleration_structure_reference, 0xdead_beef_0000);
    }

    #[test]
    fn transform_is_stored_row_major() {
        let record = GeometryInstance::from_device_handle(1)
            .with_transform(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)))
            .to_record()
            .unwrap();

        assert_eq!(
            record.transform,
            [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0]
        );
    }

    #[test]
    fn oversized_custom_index_is_rejected() {
        let result = GeometryInstance::from_device_handle(1)
            .with_custom_index(1 << 24)
            .to_record();

        assert!(matches!(result, Err(Error::PreconditionViolation(_))));
    }
}
