use crate::{Error, Result};
use ash::vk;

/// Byte layout of a shader binding table, derived from the group counts and
/// the device's handle size and group alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderBindingTableLayout {
    handle_size: u32,
    group_stride: u32,
    num_hit_groups: u32,
    num_miss_groups: u32,
}

impl ShaderBindingTableLayout {
    pub fn new(
        num_hit_groups: u32,
        num_miss_groups: u32,
        handle_size: u32,
        group_alignment: u32,
    ) -> Result<ShaderBindingTableLayout> {
        if handle_size == 0 {
            return Err(Error::precondition("shader group handle size is zero"));
        }
        if !group_alignment.is_power_of_two() {
            return Err(Error::precondition(format!(
                "shader group alignment {} is not a power of two",
                group_alignment
            )));
        }
        if group_alignment < handle_size {
            return Err(Error::precondition(format!(
                "shader group alignment {} is smaller than the handle size {}",
                group_alignment, handle_size
            )));
        }
        let total_size = num_hit_groups
            .checked_add(num_miss_groups)
            .and_then(|groups| groups.checked_add(1))
            .and_then(|groups| groups.checked_mul(group_alignment));
        if total_size.is_none() {
            return Err(Error::precondition(format!(
                "{} hit and {} miss groups at stride {} overflow the table size",
                num_hit_groups, num_miss_groups, group_alignment
            )));
        }

        Ok(ShaderBindingTableLayout {
            handle_size,
            group_stride: group_alignment,
            num_hit_groups,
            num_miss_groups,
        })
    }

    pub fn handle_size(&self) -> u32 {
        self.handle_size
    }

    /// Every group occupies exactly one stride, whatever stages it holds.
    pub fn group_stride(&self) -> u32 {
        self.group_stride
    }

    pub fn num_hit_groups(&self) -> u32 {
        self.num_hit_groups
    }

    pub fn num_miss_groups(&self) -> u32 {
        self.num_miss_groups
    }

    pub fn num_groups(&self) -> u32 {
        1 + self.num_hit_groups + self.num_miss_groups
    }

    pub fn raygen_offset(&self) -> u32 {
        0
    }

    pub fn raygen_size(&self) -> u32 {
        self.group_stride
    }

    pub fn hit_groups_offset(&self) -> u32 {
        self.raygen_offset() + self.raygen_size()
    }

    pub fn hit_groups_size(&self) -> u32 {
        self.num_hit_groups * self.group_stride
    }

    pub fn miss_groups_offset(&self) -> u32 {
        self.hit_groups_offset() + self.hit_groups_size()
    }

    pub fn miss_groups_size(&self) -> u32 {
        self.num_miss_groups * self.group_stride
    }

    pub fn total_size(&self) -> u32 {
        self.num_groups() * self.group_stride
    }

    /// Where group `group` (in pipeline group order) starts.
    pub fn group_offset(&self, group: u32) -> u32 {
        group * self.group_stride
    }

    pub fn regions(&self) -> ShaderBindingRegions {
        let stride = self.group_stride as vk::DeviceSize;
        ShaderBindingRegions {
            raygen: StridedRegion {
                offset: self.raygen_offset() as _,
                stride,
                size: self.raygen_size() as _,
            },
            hit: StridedRegion {
                offset: self.hit_groups_offset() as _,
                stride,
                size: self.hit_groups_size() as _,
            },
            miss: StridedRegion {
                offset: self.miss_groups_offset() as _,
                stride,
                size: self.miss_groups_size() as _,
            },
            callable: StridedRegion::default(),
        }
    }
}

/// A byte range of the table relative to its start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StridedRegion {
    pub offset: vk::DeviceSize,
    pub stride: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl StridedRegion {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Empty regions map to a null address.
    pub fn to_device(&self, table_address: vk::DeviceAddress) -> vk::StridedDeviceAddressRegionKHR {
        if self.is_empty() {
            return vk::StridedDeviceAddressRegionKHR::default();
        }

        vk::StridedDeviceAddressRegionKHR::builder()
            .device_address(table_address + self.offset)
            .stride(self.stride)
            .size(self.size)
            .build()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderBindingRegions {
    pub raygen: StridedRegion,
    pub hit: StridedRegion,
    pub miss: StridedRegion,
    pub callable: StridedRegion,
}
