use super::{ShaderBindingRegions, ShaderBindingTableLayout};
use crate::storage::OwnedBuffer;
use ash::vk;

/// A filled shader binding table buffer.
#[derive(Debug)]
pub struct ShaderBindingTable {
    layout: ShaderBindingTableLayout,
    buffer: OwnedBuffer,
}

impl ShaderBindingTable {
    pub(super) fn new(layout: ShaderBindingTableLayout, buffer: OwnedBuffer) -> ShaderBindingTable {
        ShaderBindingTable { layout, buffer }
    }

    pub fn layout(&self) -> ShaderBindingTableLayout {
        self.layout
    }

    pub fn buffer(&self) -> &OwnedBuffer {
        &self.buffer
    }

    pub fn regions(&self) -> ShaderBindingRegions {
        self.layout.regions()
    }

    /// The regions as `vkCmdTraceRaysKHR` takes them.
    pub fn device_regions(&self) -> DeviceAddressRegions {
        let address = self.buffer.device_address();
        let regions = self.regions();

        DeviceAddressRegions {
            raygen: regions.raygen.to_device(address),
            miss: regions.miss.to_device(address),
            hit: regions.hit.to_device(address),
            callable: regions.callable.to_device(address),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceAddressRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}
