use crate::{
    storage::{memory, OwnedBuffer},
    Backend, Result,
};
use ash::vk;
use std::sync::Arc;

/// Device local scratch space shared by every build in one submission.
pub struct ScratchBuffer {
    buffer: OwnedBuffer,
    alignment: vk::DeviceSize,
}

impl ScratchBuffer {
    pub fn new(backend: &Arc<dyn Backend>, size: vk::DeviceSize) -> Result<ScratchBuffer> {
        let alignment = backend
            .ray_tracing_properties()
            .min_scratch_offset_alignment
            .max(1) as vk::DeviceSize;

        // Room to slide the start up to the next aligned address.
        let padded_size = memory::align(size, alignment) + alignment;
        let buffer = OwnedBuffer::new(
            backend,
            "acceleration structure build scratch",
            padded_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            memory::device_local(),
        )?;

        Ok(ScratchBuffer { buffer, alignment })
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        memory::align(self.buffer.device_address(), self.alignment)
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}
