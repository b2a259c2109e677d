use crate::{Backend, Error, Result};
use ash::vk;
use bytemuck::Pod;
use std::{fmt, mem, sync::Arc};

/// A backend buffer that is destroyed when dropped.
pub struct OwnedBuffer {
    backend: Arc<dyn Backend>,
    name: String,
    raw: vk::Buffer,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl OwnedBuffer {
    pub fn new(
        backend: &Arc<dyn Backend>,
        name: impl Into<String>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    ) -> Result<OwnedBuffer> {
        let name = name.into();
        if size == 0 {
            return Err(Error::precondition(format!(
                "buffer {} would be empty",
                name
            )));
        }

        log::debug!("Allocating {:?} ({} bytes)", name, size);
        let raw = backend.create_buffer(&name, size, usage, memory)?;

        Ok(OwnedBuffer {
            backend: backend.clone(),
            name,
            raw,
            size,
            usage,
        })
    }

    /// Creates a host visible buffer sized to `data` and uploads it.
    pub fn new_from_data<T: Pod>(
        backend: &Arc<dyn Backend>,
        name: impl Into<String>,
        data: &[T],
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    ) -> Result<OwnedBuffer> {
        let size = (data.len() * mem::size_of::<T>()) as vk::DeviceSize;
        let buffer = OwnedBuffer::new(backend, name, size, usage, memory)?;
        buffer.fill(data)?;

        Ok(buffer)
    }

    pub fn fill<T: Pod>(&self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize != self.size {
            return Err(Error::precondition(format!(
                "filling {} with {} bytes but it holds {}",
                self.name,
                bytes.len(),
                self.size
            )));
        }

        self.write_bytes(0, bytes)
    }

    /// Writes `bytes` at `offset`, leaving the rest of the buffer untouched.
    pub fn write_bytes(&self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() as vk::DeviceSize > self.size {
            return Err(Error::precondition(format!(
                "write of {} bytes at {} overruns {} ({} bytes)",
                bytes.len(),
                offset,
                self.name,
                self.size
            )));
        }

        self.backend.write_buffer(self.raw, offset, bytes)
    }

    pub fn read_bytes(&self, offset: vk::DeviceSize, len: usize) -> Result<Vec<u8>> {
        self.backend.read_buffer(self.raw, offset, len)
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        self.backend.buffer_device_address(self.raw)
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            buffer: self.raw,
            offset: 0,
            range: self.size,
        }
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of `T` elements the buffer holds.
    pub fn count<T>(&self) -> usize {
        self.size as usize / mem::size_of::<T>()
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        log::debug!("Freeing {:?}", self.name);
        self.backend.destroy_buffer(self.raw);
    }
}

impl fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedBuffer({}|{:?}|{})", self.name, self.raw, self.size)
    }
}

/// What a descriptor write needs to bind a whole buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

impl BufferInfo {
    pub fn to_vk(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: self.offset,
            range: self.range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::storage::memory;

    #[test]
    fn dropping_releases_the_buffer() {
        let mock = Arc::new(MockBackend::new());
        let backend: Arc<dyn Backend> = mock.clone();

        let buffer = OwnedBuffer::new(
            &backend,
            "test",
            128,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            memory::host_visible(),
        )
        .unwrap();
        assert_eq!(mock.live_buffers(), 1);

        drop(buffer);
        assert_eq!(mock.live_buffers(), 0);
    }

    #[test]
    fn new_from_data_uploads_the_bytes() {
        let mock = Arc::new(MockBackend::new());
        let backend: Arc<dyn Backend> = mock.clone();

        let data = [1u32, 2, 3];
        let buffer = OwnedBuffer::new_from_data(
            &backend,
            "indices",
            &data,
            vk::BufferUsageFlags::INDEX_BUFFER,
            memory::host_visible(),
        )
        .unwrap();

        assert_eq!(buffer.size(), 12);
        assert_eq!(buffer.count::<u32>(), 3);
        assert_eq!(
            buffer.read_bytes(0, 12).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&data)
        );
    }

    #[test]
    fn empty_buffers_are_rejected() {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());

        let result = OwnedBuffer::new(
            &backend,
            "nothing",
            0,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            memory::host_visible(),
        );
        assert!(matches!(result, Err(Error::PreconditionViolation(_))));
    }

    #[test]
    fn writes_past_the_end_are_rejected() {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let buffer = OwnedBuffer::new(
            &backend,
            "small",
            16,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            memory::host_visible(),
        )
        .unwrap();

        assert!(buffer.write_bytes(8, &[0; 8]).is_ok());
        assert!(matches!(
            buffer.write_bytes(12, &[0; 8]),
            Err(Error::PreconditionViolation(_))
        ));
    }
}
