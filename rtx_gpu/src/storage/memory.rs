use ash::vk;
use num_traits::{PrimInt, Unsigned};

pub fn align<T: PrimInt + Unsigned + From<u8>>(size_or_address: T, alignment: T) -> T {
    (size_or_address + (alignment - <T as From<u8>>::from(1)))
        & !(alignment - <T as From<u8>>::from(1))
}

/// Memory that the host can write through a mapping without explicit flushes.
pub fn host_visible() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
}

pub fn device_local() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::DEVICE_LOCAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_the_next_multiple() {
        assert_eq!(align(0u32, 64), 0);
        assert_eq!(align(1u32, 64), 64);
        assert_eq!(align(32u32, 64), 64);
        assert_eq!(align(64u32, 64), 64);
        assert_eq!(align(65u64, 256), 256);
    }

    #[test]
    fn align_leaves_aligned_addresses_alone() {
        assert_eq!(align(0x1000u64, 128), 0x1000);
        assert_eq!(align(0x1001u64, 128), 0x1080);
    }
}
