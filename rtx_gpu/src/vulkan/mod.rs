//! The ash implementation of [`crate::Backend`].

mod backend;
mod device;
mod instance;

pub use backend::VulkanBackend;
pub use device::{Device, DeviceConfig};
pub use instance::VulkanInstance;
