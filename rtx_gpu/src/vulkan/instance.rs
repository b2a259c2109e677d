use crate::{backend::calls, Error, Result};
use ash::vk;
use log::{info, warn};
use std::{
    ffi::{CStr, CString},
    os::raw::c_char,
};

const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";

/// A headless Vulkan 1.2 instance. No surface extensions are requested.
pub struct VulkanInstance {
    entry: ash::Entry,
    raw: ash::Instance,
}

impl VulkanInstance {
    pub fn new(application_name: &str, validation: bool) -> Result<VulkanInstance> {
        let entry = ash::Entry::linked();

        let application_name = CString::new(application_name)
            .map_err(|_| Error::precondition("application name contains a nul byte"))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&application_name)
            .api_version(vk::API_VERSION_1_2);

        let mut layers: Vec<*const c_char> = vec![];
        if validation {
            if Self::has_validation_layer(&entry) {
                layers.push(VALIDATION_LAYER.as_ptr() as *const c_char);
            } else {
                warn!("Validation requested but the Khronos validation layer is not installed");
            }
        }
        info!("Requested layers: {}", layers.len());

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|result| Error::backend(calls::CREATE_INSTANCE, "instance", result))?;

        Ok(VulkanInstance { entry, raw })
    }

    fn has_validation_layer(entry: &ash::Entry) -> bool {
        let wanted = CStr::from_bytes_with_nul(VALIDATION_LAYER).ok();
        entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default()
            .iter()
            .any(|layer| Some(unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == wanted)
    }

    pub fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
        unsafe { self.raw.enumerate_physical_devices() }
            .map_err(|result| Error::backend(calls::ENUMERATE_PHYSICAL_DEVICES, "instance", result))
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub unsafe fn raw(&self) -> &ash::Instance {
        &self.raw
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            self.raw.destroy_instance(None);
        }
    }
}
