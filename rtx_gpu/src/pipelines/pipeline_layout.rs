use crate::{
    backend::{PipelineLayoutHandles, SlotBinding},
    Backend, Error, Result,
};
use ash::vk;
use std::sync::Arc;

/// A pipeline layout over a single descriptor set.
pub struct PipelineLayout {
    backend: Arc<dyn Backend>,
    handles: PipelineLayoutHandles,
    bindings: Vec<SlotBinding>,
}

impl PipelineLayout {
    pub fn new(backend: &Arc<dyn Backend>, bindings: &[SlotBinding]) -> Result<PipelineLayout> {
        for (i, binding) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|b| b.binding == binding.binding) {
                return Err(Error::precondition(format!(
                    "descriptor binding {} is declared twice",
                    binding.binding
                )));
            }
            if binding.count == 0 {
                return Err(Error::precondition(format!(
                    "descriptor binding {} has no descriptors",
                    binding.binding
                )));
            }
        }

        let handles = backend.create_pipeline_layout(bindings)?;

        Ok(PipelineLayout {
            backend: backend.clone(),
            handles,
            bindings: bindings.to_vec(),
        })
    }

    pub fn raw(&self) -> vk::PipelineLayout {
        self.handles.pipeline_layout
    }

    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.handles.descriptor_set_layout
    }

    pub fn bindings(&self) -> &[SlotBinding] {
        &self.bindings
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.backend.destroy_pipeline_layout(self.handles);
    }
}
