use super::PipelineLayout;
use crate::{
    shader_binding_table::ShaderBindingTableBuilder, shaders::ShaderStage, Backend, Result,
};
use ash::vk;
use std::sync::Arc;

pub struct RayTracingPipeline {
    backend: Arc<dyn Backend>,
    raw: vk::Pipeline,
    group_count: u32,
    max_recursion_depth: u32,
    // Keeps the modules alive for as long as the pipeline.
    _stages: Vec<ShaderStage>,
    layout: PipelineLayout,
}

impl RayTracingPipeline {
    /// Creates a pipeline from the stage and group arrays of `shaders`.
    ///
    /// `max_recursion_depth` is clamped to what the device supports.
    pub fn new(
        backend: &Arc<dyn Backend>,
        shaders: &ShaderBindingTableBuilder,
        layout: PipelineLayout,
        max_recursion_depth: u32,
    ) -> Result<RayTracingPipeline> {
        let stages = shaders.stages()?;
        let groups = shaders.groups()?;

        let device_max = backend.ray_tracing_properties().max_ray_recursion_depth;
        let max_recursion_depth = if max_recursion_depth > device_max {
            log::warn!(
                "Requested ray recursion depth {} but the device supports {}",
                max_recursion_depth,
                device_max
            );
            device_max
        } else {
            max_recursion_depth
        };

        let raw =
            backend.create_ray_tracing_pipeline(&stages, &groups, max_recursion_depth, layout.raw())?;
        log::info!(
            "Created ray tracing pipeline with {} stages in {} groups",
            stages.len(),
            groups.len()
        );

        Ok(RayTracingPipeline {
            backend: backend.clone(),
            raw,
            group_count: groups.len() as u32,
            max_recursion_depth,
            _stages: stages,
            layout,
        })
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn group_count(&self) -> u32 {
        self.group_count
    }

    pub fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            mock::{Call, MockBackend},
            SlotBinding,
        },
        shaders::{ShaderModule, ShaderStageKind},
    };

    fn builder(backend: &Arc<dyn Backend>) -> ShaderBindingTableBuilder {
        let module = ShaderModule::from_bytes(backend, "shaders", &[0; 4]).unwrap();
        let mut builder = ShaderBindingTableBuilder::for_backend(&**backend, 1, 1).unwrap();
        builder
            .set_raygen_stage(module.stage(ShaderStageKind::Raygen))
            .unwrap();
        builder
            .add_stages_to_hit_group(vec![module.stage(ShaderStageKind::ClosestHit)], 0)
            .unwrap();
        builder
            .add_stage_to_miss_group(module.stage(ShaderStageKind::Miss), 0)
            .unwrap();
        builder
    }

    fn layout(backend: &Arc<dyn Backend>) -> PipelineLayout {
        let bindings = [SlotBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
            count: 1,
            stages: vk::ShaderStageFlags::RAYGEN_KHR,
        }];
        PipelineLayout::new(backend, &bindings).unwrap()
    }

    #[test]
    fn recursion_depth_is_clamped_to_the_device_limit() {
        let mock = Arc::new(MockBackend::new());
        let backend: Arc<dyn Backend> = mock.clone();

        let pipeline = RayTracingPipeline::new(&backend, &builder(&backend), layout(&backend), 64)
            .unwrap();

        assert_eq!(pipeline.max_recursion_depth(), 31);
        assert!(mock.calls().iter().any(|c| matches!(
            c,
            Call::CreatePipeline {
                max_recursion_depth: 31,
                ..
            }
        )));
    }

    #[test]
    fn pipeline_receives_stages_in_group_order() {
        let mock = Arc::new(MockBackend::new());
        let backend: Arc<dyn Backend> = mock.clone();

        let pipeline =
            RayTracingPipeline::new(&backend, &builder(&backend), layout(&backend), 2).unwrap();

        assert_eq!(pipeline.group_count(), 3);
        let kinds = mock
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::CreatePipeline { stage_kinds, .. } => Some(stage_kinds),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            kinds,
            vec![
                ShaderStageKind::Raygen,
                ShaderStageKind::ClosestHit,
                ShaderStageKind::Miss
            ]
        );
    }

    #[test]
    fn dropping_the_pipeline_releases_layout_and_modules() {
        let mock = Arc::new(MockBackend::new());
        let backend: Arc<dyn Backend> = mock.clone();

        let pipeline =
            RayTracingPipeline::new(&backend, &builder(&backend), layout(&backend), 1).unwrap();
        assert_eq!(mock.live_objects(), 3);

        drop(pipeline);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn duplicate_bindings_are_rejected() {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let binding = SlotBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        };

        assert!(PipelineLayout::new(&backend, &[binding, binding]).is_err());
    }
}
