use super::{ShaderBindingTable, ShaderBindingTableLayout};
use crate::{
    pipelines::RayTracingPipeline,
    shaders::{ShaderGroup, ShaderStage, ShaderStageKind},
    storage::{memory, OwnedBuffer},
    Backend, Error, Result,
};
use ash::vk;
use std::sync::Arc;

/// Collects the stages of a ray tracing pipeline into raygen, hit and miss
/// groups.
///
/// Every group has a slot reserved up front, so groups can be populated in
/// any order. Shader and group indices are only assigned when the stage and
/// group arrays are derived, always as raygen, hit groups ascending, then
/// miss groups ascending.
pub struct ShaderBindingTableBuilder {
    layout: ShaderBindingTableLayout,
    raygen: Option<ShaderStage>,
    hit_groups: Vec<Option<Vec<ShaderStage>>>,
    miss_groups: Vec<Option<ShaderStage>>,
}

impl ShaderBindingTableBuilder {
    pub fn new(
        num_hit_groups: u32,
        num_miss_groups: u32,
        handle_size: u32,
        group_alignment: u32,
    ) -> Result<ShaderBindingTableBuilder> {
        let layout = ShaderBindingTableLayout::new(
            num_hit_groups,
            num_miss_groups,
            handle_size,
            group_alignment,
        )?;

        Ok(ShaderBindingTableBuilder {
            layout,
            raygen: None,
            hit_groups: vec![None; num_hit_groups as usize],
            miss_groups: vec![None; num_miss_groups as usize],
        })
    }

    /// Uses the backend's handle size and base alignment.
    pub fn for_backend(
        backend: &dyn Backend,
        num_hit_groups: u32,
        num_miss_groups: u32,
    ) -> Result<ShaderBindingTableBuilder> {
        let properties = backend.ray_tracing_properties();
        ShaderBindingTableBuilder::new(
            num_hit_groups,
            num_miss_groups,
            properties.shader_group_handle_size,
            properties.shader_group_base_alignment,
        )
    }

    pub fn layout(&self) -> ShaderBindingTableLayout {
        self.layout
    }

    pub fn set_raygen_stage(&mut self, stage: ShaderStage) -> Result<()> {
        if self.raygen.is_some() {
            return Err(Error::precondition("raygen stage is already set"));
        }
        if stage.kind() != ShaderStageKind::Raygen {
            return Err(Error::precondition(format!(
                "{:?} stage used as the raygen stage",
                stage.kind()
            )));
        }

        self.raygen = Some(stage);
        Ok(())
    }

    /// Fills hit group `group_index` with one closest hit stage and an
    /// optional any hit and intersection stage.
    pub fn add_stages_to_hit_group(
        &mut self,
        stages: Vec<ShaderStage>,
        group_index: u32,
    ) -> Result<()> {
        self.require_raygen()?;
        let slot = match self.hit_groups.get_mut(group_index as usize) {
            Some(slot) => slot,
            None => {
                return Err(Error::precondition(format!(
                    "hit group {} is out of range ({} configured)",
                    group_index, self.layout.num_hit_groups()
                )))
            }
        };
        if slot.is_some() {
            return Err(Error::precondition(format!(
                "hit group {} is already populated",
                group_index
            )));
        }

        if stages.is_empty() || stages.len() > 3 {
            return Err(Error::precondition(format!(
                "hit group {} needs one to three stages, got {}",
                group_index,
                stages.len()
            )));
        }
        for (i, stage) in stages.iter().enumerate() {
            if !stage.kind().is_hit_stage() {
                return Err(Error::precondition(format!(
                    "{:?} stage in hit group {}",
                    stage.kind(),
                    group_index
                )));
            }
            if stages[..i].iter().any(|s| s.kind() == stage.kind()) {
                return Err(Error::precondition(format!(
                    "hit group {} has two {:?} stages",
                    group_index,
                    stage.kind()
                )));
            }
        }
        if !stages.iter().any(|s| s.kind() == ShaderStageKind::ClosestHit) {
            return Err(Error::precondition(format!(
                "hit group {} has no closest hit stage",
                group_index
            )));
        }

        *slot = Some(stages);
        Ok(())
    }

    pub fn add_stage_to_miss_group(&mut self, stage: ShaderStage, group_index: u32) -> Result<()> {
        self.require_raygen()?;
        if stage.kind() != ShaderStageKind::Miss {
            return Err(Error::precondition(format!(
                "{:?} stage in miss group {}",
                stage.kind(),
                group_index
            )));
        }
        let num_miss_groups = self.layout.num_miss_groups();
        let slot = match self.miss_groups.get_mut(group_index as usize) {
            Some(slot) => slot,
            None => {
                return Err(Error::precondition(format!(
                    "miss group {} is out of range ({} configured)",
                    group_index, num_miss_groups
                )))
            }
        };
        if slot.is_some() {
            return Err(Error::precondition(format!(
                "miss group {} is already populated",
                group_index
            )));
        }

        *slot = Some(stage);
        Ok(())
    }

    /// The pipeline's stage array. Fails while any group is unpopulated.
    pub fn stages(&self) -> Result<Vec<ShaderStage>> {
        Ok(self.pipeline_description()?.0)
    }

    /// The pipeline's group array, in table order.
    pub fn groups(&self) -> Result<Vec<ShaderGroup>> {
        Ok(self.pipeline_description()?.1)
    }

    fn pipeline_description(&self) -> Result<(Vec<ShaderStage>, Vec<ShaderGroup>)> {
        let raygen = self.require_raygen()?;
        let mut stages = vec![raygen.clone()];
        let mut groups = vec![ShaderGroup::General { general: 0 }];

        for (group_index, slot) in self.hit_groups.iter().enumerate() {
            let hit_stages = slot.as_ref().ok_or_else(|| {
                Error::precondition(format!("hit group {} was never populated", group_index))
            })?;

            let mut closest_hit = None;
            let mut any_hit = None;
            let mut intersection = None;
            for stage in hit_stages {
                let index = Some(stages.len() as u32);
                match stage.kind() {
                    ShaderStageKind::ClosestHit => closest_hit = index,
                    ShaderStageKind::AnyHit => any_hit = index,
                    ShaderStageKind::Intersection => intersection = index,
                    kind => unreachable!("{:?} stage accepted into a hit group", kind),
                }
                stages.push(stage.clone());
            }

            let closest_hit = closest_hit.ok_or_else(|| {
                Error::precondition(format!("hit group {} has no closest hit stage", group_index))
            })?;
            groups.push(ShaderGroup::TriangleHit {
                closest_hit,
                any_hit,
                intersection,
            });
        }

        for (group_index, slot) in self.miss_groups.iter().enumerate() {
            let stage = slot.as_ref().ok_or_else(|| {
                Error::precondition(format!("miss group {} was never populated", group_index))
            })?;
            groups.push(ShaderGroup::General {
                general: stages.len() as u32,
            });
            stages.push(stage.clone());
        }

        Ok((stages, groups))
    }

    fn require_raygen(&self) -> Result<&ShaderStage> {
        self.raygen
            .as_ref()
            .ok_or_else(|| Error::precondition("raygen stage must be set first"))
    }

    /// Writes every group handle of `pipeline` into a new table buffer.
    pub fn create(
        self,
        backend: &Arc<dyn Backend>,
        pipeline: &RayTracingPipeline,
    ) -> Result<ShaderBindingTable> {
        let layout = self.layout;
        let groups = self.groups()?;
        if pipeline.group_count() != layout.num_groups() || groups.len() as u32 != layout.num_groups()
        {
            return Err(Error::precondition(format!(
                "pipeline has {} groups but the table lays out {}",
                pipeline.group_count(),
                layout.num_groups()
            )));
        }

        let buffer = OwnedBuffer::new(
            backend,
            "shader binding table",
            layout.total_size() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            memory::host_visible(),
        )?;

        let handle_size = layout.handle_size() as usize;
        let handles = backend.shader_group_handles(pipeline.raw(), 0, layout.num_groups())?;
        if handles.len() != handle_size * layout.num_groups() as usize {
            return Err(Error::precondition(format!(
                "expected {} bytes of group handles, got {}",
                handle_size * layout.num_groups() as usize,
                handles.len()
            )));
        }

        for (group, handle) in handles.chunks_exact(handle_size).enumerate() {
            buffer.write_bytes(layout.group_offset(group as u32) as vk::DeviceSize, handle)?;
        }

        log::info!(
            "Shader binding table: {} groups, stride {}, {} bytes",
            layout.num_groups(),
            layout.group_stride(),
            layout.total_size()
        );
        Ok(ShaderBindingTable::new(layout, buffer))
    }
}
