use super::ShaderModule;
use ash::vk;
use std::{ffi::CString, sync::Arc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStageKind {
    Raygen,
    ClosestHit,
    AnyHit,
    Intersection,
    Miss,
}

impl ShaderStageKind {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStageKind::Raygen => vk::ShaderStageFlags::RAYGEN_KHR,
            ShaderStageKind::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            ShaderStageKind::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
            ShaderStageKind::Intersection => vk::ShaderStageFlags::INTERSECTION_KHR,
            ShaderStageKind::Miss => vk::ShaderStageFlags::MISS_KHR,
        }
    }

    pub fn is_hit_stage(self) -> bool {
        matches!(
            self,
            ShaderStageKind::ClosestHit | ShaderStageKind::AnyHit | ShaderStageKind::Intersection
        )
    }
}

/// A shader module entry point bound to the stage it runs in.
#[derive(Clone, Debug)]
pub struct ShaderStage {
    kind: ShaderStageKind,
    module: Arc<ShaderModule>,
    entry_point: CString,
}

impl ShaderStage {
    pub fn new(kind: ShaderStageKind, module: Arc<ShaderModule>) -> ShaderStage {
        ShaderStage::with_entry_point(kind, module, c"main".to_owned())
    }

    pub fn with_entry_point(
        kind: ShaderStageKind,
        module: Arc<ShaderModule>,
        entry_point: CString,
    ) -> ShaderStage {
        ShaderStage {
            kind,
            module,
            entry_point,
        }
    }

    pub fn kind(&self) -> ShaderStageKind {
        self.kind
    }

    pub fn module(&self) -> &ShaderModule {
        &self.module
    }

    pub fn entry_point(&self) -> &CString {
        &self.entry_point
    }
}

/// A pipeline shader group, referencing stages by their index in the
/// pipeline's stage array. `None` is `VK_SHADER_UNUSED_KHR`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderGroup {
    General {
        general: u32,
    },
    TriangleHit {
        closest_hit: u32,
        any_hit: Option<u32>,
        intersection: Option<u32>,
    },
}

impl ShaderGroup {
    pub fn to_vk(&self) -> vk::RayTracingShaderGroupCreateInfoKHR {
        let unused = vk::SHADER_UNUSED_KHR;
        match *self {
            ShaderGroup::General { general } => vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(general)
                .closest_hit_shader(unused)
                .any_hit_shader(unused)
                .intersection_shader(unused)
                .build(),
            ShaderGroup::TriangleHit {
                closest_hit,
                any_hit,
                intersection,
            } => {
                let ty = if intersection.is_some() {
                    vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP
                } else {
                    vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
                };

                vk::RayTracingShaderGroupCreateInfoKHR::builder()
                    .ty(ty)
                    .general_shader(unused)
                    .closest_hit_shader(closest_hit)
                    .any_hit_shader(any_hit.unwrap_or(unused))
                    .intersection_shader(intersection.unwrap_or(unused))
                    .build()
            }
        }
    }
}
