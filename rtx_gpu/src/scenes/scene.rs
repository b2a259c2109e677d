use super::{MeshBuffers, MeshGeometry};
use crate::{
    acceleration_structures::{
        AccelerationStructure, AccelerationStructureBuilder, GeometryInstance, TriangleGeometry,
    },
    storage::BufferInfo,
    Backend, Error, Result,
};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub intensity: f32,
    pub shadow_attenuation: f32,
}

impl Default for Light {
    fn default() -> Self {
        Light {
            position: Vec3::new(0.0, 0.4, 1.0),
            intensity: 0.9,
            shadow_attenuation: 0.1,
        }
    }
}

/// Everything about a scene that is not mesh data.
#[derive(Clone, Debug)]
pub struct SceneConfig {
    pub light: Light,
    pub clear_color: Vec4,
    pub instance_mask: u8,
    pub instance_flags: vk::GeometryInstanceFlagsKHR,
    /// Per mesh placement. Meshes without an entry use the identity.
    pub transforms: Vec<Mat4>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            light: Light::default(),
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            instance_mask: 0xff,
            instance_flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
            transforms: vec![],
        }
    }
}

/// The uniform block shared by every ray tracing stage (std140).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformParams {
    pub clear_color: Vec4,
    /// xyz position, w intensity.
    pub light_position: Vec4,
    /// x light count, y shadow attenuation.
    pub light_info: Vec4,
    /// x render mode, y frame number.
    pub mode_frame: Vec4,
}

/// Meshes on the device plus the two level acceleration structure over them.
pub struct Scene {
    top_level: AccelerationStructure,
    bottom_levels: Vec<AccelerationStructure>,
    meshes: Vec<MeshBuffers>,
    light: Light,
    clear_color: Vec4,
}

impl Scene {
    /// Uploads `meshes`, builds one bottom level structure per mesh and a top
    /// level structure with one instance per mesh.
    ///
    /// Instance `i` has custom index `i`, so shaders can find the mesh's
    /// buffers. A failure while preparing a mesh is reported with its index.
    pub fn build(
        backend: &Arc<dyn Backend>,
        meshes: &[MeshGeometry],
        config: &SceneConfig,
    ) -> Result<Scene> {
        if meshes.is_empty() {
            return Err(Error::precondition("a scene needs at least one mesh"));
        }
        if config.transforms.len() > meshes.len() {
            log::warn!(
                "{} transforms given for {} meshes, the extra ones are ignored",
                config.transforms.len(),
                meshes.len()
            );
        }

        let builder = AccelerationStructureBuilder::new(backend);
        let mut mesh_buffers = Vec::with_capacity(meshes.len());
        let mut bottom_levels = Vec::with_capacity(meshes.len());
        for (index, mesh) in meshes.iter().enumerate() {
            let (buffers, bottom_level) =
                Scene::prepare_mesh(backend, &builder, mesh).map_err(|source| Error::Mesh {
                    index,
                    source: Box::new(source),
                })?;
            mesh_buffers.push(buffers);
            bottom_levels.push(bottom_level);
        }

        let instances: Vec<GeometryInstance> = bottom_levels
            .iter()
            .enumerate()
            .map(|(index, bottom_level)| {
                GeometryInstance::new(bottom_level)
                    .with_custom_index(index as u32)
                    .with_mask(config.instance_mask)
                    .with_flags(config.instance_flags)
                    .with_transform(
                        config
                            .transforms
                            .get(index)
                            .copied()
                            .unwrap_or(Mat4::IDENTITY),
                    )
            })
            .collect();

        // Only needed until the top level build has completed.
        let instance_buffer = builder.upload_instances("scene instances", &instances)?;
        let mut top_level = builder.create_top_level("scene", &instance_buffer)?;
        builder.build(&mut bottom_levels, &mut top_level)?;
        drop(instance_buffer);

        log::info!(
            "Scene built: {} meshes, {} triangles",
            mesh_buffers.len(),
            mesh_buffers.iter().map(|m| m.face_count() as u64).sum::<u64>()
        );

        Ok(Scene {
            top_level,
            bottom_levels,
            meshes: mesh_buffers,
            light: config.light,
            clear_color: config.clear_color,
        })
    }

    fn prepare_mesh(
        backend: &Arc<dyn Backend>,
        builder: &AccelerationStructureBuilder,
        mesh: &MeshGeometry,
    ) -> Result<(MeshBuffers, AccelerationStructure)> {
        let buffers = MeshBuffers::upload(backend, mesh)?;
        let bottom_level = builder.create_bottom_level(
            format!("{} blas", mesh.name),
            vec![TriangleGeometry::from_mesh(&buffers)],
        )?;

        Ok((buffers, bottom_level))
    }

    pub fn meshes(&self) -> &[MeshBuffers] {
        &self.meshes
    }

    pub fn bottom_levels(&self) -> &[AccelerationStructure] {
        &self.bottom_levels
    }

    pub fn top_level(&self) -> &AccelerationStructure {
        &self.top_level
    }

    pub fn light(&self) -> Light {
        self.light
    }

    pub fn attributes_infos(&self) -> Vec<BufferInfo> {
        self.meshes.iter().map(MeshBuffers::attributes_info).collect()
    }

    pub fn faces_infos(&self) -> Vec<BufferInfo> {
        self.meshes.iter().map(MeshBuffers::faces_info).collect()
    }

    pub fn mesh_infos(&self) -> Vec<BufferInfo> {
        self.meshes.iter().map(MeshBuffers::info_info).collect()
    }

    pub fn uniform_params(&self, mode: u32, frame: u32) -> UniformParams {
        UniformParams {
            clear_color: self.clear_color,
            light_position: self.light.position.extend(self.light.intensity),
            light_info: Vec4::new(1.0, self.light.shadow_attenuation, 0.0, 0.0),
            mode_frame: Vec4::new(mode as f32, frame as f32, 0.0, 0.0),
        }
    }
}
