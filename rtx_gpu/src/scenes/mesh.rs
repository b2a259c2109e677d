use crate::{
    storage::{memory, BufferInfo, OwnedBuffer},
    Backend, Error, Result,
};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec3, Vec4};
use std::sync::Arc;

/// Per vertex shading data, laid out as two std430 `vec4`s.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexAttribute {
    pub normal: Vec4,
    pub uv: Vec4,
}

impl VertexAttribute {
    pub fn new(normal: Vec3, uv: (f32, f32)) -> VertexAttribute {
        VertexAttribute {
            normal: normal.extend(0.0),
            uv: Vec4::new(uv.0, uv.1, 0.0, 0.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshMaterial {
    pub color: Vec4,
    pub diffuse: f32,
    pub specular: f32,
    pub reflect: f32,
}

impl MeshMaterial {
    /// The mesh info buffer contents: colour, then diffuse/specular/reflect.
    pub fn to_info(&self) -> [Vec4; 2] {
        [
            self.color,
            Vec4::new(self.diffuse, self.specular, self.reflect, 0.0),
        ]
    }
}

impl Default for MeshMaterial {
    fn default() -> Self {
        MeshMaterial {
            color: Vec4::ONE,
            diffuse: 0.2,
            specular: 0.2,
            reflect: 0.0,
        }
    }
}

/// An indexed triangle mesh as it arrives from a loader.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshGeometry {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub attributes: Vec<VertexAttribute>,
    pub material: MeshMaterial,
}

impl MeshGeometry {
    pub fn new(
        name: impl Into<String>,
        positions: Vec<Vec3>,
        indices: Vec<u32>,
        attributes: Vec<VertexAttribute>,
    ) -> MeshGeometry {
        MeshGeometry {
            name: name.into(),
            positions,
            indices,
            attributes,
            material: MeshMaterial::default(),
        }
    }

    pub fn with_material(mut self, material: MeshMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn face_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidGeometry {
            mesh: self.name.clone(),
            reason,
        };

        if self.positions.is_empty() {
            return Err(invalid("no vertices".to_string()));
        }
        if self.indices.is_empty() {
            return Err(invalid("no triangles".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(invalid(format!(
                "{} indices is not a whole number of triangles",
                self.indices.len()
            )));
        }
        if let Some(index) = self.indices.iter().find(|&&i| i >= self.vertex_count()) {
            return Err(invalid(format!(
                "index {} is out of range for {} vertices",
                index,
                self.vertex_count()
            )));
        }
        if self.attributes.len() != self.positions.len() {
            return Err(invalid(format!(
                "{} attributes for {} vertices",
                self.attributes.len(),
                self.positions.len()
            )));
        }

        Ok(())
    }

    /// Triangle indices padded to `uvec4` for shader lookup.
    pub fn faces(&self) -> Vec<UVec4> {
        self.indices
            .chunks_exact(3)
            .map(|t| UVec4::new(t[0], t[1], t[2], 0))
            .collect()
    }
}

/// The device copies of one mesh.
#[derive(Debug)]
pub struct MeshBuffers {
    name: String,
    positions: OwnedBuffer,
    indices: OwnedBuffer,
    attributes: OwnedBuffer,
    faces: OwnedBuffer,
    info: OwnedBuffer,
    vertex_count: u32,
    face_count: u32,
}

impl MeshBuffers {
    pub fn upload(backend: &Arc<dyn Backend>, mesh: &MeshGeometry) -> Result<MeshBuffers> {
        mesh.validate()?;

        let build_input = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let storage =
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let positions = OwnedBuffer::new_from_data(
            backend,
            format!("{} positions", mesh.name),
            &mesh.positions,
            vk::BufferUsageFlags::VERTEX_BUFFER | build_input,
            memory::host_visible(),
        )?;
        let indices = OwnedBuffer::new_from_data(
            backend,
            format!("{} indices", mesh.name),
            &mesh.indices,
            vk::BufferUsageFlags::INDEX_BUFFER | build_input,
            memory::host_visible(),
        )?;
        let attributes = OwnedBuffer::new_from_data(
            backend,
            format!("{} attributes", mesh.name),
            &mesh.attributes,
            storage,
            memory::host_visible(),
        )?;
        let faces = OwnedBuffer::new_from_data(
            backend,
            format!("{} faces", mesh.name),
            &mesh.faces(),
            storage,
            memory::host_visible(),
        )?;
        let info = OwnedBuffer::new_from_data(
            backend,
            format!("{} info", mesh.name),
            &mesh.material.to_info(),
            storage,
            memory::host_visible(),
        )?;

        Ok(MeshBuffers {
            name: mesh.name.clone(),
            positions,
            indices,
            attributes,
            faces,
            info,
            vertex_count: mesh.vertex_count(),
            face_count: mesh.face_count(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn positions(&self) -> &OwnedBuffer {
        &self.positions
    }

    pub fn indices(&self) -> &OwnedBuffer {
        &self.indices
    }

    pub fn attributes(&self) -> &OwnedBuffer {
        &self.attributes
    }

    pub fn faces(&self) -> &OwnedBuffer {
        &self.faces
    }

    pub fn info(&self) -> &OwnedBuffer {
        &self.info
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn face_count(&self) -> u32 {
        self.face_count
    }

    pub fn attributes_info(&self) -> BufferInfo {
        self.attributes.info()
    }

    pub fn faces_info(&self) -> BufferInfo {
        self.faces.info()
    }

    pub fn info_info(&self) -> BufferInfo {
        self.info.info()
    }
}
