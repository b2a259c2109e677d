use crate::scenes::MeshBuffers;
use ash::vk;
use glam::Vec3;
use std::mem;

/// Device addresses and counts describing one indexed triangle list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleGeometry {
    pub vertex_data: vk::DeviceAddress,
    pub vertex_stride: vk::DeviceSize,
    pub vertex_format: vk::Format,
    pub max_vertex: u32,
    pub index_data: vk::DeviceAddress,
    pub index_type: vk::IndexType,
    pub primitive_count: u32,
    pub flags: vk::GeometryFlagsKHR,
}

impl TriangleGeometry {
    pub fn from_mesh(buffers: &MeshBuffers) -> TriangleGeometry {
        TriangleGeometry {
            vertex_data: buffers.positions().device_address(),
            vertex_stride: mem::size_of::<Vec3>() as vk::DeviceSize,
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            max_vertex: buffers.vertex_count().saturating_sub(1),
            index_data: buffers.indices().device_address(),
            index_type: vk::IndexType::UINT32,
            primitive_count: buffers.face_count(),
            flags: vk::GeometryFlagsKHR::OPAQUE,
        }
    }

    fn to_vk(&self) -> vk::AccelerationStructureGeometryKHR {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(self.vertex_format)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.vertex_data,
            })
            .vertex_stride(self.vertex_stride)
            .max_vertex(self.max_vertex)
            .index_type(self.index_type)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.index_data,
            })
            .build();

        vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(self.flags)
            .build()
    }
}

/// A tightly packed array of [`super::InstanceRecord`]s on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstancesGeometry {
    pub data: vk::DeviceAddress,
    pub count: u32,
    pub flags: vk::GeometryFlagsKHR,
}

impl InstancesGeometry {
    fn to_vk(&self) -> vk::AccelerationStructureGeometryKHR {
        let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.data,
            })
            .build();

        vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
            .flags(self.flags)
            .build()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildGeometry {
    Triangles(Vec<TriangleGeometry>),
    Instances(InstancesGeometry),
}

impl BuildGeometry {
    pub fn ty(&self) -> vk::AccelerationStructureTypeKHR {
        match self {
            BuildGeometry::Triangles(_) => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            BuildGeometry::Instances(_) => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }

    pub fn primitive_counts(&self) -> Vec<u32> {
        match self {
            BuildGeometry::Triangles(triangles) => {
                triangles.iter().map(|t| t.primitive_count).collect()
            }
            BuildGeometry::Instances(instances) => vec![instances.count],
        }
    }

    /// The geometry array and the matching build ranges, one per geometry.
    pub fn to_vk(
        &self,
    ) -> (
        Vec<vk::AccelerationStructureGeometryKHR>,
        Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
    ) {
        let geometries = match self {
            BuildGeometry::Triangles(triangles) => triangles.iter().map(|t| t.to_vk()).collect(),
            BuildGeometry::Instances(instances) => vec![instances.to_vk()],
        };
        let ranges = self
            .primitive_counts()
            .into_iter()
            .map(|primitive_count| {
                vk::AccelerationStructureBuildRangeInfoKHR::builder()
                    .primitive_count(primitive_count)
                    .build()
            })
            .collect();

        (geometries, ranges)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSizes {
    pub acceleration_structure_size: vk::DeviceSize,
    pub build_scratch_size: vk::DeviceSize,
    pub update_scratch_size: vk::DeviceSize,
}

/// Everything one recorded build needs besides the command buffer.
#[derive(Clone, Copy, Debug)]
pub struct BuildCommand<'a> {
    pub geometry: &'a BuildGeometry,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub destination: vk::AccelerationStructureKHR,
    pub scratch_address: vk::DeviceAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangles(primitive_count: u32) -> TriangleGeometry {
        TriangleGeometry {
            vertex_data: 0x1000,
            vertex_stride: 12,
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            max_vertex: primitive_count * 3 - 1,
            index_data: 0x2000,
            index_type: vk::IndexType::UINT32,
            primitive_count,
            flags: vk::GeometryFlagsKHR::OPAQUE,
        }
    }

    #[test]
    fn one_range_per_geometry() {
        let geometry = BuildGeometry::Triangles(vec![triangles(2), triangles(7)]);
        let (geometries, ranges) = geometry.to_vk();

        assert_eq!(geometry.ty(), vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL);
        assert_eq!(geometries.len(), 2);
        assert_eq!(
            ranges.iter().map(|r| r.primitive_count).collect::<Vec<_>>(),
            vec![2, 7]
        );
        assert_eq!(geometries[1].geometry_type, vk::GeometryTypeKHR::TRIANGLES);
    }

    #[test]
    fn instances_are_a_single_top_level_geometry() {
        let geometry = BuildGeometry::Instances(InstancesGeometry {
            data: 0x4000,
            count: 3,
            flags: vk::GeometryFlagsKHR::OPAQUE,
        });
        let (geometries, ranges) = geometry.to_vk();

        assert_eq!(geometry.ty(), vk::AccelerationStructureTypeKHR::TOP_LEVEL);
        assert_eq!(geometries[0].geometry_type, vk::GeometryTypeKHR::INSTANCES);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].primitive_count, 3);
    }
}
