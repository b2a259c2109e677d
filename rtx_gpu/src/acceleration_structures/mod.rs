mod acceleration_structure;
mod builder;
mod geometry;
mod instance;
mod scratch_buffer;

pub use acceleration_structure::AccelerationStructure;
pub use builder::AccelerationStructureBuilder;
pub use geometry::{BuildCommand, BuildGeometry, BuildSizes, InstancesGeometry, TriangleGeometry};
pub use instance::{GeometryInstance, InstanceRecord};
pub use scratch_buffer::ScratchBuffer;
