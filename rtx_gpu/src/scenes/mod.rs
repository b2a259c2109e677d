mod mesh;
mod scene;
pub mod shapes;

pub use mesh::{MeshBuffers, MeshGeometry, MeshMaterial, VertexAttribute};
pub use scene::{Light, Scene, SceneConfig, UniformParams};
