pub mod acceleration_structures;
pub mod backend;
pub mod commands;
mod error;
pub mod pipelines;
pub mod renderer;
pub mod scenes;
pub mod shader_binding_table;
pub mod shaders;
pub mod storage;
pub mod vulkan;

pub use backend::Backend;
pub use error::{Error, Result};
