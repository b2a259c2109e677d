mod shader_groups;
mod shader_module;

pub use shader_groups::{ShaderGroup, ShaderStage, ShaderStageKind};
pub use shader_module::ShaderModule;
