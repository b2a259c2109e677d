mod path_tracer;

pub use path_tracer::{Camera, CameraUniformParams, PathTracer, PathTracerConfig};

use crate::{commands::OneTimeCommands, Backend, Result};
use ash::vk;
use std::sync::Arc;

/// What a renderer needs from the device and window before it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderSettings {
    pub name: String,
    pub resolution: (u32, u32),
    pub validation: bool,
}

/// The hooks a renderer variant plugs into the application loop.
pub trait RendererVariant {
    fn configure(&self) -> RenderSettings;

    /// Creates every scene and pipeline resource. Called once.
    fn build_scene(&mut self, backend: &Arc<dyn Backend>) -> Result<()>;

    fn record_frame(
        &self,
        commands: &OneTimeCommands,
        descriptor_sets: &[vk::DescriptorSet],
    ) -> Result<()>;
}
