use env_logger::Env;
use rtx_gpu::{
    renderer::{PathTracer, PathTracerConfig, RendererVariant},
    vulkan::{Device, DeviceConfig, VulkanBackend},
    Backend,
};
use std::{path::PathBuf, sync::Arc};

mod scenes;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(error) = run() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

fn run() -> rtx_gpu::Result<()> {
    let mut config = PathTracerConfig {
        resolution: (1920, 1080),
        scene: scenes::example_scene_config(),
        ..PathTracerConfig::default()
    };
    if let Some(directory) = std::env::args().nth(1) {
        config.shader_directory = PathBuf::from(directory);
    }

    let mut path_tracer = PathTracer::new(config, scenes::example_meshes());
    let settings = path_tracer.configure();
    log::info!("Render settings: {:?}", settings);

    let device = Device::new(&DeviceConfig {
        application_name: settings.name,
        validation: settings.validation,
    })?;
    let backend: Arc<dyn Backend> = Arc::new(VulkanBackend::new(device));

    path_tracer.build_scene(&backend)?;

    if let Some(table) = path_tracer.shader_binding_table() {
        log::info!("Shader binding table regions: {:?}", table.regions());
    }
    if let Some(scene) = path_tracer.scene() {
        log::info!(
            "Scene: {} meshes, top level at {:#x}",
            scene.meshes().len(),
            scene.top_level().device_handle()
        );
    }

    Ok(())
}
