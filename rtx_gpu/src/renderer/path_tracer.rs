use super::{RenderSettings, RendererVariant};
use crate::{
    backend::SlotBinding,
    commands::OneTimeCommands,
    pipelines::{PipelineLayout, RayTracingPipeline},
    scenes::{MeshGeometry, Scene, SceneConfig},
    shader_binding_table::{ShaderBindingTable, ShaderBindingTableBuilder},
    shaders::{ShaderModule, ShaderStageKind},
    storage::{memory, OwnedBuffer},
    Backend, Error, Result,
};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use std::{collections::HashMap, io, path::PathBuf, sync::Arc};

const PRIMARY_HIT_GROUP: u32 = 0;
const INDIRECT_HIT_GROUP: u32 = 1;
const PRIMARY_MISS_GROUP: u32 = 0;
const INDIRECT_MISS_GROUP: u32 = 1;
const SHADOW_MISS_GROUP: u32 = 2;

const TLAS_BINDING: u32 = 0;
const OUTPUT_IMAGE_BINDING: u32 = 1;
const CAMERA_BINDING: u32 = 2;
const UNIFORM_PARAMS_BINDING: u32 = 3;
const ATTRIBUTES_BINDING: u32 = 4;
const FACES_BINDING: u32 = 5;
const MESH_INFO_BINDING: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub near: f32,
    pub far: f32,
    pub fov_y_degrees: f32,
}

impl Camera {
    pub fn to_uniform(&self) -> CameraUniformParams {
        let direction = self.direction.normalize_or_zero();
        let side = direction.cross(self.up).normalize_or_zero();
        let up = side.cross(direction);

        CameraUniformParams {
            position: self.position.extend(0.0),
            direction: direction.extend(0.0),
            up: up.extend(0.0),
            side: side.extend(0.0),
            near_far_fov: Vec4::new(self.near, self.far, self.fov_y_degrees.to_radians(), 0.0),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Camera {
            position: Vec3::new(0.0, 0.5, 3.0),
            direction: -Vec3::Z,
            up: Vec3::Y,
            near: 0.1,
            far: 100.0,
            fov_y_degrees: 45.0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniformParams {
    pub position: Vec4,
    pub direction: Vec4,
    pub up: Vec4,
    pub side: Vec4,
    pub near_far_fov: Vec4,
}

#[derive(Clone, Debug)]
pub struct PathTracerConfig {
    pub resolution: (u32, u32),
    pub max_recursion_depth: u32,
    /// Where the `.bin` shader resources live.
    pub shader_directory: PathBuf,
    pub validation: bool,
    pub camera: Camera,
    pub scene: SceneConfig,
}

impl Default for PathTracerConfig {
    fn default() -> Self {
        PathTracerConfig {
            resolution: (1280, 720),
            max_recursion_depth: 1,
            shader_directory: PathBuf::from("_data/shaders"),
            validation: false,
            camera: Camera::default(),
            scene: SceneConfig::default(),
        }
    }
}

enum ShaderSource {
    Directory(PathBuf),
    Blobs(HashMap<String, Vec<u8>>),
}

struct PathTracerResources {
    shader_binding_table: ShaderBindingTable,
    pipeline: RayTracingPipeline,
    camera: OwnedBuffer,
    uniform_params: OwnedBuffer,
    scene: Scene,
}

/// A path tracer with primary, indirect and shadow rays.
///
/// Hit groups: primary (closest hit + any hit), indirect (closest hit).
/// Miss groups: primary, indirect, shadow.
pub struct PathTracer {
    config: PathTracerConfig,
    meshes: Vec<MeshGeometry>,
    shaders: ShaderSource,
    resources: Option<PathTracerResources>,
}

impl PathTracer {
    pub const SHADER_NAMES: [&'static str; 7] = [
        "ray_gen",
        "ray_chit",
        "ray_anyhit",
        "indirect_ray_chit",
        "ray_miss",
        "indirect_ray_miss",
        "shadow_ray_miss",
    ];

    /// Shaders are read from `config.shader_directory` when the scene is
    /// built.
    pub fn new(config: PathTracerConfig, meshes: Vec<MeshGeometry>) -> PathTracer {
        let shaders = ShaderSource::Directory(config.shader_directory.clone());
        PathTracer {
            config,
            meshes,
            shaders,
            resources: None,
        }
    }

    /// Uses in-memory shader blobs keyed by resource name.
    pub fn with_shader_blobs(
        config: PathTracerConfig,
        meshes: Vec<MeshGeometry>,
        blobs: HashMap<String, Vec<u8>>,
    ) -> PathTracer {
        PathTracer {
            config,
            meshes,
            shaders: ShaderSource::Blobs(blobs),
            resources: None,
        }
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.resources.as_ref().map(|r| &r.scene)
    }

    pub fn shader_binding_table(&self) -> Option<&ShaderBindingTable> {
        self.resources.as_ref().map(|r| &r.shader_binding_table)
    }

    pub fn pipeline(&self) -> Option<&RayTracingPipeline> {
        self.resources.as_ref().map(|r| &r.pipeline)
    }

    pub fn camera_buffer(&self) -> Option<&OwnedBuffer> {
        self.resources.as_ref().map(|r| &r.camera)
    }

    pub fn uniform_params_buffer(&self) -> Option<&OwnedBuffer> {
        self.resources.as_ref().map(|r| &r.uniform_params)
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.config.camera = camera;
    }

    /// Rewrites the camera and uniform params for the next frame.
    pub fn update_frame(&self, frame: u32, mode: u32) -> Result<()> {
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| Error::precondition("path tracer scene has not been built"))?;

        resources.camera.fill(&[self.config.camera.to_uniform()])?;
        resources
            .uniform_params
            .fill(&[resources.scene.uniform_params(mode, frame)])
    }

    /// The single descriptor set the pipeline reads.
    pub fn slot_bindings(mesh_count: u32) -> Vec<SlotBinding> {
        let hit = vk::ShaderStageFlags::CLOSEST_HIT_KHR | vk::ShaderStageFlags::ANY_HIT_KHR;
        let binding = |binding, descriptor_type, count, stages| SlotBinding {
            binding,
            descriptor_type,
            count,
            stages,
        };

        vec![
            binding(
                TLAS_BINDING,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                1,
                vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            ),
            binding(
                OUTPUT_IMAGE_BINDING,
                vk::DescriptorType::STORAGE_IMAGE,
                1,
                vk::ShaderStageFlags::RAYGEN_KHR,
            ),
            binding(
                CAMERA_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::RAYGEN_KHR,
            ),
            binding(
                UNIFORM_PARAMS_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::ALL,
            ),
            binding(
                ATTRIBUTES_BINDING,
                vk::DescriptorType::STORAGE_BUFFER,
                mesh_count,
                hit,
            ),
            binding(FACES_BINDING, vk::DescriptorType::STORAGE_BUFFER, mesh_count, hit),
            binding(
                MESH_INFO_BINDING,
                vk::DescriptorType::STORAGE_BUFFER,
                mesh_count,
                hit,
            ),
        ]
    }

    fn load_shader(&self, backend: &Arc<dyn Backend>, name: &str) -> Result<Arc<ShaderModule>> {
        match &self.shaders {
            ShaderSource::Directory(directory) => ShaderModule::load(backend, directory, name),
            ShaderSource::Blobs(blobs) => match blobs.get(name) {
                Some(code) => ShaderModule::from_bytes(backend, name, code),
                None => Err(Error::ShaderResource {
                    path: PathBuf::from(name),
                    source: io::Error::new(io::ErrorKind::NotFound, "no blob with this name"),
                }),
            },
        }
    }

    fn shader_binding_table_builder(
        &self,
        backend: &Arc<dyn Backend>,
    ) -> Result<ShaderBindingTableBuilder> {
        let load = |name| self.load_shader(backend, name);

        let mut builder = ShaderBindingTableBuilder::for_backend(&**backend, 2, 3)?;
        builder.set_raygen_stage(load("ray_gen")?.stage(ShaderStageKind::Raygen))?;
        builder.add_stages_to_hit_group(
            vec![
                load("ray_chit")?.stage(ShaderStageKind::ClosestHit),
                load("ray_anyhit")?.stage(ShaderStageKind::AnyHit),
            ],
            PRIMARY_HIT_GROUP,
        )?;
        builder.add_stages_to_hit_group(
            vec![load("indirect_ray_chit")?.stage(ShaderStageKind::ClosestHit)],
            INDIRECT_HIT_GROUP,
        )?;
        builder.add_stage_to_miss_group(
            load("ray_miss")?.stage(ShaderStageKind::Miss),
            PRIMARY_MISS_GROUP,
        )?;
        builder.add_stage_to_miss_group(
            load("indirect_ray_miss")?.stage(ShaderStageKind::Miss),
            INDIRECT_MISS_GROUP,
        )?;
        builder.add_stage_to_miss_group(
            load("shadow_ray_miss")?.stage(ShaderStageKind::Miss),
            SHADOW_MISS_GROUP,
        )?;

        Ok(builder)
    }
}

impl RendererVariant for PathTracer {
    fn configure(&self) -> RenderSettings {
        RenderSettings {
            name: "RayTracer".to_string(),
            resolution: self.config.resolution,
            validation: self.config.validation,
        }
    }

    fn build_scene(&mut self, backend: &Arc<dyn Backend>) -> Result<()> {
        if self.resources.is_some() {
            return Err(Error::precondition("path tracer scene is already built"));
        }

        let scene = Scene::build(backend, &self.meshes, &self.config.scene)?;
        let camera = OwnedBuffer::new_from_data(
            backend,
            "camera",
            &[self.config.camera.to_uniform()],
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            memory::host_visible(),
        )?;
        let uniform_params = OwnedBuffer::new_from_data(
            backend,
            "uniform params",
            &[scene.uniform_params(0, 0)],
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            memory::host_visible(),
        )?;

        let layout = PipelineLayout::new(
            backend,
            &PathTracer::slot_bindings(scene.meshes().len() as u32),
        )?;
        let builder = self.shader_binding_table_builder(backend)?;
        let pipeline =
            RayTracingPipeline::new(backend, &builder, layout, self.config.max_recursion_depth)?;
        let shader_binding_table = builder.create(backend, &pipeline)?;

        log::info!(
            "Path tracer ready: {} meshes, {} shader groups",
            scene.meshes().len(),
            pipeline.group_count()
        );
        self.resources = Some(PathTracerResources {
            shader_binding_table,
            pipeline,
            camera,
            uniform_params,
            scene,
        });
        Ok(())
    }

    fn record_frame(
        &self,
        commands: &OneTimeCommands,
        descriptor_sets: &[vk::DescriptorSet],
    ) -> Result<()> {
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| Error::precondition("path tracer scene has not been built"))?;
        commands.bind_ray_tracing_pipeline(
            resources.pipeline.raw(),
            resources.pipeline.layout().raw(),
            descriptor_sets,
        );
        let (width, height) = self.config.resolution;
        commands.trace_rays(&resources.shader_binding_table, (width, height, 1));
        Ok(())
    }
}
