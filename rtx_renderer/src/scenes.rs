use glam::{vec3, Vec4};
use rtx_gpu::scenes::{shapes, Light, MeshGeometry, MeshMaterial, SceneConfig};

pub fn example_meshes() -> Vec<MeshGeometry> {
    let grey = MeshMaterial {
        color: Vec4::new(0.7, 0.7, 0.7, 1.0),
        ..MeshMaterial::default()
    };
    let red = MeshMaterial {
        color: Vec4::new(0.9, 0.1, 0.1, 1.0),
        diffuse: 0.6,
        ..MeshMaterial::default()
    };
    let mirror = MeshMaterial {
        color: Vec4::ONE,
        specular: 0.8,
        reflect: 0.9,
        ..MeshMaterial::default()
    };

    vec![
        shapes::plane("floor", 10.0, 0.0).with_material(grey),
        shapes::cube("red cube", vec3(-0.8, 0.4, -1.5), 0.4).with_material(red),
        shapes::cube("mirror cube", vec3(0.7, 0.3, -2.0), 0.3).with_material(mirror),
    ]
}

pub fn example_scene_config() -> SceneConfig {
    SceneConfig {
        light: Light {
            position: vec3(1.0, 3.0, 1.0),
            intensity: 1.0,
            shadow_attenuation: 0.2,
        },
        ..SceneConfig::default()
    }
}
