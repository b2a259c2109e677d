//! Small procedural meshes for demo scenes and tests.

use super::{MeshGeometry, VertexAttribute};
use glam::Vec3;

pub fn triangle(name: &str) -> MeshGeometry {
    let positions = vec![
        Vec3::new(-0.5, 0.0, 0.0),
        Vec3::new(0.5, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ];
    let attributes = vec![
        VertexAttribute::new(Vec3::Z, (0.0, 0.0)),
        VertexAttribute::new(Vec3::Z, (1.0, 0.0)),
        VertexAttribute::new(Vec3::Z, (0.5, 1.0)),
    ];

    MeshGeometry::new(name, positions, vec![0, 1, 2], attributes)
}

/// A square of side `size` facing up at height `y`.
pub fn plane(name: &str, size: f32, y: f32) -> MeshGeometry {
    let half = size / 2.0;
    let positions = vec![
        Vec3::new(-half, y, -half),
        Vec3::new(-half, y, half),
        Vec3::new(half, y, half),
        Vec3::new(half, y, -half),
    ];
    let uvs = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
    let attributes = uvs
        .iter()
        .map(|&uv| VertexAttribute::new(Vec3::Y, uv))
        .collect();

    MeshGeometry::new(name, positions, vec![0, 1, 2, 0, 2, 3], attributes)
}

/// An axis aligned cube with flat shaded faces.
pub fn cube(name: &str, center: Vec3, half_extent: f32) -> MeshGeometry {
    let mut positions = Vec::with_capacity(24);
    let mut attributes = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    let faces = [
        (Vec3::X, Vec3::Y),
        (-Vec3::X, Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (-Vec3::Y, Vec3::Z),
        (Vec3::Z, Vec3::X),
        (-Vec3::Z, Vec3::X),
    ];
    for (normal, tangent) in faces {
        // tangent x bitangent == normal, so the winding faces outwards.
        let bitangent = normal.cross(tangent);
        let base = positions.len() as u32;

        for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let corner = normal + tangent * u + bitangent * v;
            positions.push(center + corner * half_extent);
            attributes.push(VertexAttribute::new(
                normal,
                ((u + 1.0) / 2.0, (v + 1.0) / 2.0),
            ));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshGeometry::new(name, positions, indices, attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_are_valid() {
        assert!(triangle("t").validate().is_ok());
        assert!(plane("p", 4.0, -1.0).validate().is_ok());
        assert!(cube("c", Vec3::new(1.0, 2.0, 3.0), 0.5).validate().is_ok());
    }

    #[test]
    fn cube_stays_within_its_extent() {
        let center = Vec3::new(1.0, 2.0, 3.0);
        let mesh = cube("c", center, 0.5);

        assert_eq!(mesh.face_count(), 12);
        assert!(mesh
            .positions
            .iter()
            .all(|p| (*p - center).abs().max_element() <= 0.5 + 1e-5));
    }
}
