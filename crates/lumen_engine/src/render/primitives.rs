//! Built-in meshes

use super::mesh::RawMeshData;
use super::RenderResult;
use crate::ecs::components::DrawMode;
use crate::foundation::math::{Vec2, Vec3};

/// Unit cube centered at the origin, four vertices per face
pub fn cube() -> RenderResult<RawMeshData> {
    // (normal, u axis, v axis)
    let faces = [
        (Vec3::x(), -Vec3::z(), Vec3::y()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::x(), -Vec3::z()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), -Vec3::x(), Vec3::y()),
    ];

    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut uvs = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = positions.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            positions.push((normal + u * su + v * sv) * 0.5);
            normals.push(normal);
            uvs.push(Vec2::new((su + 1.0) * 0.5, (sv + 1.0) * 0.5));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    RawMeshData::from_geometry(positions, Some(normals), Some(uvs), indices, DrawMode::Triangles)
}

/// `size` x `size` plane in XZ facing +Y
pub fn plane(size: f32) -> RenderResult<RawMeshData> {
    let h = size * 0.5;
    let positions = vec![
        Vec3::new(-h, 0.0, h),
        Vec3::new(h, 0.0, h),
        Vec3::new(h, 0.0, -h),
        Vec3::new(-h, 0.0, -h),
    ];
    let uvs = vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
    RawMeshData::from_geometry(positions, Some(vec![Vec3::y(); 4]), Some(uvs), vec![0, 1, 2, 0, 2, 3], DrawMode::Triangles)
}

/// Latitude/longitude sphere of the given radius
pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> RenderResult<RawMeshData> {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();

    for ring in 0..=rings {
        let v = ring as f32 / rings as f32;
        let theta = v * std::f32::consts::PI;
        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let phi = u * std::f32::consts::TAU;
            let normal = Vec3::new(theta.sin() * phi.cos(), theta.cos(), -theta.sin() * phi.sin());
            positions.push(normal * radius);
            normals.push(normal);
            uvs.push(Vec2::new(u, 1.0 - v));
        }
    }

    let stride = segments + 1;
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    RawMeshData::from_geometry(positions, Some(normals), Some(uvs), indices, DrawMode::Triangles)
}
