//! Light-space projections
//!
//! Directional lights cover the view frustum with cascades. Split depths
//! blend logarithmic and uniform distributions (`lambda` 1.0 is fully
//! logarithmic). Each slice's frustum corners are unprojected from clip space,
//! bounded by a sphere whose radius is rounded up to 1/16 units so that the
//! projection size does not change as the camera turns, then padded by an
//! extra radius (twice as much for the first cascade).

use crate::config::ShadowConfig;
use crate::ecs::components::{LightSpaceMatrixArray, LIGHT_SPACE_ARRAY_SIZE};
use crate::foundation::math::{utils, Mat4, Vec3, Vec4};
use crate::render::camera::Camera;

/// View directions and up vectors of the six cube faces, +X, -X, +Y, -Y, +Z, -Z
pub fn cube_faces() -> [(Vec3, Vec3); 6] {
    [
        (Vec3::x(), -Vec3::y()),
        (-Vec3::x(), -Vec3::y()),
        (Vec3::y(), Vec3::z()),
        (-Vec3::y(), -Vec3::z()),
        (Vec3::z(), -Vec3::y()),
        (-Vec3::z(), -Vec3::y()),
    ]
}

/// Far view depth of each cascade, `count` values ending at `far`
pub fn cascade_splits(near: f32, far: f32, count: usize, lambda: f32) -> Vec<f32> {
    (1..=count)
        .map(|i| {
            let p = i as f32 / count as f32;
            let log = near * (far / near).powf(p);
            let uniform = near + (far - near) * p;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// World-space corners of the camera frustum between two view depths
pub fn frustum_corners(camera: &Camera, near: f32, far: f32) -> Option<[Vec3; 8]> {
    let inverse = (camera.projection_for_range(near, far) * camera.view_matrix()).try_inverse()?;
    let mut corners = [Vec3::zeros(); 8];
    let mut i = 0;
    for z in [-1.0, 1.0] {
        for y in [-1.0, 1.0] {
            for x in [-1.0, 1.0] {
                let p = inverse * Vec4::new(x, y, z, 1.0);
                corners[i] = p.xyz() / p.w;
                i += 1;
            }
        }
    }
    Some(corners)
}

/// Bounding sphere radius after shimmer rounding and padding
pub fn cascade_radius(raw_radius: f32, cascade: usize, extra_radius: f32) -> f32 {
    let rounded = (raw_radius * 16.0).ceil() / 16.0;
    let pad = if cascade == 0 { extra_radius * 2.0 } else { extra_radius };
    rounded + pad
}

/// Orthographic view-projection looking along `direction` at a sphere
pub fn directional_matrix(center: &Vec3, radius: f32, direction: &Vec3, depth_range: f32) -> Mat4 {
    let direction = direction.try_normalize(f32::EPSILON).unwrap_or_else(|| -Vec3::y());
    let back = radius + depth_range;
    let eye = center - direction * back;
    let view = utils::look_at(&eye, center, &utils::stable_up(&direction));
    let projection = utils::orthographic(-radius, radius, -radius, radius, 0.0, back + radius);
    projection * view
}

/// Cascaded matrices for a directional light
///
/// With a single cascade the light's own `ortho_size` box around `anchor` is
/// used instead of fitting the camera frustum.
pub fn directional_cascades(
    camera: &Camera,
    direction: &Vec3,
    anchor: &Vec3,
    ortho_size: f32,
    config: &ShadowConfig,
) -> LightSpaceMatrixArray {
    let mut array = LightSpaceMatrixArray::default();
    let count = config.cascade_count.clamp(1, LIGHT_SPACE_ARRAY_SIZE);

    if count == 1 {
        array.matrices[0] = directional_matrix(anchor, ortho_size, direction, config.directional_depth_range);
        array.split_depths[0] = camera.far;
        array.count = 1;
        return array;
    }

    let splits = cascade_splits(camera.near, camera.far, count, config.cascade_lambda);
    let mut slice_near = camera.near;
    for (i, &split) in splits.iter().enumerate() {
        let Some(corners) = frustum_corners(camera, slice_near, split) else {
            log::warn!("Degenerate camera frustum; cascade {} skipped", i);
            break;
        };
        let center = corners.iter().fold(Vec3::zeros(), |acc, c| acc + c) / corners.len() as f32;
        let raw = corners.iter().map(|c| (c - center).norm()).fold(0.0, f32::max);
        let radius = cascade_radius(raw, i, config.cascade_extra_radius);

        array.matrices[i] = directional_matrix(&center, radius, direction, config.directional_depth_range);
        array.split_depths[i] = split;
        array.count = i + 1;
        slice_near = split;
    }
    array
}

/// Six 90 degree face matrices around a point light, in cube face order
pub fn point_light_faces(position: &Vec3, near: f32, far: f32) -> LightSpaceMatrixArray {
    let projection = utils::perspective(std::f32::consts::FRAC_PI_2, 1.0, near, far.max(near + 1e-3));
    let mut array = LightSpaceMatrixArray::default();
    for (i, (direction, up)) in cube_faces().iter().enumerate() {
        array.matrices[i] = projection * utils::look_at(position, &(position + direction), up);
        array.split_depths[i] = far;
    }
    array.count = 6;
    array
}

/// Perspective matrix of a spot light covering its outer cone
pub fn spot_light_matrix(position: &Vec3, direction: &Vec3, outer_cutoff_degrees: f32, near: f32, range: f32) -> Mat4 {
    let direction = direction.try_normalize(f32::EPSILON).unwrap_or_else(|| -Vec3::z());
    let fov = utils::deg_to_rad((outer_cutoff_degrees * 2.0).clamp(1.0, 179.0));
    let projection = utils::perspective(fov, 1.0, near, range.max(near + 1e-3));
    projection * utils::look_at(position, &(position + direction), &utils::stable_up(&direction))
}
