//! Shadow mapping support
//!
//! Light-space projection math lives in [`cascades`], per-light depth texture
//! bookkeeping in [`atlas`]. The shadow pass ties them together.

pub mod atlas;
pub mod cascades;

pub use atlas::{ShadowAtlasCache, ShadowMap};
pub use cascades::{
    cascade_radius, cascade_splits, cube_faces, directional_cascades, frustum_corners, point_light_faces,
    spot_light_matrix,
};

use crate::ecs::components::{ModelMatrix, Position, Rotation, LIGHT_SPACE_ARRAY_SIZE};
use crate::ecs::{Entity, World};
use crate::foundation::math::Vec3;

/// Largest cascade count a directional light can use
pub const MAX_CASCADES: usize = LIGHT_SPACE_ARRAY_SIZE;

/// World position and forward direction of a light entity
///
/// Reads the cached world matrix when present, otherwise the local position
/// and rotation. Forward is the entity's -Z axis.
pub fn light_pose(world: &World, light: Entity) -> (Vec3, Vec3) {
    if let Some(model) = world.get_component::<ModelMatrix>(light) {
        let m = &model.matrix;
        let position = Vec3::new(m.m14, m.m24, m.m34);
        let forward = -Vec3::new(m.m13, m.m23, m.m33);
        return (position, forward.try_normalize(f32::EPSILON).unwrap_or_else(|| -Vec3::z()));
    }
    let position = world.get_component::<Position>(light).map(|p| p.0).unwrap_or_else(Vec3::zeros);
    let forward = world
        .get_component::<Rotation>(light)
        .map(|r| r.0 * -Vec3::z())
        .unwrap_or_else(|| -Vec3::z());
    (position, forward)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::systems::TransformSystem;
    use crate::foundation::math::{Quat, Transform};
    use approx::assert_relative_eq;

    #[test]
    fn test_light_pose_from_world_matrix() {
        let mut world = World::new();
        let light = world.create_entity();
        let rotation = Quat::from_axis_angle(&Vec3::x_axis(), -std::f32::consts::FRAC_PI_2);
        TransformSystem::attach(
            &mut world,
            light,
            &Transform::new(Vec3::new(0.0, 10.0, 0.0), rotation, Vec3::new(2.0, 2.0, 2.0)),
        )
        .unwrap();
        TransformSystem::update(&mut world);

        let (position, forward) = light_pose(&world, light);
        assert_relative_eq!(position, Vec3::new(0.0, 10.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(forward, -Vec3::y(), epsilon = 1e-5);
    }

    #[test]
    fn test_light_pose_defaults() {
        let mut world = World::new();
        let light = world.create_entity();
        let (position, forward) = light_pose(&world, light);
        assert_eq!(position, Vec3::zeros());
        assert_eq!(forward, -Vec3::z());
    }
}
