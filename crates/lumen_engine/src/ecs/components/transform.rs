//! Transform components
//!
//! An entity with a transform carries all of `Position`, `Rotation`,
//! `EulerAngles`, `Scale` and `ModelMatrix`. `Parent`/`Children` are present
//! only on linked entities. Mutate these through
//! [`TransformSystem`](crate::ecs::systems::TransformSystem) so the Euler
//! mirror and the dirty flag stay in step.

use crate::ecs::Entity;
use crate::foundation::math::{Mat4, Quat, Vec3};

/// Local translation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position(pub Vec3);

/// Local rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation(pub Quat);

impl Default for Rotation {
    fn default() -> Self {
        Self(Quat::identity())
    }
}

/// Local rotation as XYZ Euler angles in degrees, mirrored from `Rotation`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles(pub Vec3);

/// Local scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale(pub Vec3);

impl Default for Scale {
    fn default() -> Self {
        Self(Vec3::new(1.0, 1.0, 1.0))
    }
}

/// Cached world matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelMatrix {
    pub matrix: Mat4,
    /// Set when this entity or any ancestor moved since the last update
    pub dirty: bool,
}

impl Default for ModelMatrix {
    fn default() -> Self {
        Self { matrix: Mat4::identity(), dirty: true }
    }
}

/// Link to the parent entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parent(pub Entity);

/// Links to child entities, in attachment order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Children(pub Vec<Entity>);
