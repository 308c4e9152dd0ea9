//! Transform hierarchy system
//!
//! Owns every write to the transform components: setters keep `Rotation` and
//! `EulerAngles` in sync and flag the `ModelMatrix` of the entity and every
//! descendant dirty, reparenting preserves
//! the child's world pose, and [`TransformSystem::update`] recomputes world
//! matrices once per frame.
//!
//! The update walks the hierarchy top-down from the roots, carrying the
//! parent's world matrix and whether it changed. A child therefore always
//! composes against a parent matrix computed in the same pass, regardless of
//! the order entities sit in storage.

use std::collections::VecDeque;

use crate::ecs::{EcsError, EcsResult, Entity, World};
use crate::ecs::components::{Children, EulerAngles, ModelMatrix, Parent, Position, Rotation, Scale};
use crate::foundation::math::{trs_matrix, utils, Mat4, Quat, Transform, Vec3};

/// Transform hierarchy operations
pub struct TransformSystem;

impl TransformSystem {
    /// Give an entity the full set of transform components
    pub fn attach(world: &mut World, entity: Entity, transform: &Transform) -> EcsResult<()> {
        world.add_component(entity, Position(transform.position))?;
        world.add_component(entity, Rotation(transform.rotation))?;
        world.add_component(entity, EulerAngles(utils::euler_degrees_from_quat(&transform.rotation)))?;
        world.add_component(entity, Scale(transform.scale))?;
        world.add_component(entity, ModelMatrix { matrix: transform.to_matrix(), dirty: true })?;
        Ok(())
    }

    pub fn set_position(world: &mut World, entity: Entity, position: Vec3) -> EcsResult<()> {
        Self::write::<Position>(world, entity, "Position", |p| p.0 = position)?;
        Self::mark_subtree_dirty(world, entity);
        Ok(())
    }

    pub fn translate(world: &mut World, entity: Entity, delta: Vec3) -> EcsResult<()> {
        Self::write::<Position>(world, entity, "Position", |p| p.0 += delta)?;
        Self::mark_subtree_dirty(world, entity);
        Ok(())
    }

    /// Set the rotation and recompute the Euler mirror
    pub fn set_rotation(world: &mut World, entity: Entity, rotation: Quat) -> EcsResult<()> {
        Self::write::<Rotation>(world, entity, "Rotation", |r| r.0 = rotation)?;
        let euler = utils::euler_degrees_from_quat(&rotation);
        if let Some(angles) = world.get_component_mut::<EulerAngles>(entity) {
            angles.0 = euler;
        } else {
            world.add_component(entity, EulerAngles(euler))?;
        }
        Self::mark_subtree_dirty(world, entity);
        Ok(())
    }

    /// Set XYZ Euler angles in degrees and recompute the rotation
    pub fn set_euler_angles(world: &mut World, entity: Entity, degrees: Vec3) -> EcsResult<()> {
        let rotation = utils::quat_from_euler_degrees(&degrees);
        Self::write::<Rotation>(world, entity, "Rotation", |r| r.0 = rotation)?;
        if let Some(angles) = world.get_component_mut::<EulerAngles>(entity) {
            angles.0 = degrees;
        } else {
            world.add_component(entity, EulerAngles(degrees))?;
        }
        Self::mark_subtree_dirty(world, entity);
        Ok(())
    }

    /// Apply `delta` on top of the current local rotation
    pub fn rotate(world: &mut World, entity: Entity, delta: Quat) -> EcsResult<()> {
        let current = world.get_component::<Rotation>(entity)
            .map(|r| r.0)
            .ok_or(EcsError::MissingComponent { entity, component: "Rotation" })?;
        Self::set_rotation(world, entity, delta * current)
    }

    pub fn set_scale(world: &mut World, entity: Entity, scale: Vec3) -> EcsResult<()> {
        Self::write::<Scale>(world, entity, "Scale", |s| s.0 = scale)?;
        Self::mark_subtree_dirty(world, entity);
        Ok(())
    }

    /// Flag one entity's world matrix as stale
    pub fn mark_dirty(world: &mut World, entity: Entity) {
        if let Some(model) = world.get_component_mut::<ModelMatrix>(entity) {
            model.dirty = true;
        }
    }

    /// Flag an entity and all of its descendants as stale
    pub fn mark_subtree_dirty(world: &mut World, entity: Entity) {
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            Self::mark_dirty(world, current);
            stack.extend(Self::children(world, current));
        }
    }

    /// Local TRS of an entity
    pub fn local_transform(world: &World, entity: Entity) -> Option<Transform> {
        let position = world.get_component::<Position>(entity)?.0;
        let rotation = world.get_component::<Rotation>(entity).map(|r| r.0).unwrap_or_else(Quat::identity);
        let scale = world.get_component::<Scale>(entity).map(|s| s.0).unwrap_or_else(|| Vec3::new(1.0, 1.0, 1.0));
        Some(Transform::new(position, rotation, scale))
    }

    /// Local `T * R * S` matrix
    pub fn local_matrix(world: &World, entity: Entity) -> Option<Mat4> {
        let local = Self::local_transform(world, entity)?;
        Some(trs_matrix(&local.position, &local.rotation, &local.scale))
    }

    /// World matrix composed from the current local values of the whole
    /// ancestor chain, independent of the cached `ModelMatrix`
    pub fn compose_world_matrix(world: &World, entity: Entity) -> Option<Mat4> {
        let mut matrix = Self::local_matrix(world, entity)?;
        let mut current = entity;
        while let Some(parent) = Self::parent(world, current) {
            match Self::local_matrix(world, parent) {
                Some(parent_local) => matrix = parent_local * matrix,
                None => break,
            }
            current = parent;
        }
        Some(matrix)
    }

    /// World-space TRS decomposed from [`Self::compose_world_matrix`]
    pub fn world_transform(world: &World, entity: Entity) -> Option<Transform> {
        Self::compose_world_matrix(world, entity).map(|m| Transform::from_matrix(&m))
    }

    /// Cached world matrix from the last update
    pub fn world_matrix(world: &World, entity: Entity) -> Option<Mat4> {
        world.get_component::<ModelMatrix>(entity).map(|m| m.matrix)
    }

    /// Translation column of the cached world matrix
    pub fn world_position(world: &World, entity: Entity) -> Option<Vec3> {
        Self::world_matrix(world, entity).map(|m| Vec3::new(m.m14, m.m24, m.m34))
    }

    pub fn parent(world: &World, entity: Entity) -> Option<Entity> {
        world.get_component::<Parent>(entity).map(|p| p.0)
    }

    pub fn children(world: &World, entity: Entity) -> Vec<Entity> {
        world.get_component::<Children>(entity).map(|c| c.0.clone()).unwrap_or_default()
    }

    /// Number of ancestors above an entity
    pub fn depth(world: &World, entity: Entity) -> usize {
        let mut depth = 0;
        let mut current = entity;
        while let Some(parent) = Self::parent(world, current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// `root` followed by all descendants, level by level
    pub fn descendants_breadth_first(world: &World, root: Entity) -> Vec<Entity> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            if !world.is_alive(current) || order.contains(&current) {
                continue;
            }
            order.push(current);
            queue.extend(Self::children(world, current));
        }
        order
    }

    /// Reparent `child` under `parent` keeping its world pose
    ///
    /// The child's current world transform is re-expressed in the parent's
    /// local space, the link is registered on both sides and the child's
    /// subtree is flagged dirty.
    pub fn set_parent(world: &mut World, child: Entity, parent: Entity) -> EcsResult<()> {
        if !world.is_alive(child) {
            return Err(EcsError::DeadEntity(child));
        }
        if !world.is_alive(parent) {
            return Err(EcsError::DeadEntity(parent));
        }
        if child == parent {
            return Err(EcsError::SelfParent(child));
        }
        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(EcsError::HierarchyCycle { child, parent });
            }
            ancestor = Self::parent(world, current);
        }

        let child_world = Self::world_transform(world, child)
            .ok_or(EcsError::MissingComponent { entity: child, component: "Position" })?;
        let parent_world = Self::world_transform(world, parent)
            .ok_or(EcsError::MissingComponent { entity: parent, component: "Position" })?;
        let local = parent_world.to_local(&child_world);

        Self::unlink_from_parent(world, child);
        Self::write_local(world, child, &local)?;

        world.add_component(child, Parent(parent))?;
        match world.get_component_mut::<Children>(parent) {
            Some(children) => children.0.push(child),
            None => world.add_component(parent, Children(vec![child]))?,
        }

        Self::mark_subtree_dirty(world, child);
        log::trace!("Reparented {:?} under {:?}", child, parent);
        Ok(())
    }

    /// Make `child` a root again, keeping its world pose
    pub fn clear_parent(world: &mut World, child: Entity) -> EcsResult<()> {
        if !world.is_alive(child) {
            return Err(EcsError::DeadEntity(child));
        }
        if Self::parent(world, child).is_none() {
            return Ok(());
        }
        let child_world = Self::world_transform(world, child)
            .ok_or(EcsError::MissingComponent { entity: child, component: "Position" })?;
        Self::unlink_from_parent(world, child);
        Self::write_local(world, child, &child_world)?;
        Self::mark_subtree_dirty(world, child);
        Ok(())
    }

    /// Remove every hierarchy link touching `entity`. Children become roots
    /// with their local values unchanged.
    pub fn unlink(world: &mut World, entity: Entity) {
        Self::unlink_from_parent(world, entity);
        if let Some(children) = world.remove_component::<Children>(entity) {
            for child in children.0 {
                world.remove_component::<Parent>(child);
                Self::mark_subtree_dirty(world, child);
            }
        }
    }

    /// Recompute stale world matrices top-down. Returns how many were rebuilt.
    pub fn update(world: &mut World) -> usize {
        let roots: Vec<Entity> = world
            .query::<ModelMatrix>()
            .filter(|(e, _)| match Self::parent(world, *e) {
                Some(parent) => !world.has_component::<ModelMatrix>(parent),
                None => true,
            })
            .map(|(e, _)| e)
            .collect();

        let mut recomputed = 0;
        let mut stack: Vec<(Entity, Mat4, bool)> =
            roots.into_iter().map(|e| (e, Mat4::identity(), false)).collect();

        while let Some((entity, parent_world, parent_changed)) = stack.pop() {
            let Some(model) = world.get_component::<ModelMatrix>(entity).copied() else {
                continue;
            };

            let changed = model.dirty || parent_changed;
            let world_matrix = if changed {
                let local = Self::local_matrix(world, entity).unwrap_or_else(Mat4::identity);
                let matrix = parent_world * local;
                if let Some(model) = world.get_component_mut::<ModelMatrix>(entity) {
                    model.matrix = matrix;
                    model.dirty = false;
                }
                recomputed += 1;
                matrix
            } else {
                model.matrix
            };

            for child in Self::children(world, entity) {
                stack.push((child, world_matrix, changed));
            }
        }

        log::trace!("Transform update recomputed {} matrices", recomputed);
        recomputed
    }

    fn write<T: crate::ecs::Component>(
        world: &mut World,
        entity: Entity,
        name: &'static str,
        apply: impl FnOnce(&mut T),
    ) -> EcsResult<()> {
        if !world.is_alive(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        let component = world
            .get_component_mut::<T>(entity)
            .ok_or(EcsError::MissingComponent { entity, component: name })?;
        apply(component);
        Ok(())
    }

    fn write_local(world: &mut World, entity: Entity, local: &Transform) -> EcsResult<()> {
        world.add_component(entity, Position(local.position))?;
        world.add_component(entity, Rotation(local.rotation))?;
        world.add_component(entity, EulerAngles(utils::euler_degrees_from_quat(&local.rotation)))?;
        world.add_component(entity, Scale(local.scale))?;
        Ok(())
    }

    fn unlink_from_parent(world: &mut World, child: Entity) {
        if let Some(Parent(old_parent)) = world.remove_component::<Parent>(child) {
            if let Some(children) = world.get_component_mut::<Children>(old_parent) {
                children.0.retain(|c| *c != child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spawn(world: &mut World, position: Vec3) -> Entity {
        let e = world.create_entity();
        TransformSystem::attach(world, e, &Transform::new(position, Quat::identity(), Vec3::new(1.0, 1.0, 1.0))).unwrap();
        e
    }

    #[test]
    fn test_euler_and_rotation_stay_synced() {
        let mut world = World::new();
        let e = spawn(&mut world, Vec3::zeros());

        TransformSystem::set_euler_angles(&mut world, e, Vec3::new(0.0, 90.0, 0.0)).unwrap();
        let rotation = world.get_component::<Rotation>(e).unwrap().0;
        let forward = rotation * Vec3::new(0.0, 0.0, -1.0);
        assert_relative_eq!(forward, Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-5);

        let q = Quat::from_axis_angle(&Vec3::x_axis(), std::f32::consts::FRAC_PI_4);
        TransformSystem::set_rotation(&mut world, e, q).unwrap();
        let euler = world.get_component::<EulerAngles>(e).unwrap().0;
        assert_relative_eq!(euler, Vec3::new(45.0, 0.0, 0.0), epsilon = 1e-3);
    }

    #[test]
    fn test_setters_mark_dirty() {
        let mut world = World::new();
        let e = spawn(&mut world, Vec3::zeros());
        TransformSystem::update(&mut world);
        assert!(!world.get_component::<ModelMatrix>(e).unwrap().dirty);

        TransformSystem::set_scale(&mut world, e, Vec3::new(2.0, 2.0, 2.0)).unwrap();
        assert!(world.get_component::<ModelMatrix>(e).unwrap().dirty);
    }

    #[test]
    fn test_missing_component_reported() {
        let mut world = World::new();
        let e = world.create_entity();
        assert_eq!(
            TransformSystem::set_position(&mut world, e, Vec3::zeros()),
            Err(EcsError::MissingComponent { entity: e, component: "Position" })
        );
    }

    #[test]
    fn test_parent_cycles_rejected() {
        let mut world = World::new();
        let a = spawn(&mut world, Vec3::zeros());
        let b = spawn(&mut world, Vec3::zeros());
        let c = spawn(&mut world, Vec3::zeros());
        TransformSystem::set_parent(&mut world, b, a).unwrap();
        TransformSystem::set_parent(&mut world, c, b).unwrap();

        assert_eq!(TransformSystem::set_parent(&mut world, a, a), Err(EcsError::SelfParent(a)));
        assert_eq!(
            TransformSystem::set_parent(&mut world, a, c),
            Err(EcsError::HierarchyCycle { child: a, parent: c })
        );
        assert_eq!(TransformSystem::depth(&world, c), 2);
    }

    #[test]
    fn test_reparent_moves_child_between_lists() {
        let mut world = World::new();
        let a = spawn(&mut world, Vec3::zeros());
        let b = spawn(&mut world, Vec3::zeros());
        let c = spawn(&mut world, Vec3::zeros());
        TransformSystem::set_parent(&mut world, c, a).unwrap();
        TransformSystem::set_parent(&mut world, c, b).unwrap();
        assert!(TransformSystem::children(&world, a).is_empty());
        assert_eq!(TransformSystem::children(&world, b), vec![c]);
        assert_eq!(TransformSystem::parent(&world, c), Some(b));
    }

    #[test]
    fn test_clear_parent_keeps_world_position() {
        let mut world = World::new();
        let a = spawn(&mut world, Vec3::new(2.0, 0.0, 0.0));
        let b = spawn(&mut world, Vec3::new(3.0, 1.0, 0.0));
        TransformSystem::set_parent(&mut world, b, a).unwrap();
        TransformSystem::clear_parent(&mut world, b).unwrap();
        TransformSystem::update(&mut world);
        assert_relative_eq!(
            TransformSystem::world_position(&world, b).unwrap(),
            Vec3::new(3.0, 1.0, 0.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_breadth_first_order() {
        let mut world = World::new();
        let root = spawn(&mut world, Vec3::zeros());
        let a = spawn(&mut world, Vec3::zeros());
        let b = spawn(&mut world, Vec3::zeros());
        let a1 = spawn(&mut world, Vec3::zeros());
        TransformSystem::set_parent(&mut world, a, root).unwrap();
        TransformSystem::set_parent(&mut world, b, root).unwrap();
        TransformSystem::set_parent(&mut world, a1, a).unwrap();
        assert_eq!(TransformSystem::descendants_breadth_first(&world, root), vec![root, a, b, a1]);
    }
}
