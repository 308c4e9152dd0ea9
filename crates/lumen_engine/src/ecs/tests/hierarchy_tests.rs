//! Transform hierarchy behaviour across the world and the transform system

use approx::assert_relative_eq;

use crate::ecs::components::{ModelMatrix, Position};
use crate::ecs::systems::TransformSystem;
use crate::ecs::World;
use crate::foundation::math::{trs_matrix, Quat, Transform, Vec3};

fn spawn(world: &mut World, transform: Transform) -> crate::ecs::Entity {
    let e = world.create_entity();
    TransformSystem::attach(world, e, &transform).unwrap();
    e
}

fn at(position: Vec3) -> Transform {
    Transform::new(position, Quat::identity(), Vec3::new(1.0, 1.0, 1.0))
}

#[test]
fn test_child_follows_root() {
    let mut world = World::new();
    let root = spawn(&mut world, at(Vec3::zeros()));
    let child = spawn(&mut world, at(Vec3::new(1.0, 0.0, 0.0)));
    TransformSystem::set_parent(&mut world, child, root).unwrap();

    TransformSystem::update(&mut world);
    assert_eq!(TransformSystem::world_position(&world, child).unwrap(), Vec3::new(1.0, 0.0, 0.0));

    TransformSystem::set_position(&mut world, root, Vec3::new(5.0, 0.0, 0.0)).unwrap();
    TransformSystem::update(&mut world);
    assert_eq!(TransformSystem::world_position(&world, child).unwrap(), Vec3::new(6.0, 0.0, 0.0));
}

#[test]
fn test_world_matrix_is_product_of_chain() {
    let mut world = World::new();
    let locals = [
        Transform::new(Vec3::new(1.0, 2.0, 0.0), Quat::from_axis_angle(&Vec3::y_axis(), 0.4), Vec3::new(2.0, 2.0, 2.0)),
        Transform::new(Vec3::new(0.0, 1.0, -3.0), Quat::from_axis_angle(&Vec3::x_axis(), -0.9), Vec3::new(1.0, 0.5, 1.0)),
        Transform::new(Vec3::new(4.0, 0.0, 1.0), Quat::from_axis_angle(&Vec3::z_axis(), 1.3), Vec3::new(1.5, 1.5, 1.5)),
        Transform::new(Vec3::new(-1.0, -1.0, 2.0), Quat::identity(), Vec3::new(1.0, 1.0, 3.0)),
    ];

    // Spawn the chain leaf first so storage order is the reverse of hierarchy order.
    let entities: Vec<_> = locals.iter().rev().map(|t| spawn(&mut world, t.clone())).collect();
    let chain: Vec<_> = entities.into_iter().rev().collect();
    for pair in chain.windows(2) {
        world.add_component(pair[1], crate::ecs::components::Parent(pair[0])).unwrap();
        match world.get_component_mut::<crate::ecs::components::Children>(pair[0]) {
            Some(children) => children.0.push(pair[1]),
            None => world.add_component(pair[0], crate::ecs::components::Children(vec![pair[1]])).unwrap(),
        }
    }

    TransformSystem::update(&mut world);

    let mut expected = trs_matrix(&locals[0].position, &locals[0].rotation, &locals[0].scale);
    for (i, local) in locals.iter().enumerate() {
        if i > 0 {
            expected *= trs_matrix(&local.position, &local.rotation, &local.scale);
        }
        let actual = TransformSystem::world_matrix(&world, chain[i]).unwrap();
        assert_relative_eq!(actual, expected, epsilon = 1e-4);
    }
}

#[test]
fn test_ancestor_change_propagates_to_leaf() {
    let mut world = World::new();
    let a = spawn(&mut world, at(Vec3::zeros()));
    let b = spawn(&mut world, at(Vec3::new(0.0, 1.0, 0.0)));
    let c = spawn(&mut world, at(Vec3::new(0.0, 1.0, 1.0)));
    TransformSystem::set_parent(&mut world, b, a).unwrap();
    TransformSystem::set_parent(&mut world, c, b).unwrap();
    TransformSystem::update(&mut world);
    assert_eq!(TransformSystem::update(&mut world), 0);

    TransformSystem::set_euler_angles(&mut world, a, Vec3::new(0.0, 0.0, 90.0)).unwrap();
    for entity in [a, b, c] {
        assert!(world.get_component::<ModelMatrix>(entity).unwrap().dirty);
    }
    assert_eq!(TransformSystem::update(&mut world), 3);
    assert!(!world.get_component::<ModelMatrix>(c).unwrap().dirty);

    // Rotating the root 90 degrees about Z maps (0, 1, 1) to (-1, 0, 1).
    assert_relative_eq!(
        TransformSystem::world_position(&world, c).unwrap(),
        Vec3::new(-1.0, 0.0, 1.0),
        epsilon = 1e-5
    );
}

#[test]
fn test_reparent_preserves_world_pose() {
    let mut world = World::new();
    let parent = spawn(&mut world, Transform::new(
        Vec3::new(3.0, -2.0, 5.0),
        Quat::from_axis_angle(&Vec3::y_axis(), 1.1),
        Vec3::new(2.0, 2.0, 2.0),
    ));
    let child = spawn(&mut world, Transform::new(
        Vec3::new(-1.0, 4.0, 0.5),
        Quat::from_axis_angle(&Vec3::x_axis(), 0.3),
        Vec3::new(1.0, 0.5, 2.0),
    ));
    TransformSystem::update(&mut world);
    let before = TransformSystem::world_matrix(&world, child).unwrap();

    TransformSystem::set_parent(&mut world, child, parent).unwrap();
    assert_ne!(world.get_component::<Position>(child).unwrap().0, Vec3::new(-1.0, 4.0, 0.5));

    TransformSystem::update(&mut world);
    let after = TransformSystem::world_matrix(&world, child).unwrap();
    assert_relative_eq!(after, before, epsilon = 1e-4);
}

#[test]
fn test_recycled_entity_starts_clean() {
    let mut world = World::new();
    let a = spawn(&mut world, at(Vec3::new(1.0, 1.0, 1.0)));
    world.destroy_entity(a);
    assert!(world.get_component::<Position>(a).is_none());

    let b = world.create_entity();
    assert_eq!(b.id(), a.id());
    assert!(world.get_component::<Position>(b).is_none());
    assert!(world.get_component::<ModelMatrix>(b).is_none());
}
