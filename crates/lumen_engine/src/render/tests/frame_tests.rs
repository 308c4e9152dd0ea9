//! Frame graph behaviour: pass order, instancing, shadows, lighting and state

use crate::config::EngineConfig;
use crate::ecs::components::{Light, LightSpaceMatrixArray, Mesh};
use crate::ecs::systems::TransformSystem;
use crate::ecs::{Entity, World};
use crate::foundation::math::{Quat, Transform, Vec3};
use crate::render::bindings;
use crate::render::device::{BlendFactor, BlendState, CompareFunc, DepthState, FramebufferTarget, Viewport};
use crate::render::headless::{DrawCall, HeadlessDevice};
use crate::render::lights_gpu::PointLightData;
use crate::render::passes::{LightPass, ShadowPass};
use crate::render::primitives;
use crate::render::texture::{ImageData, MemoryTextureSource, TextureCache};
use crate::render::{Camera, FrameGraph, MaterialDefinition, Renderer};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.renderer.width = WIDTH;
    config.renderer.height = HEIGHT;
    config.shadows.map_size = 32;
    config
}

fn renderer(config: &EngineConfig) -> Renderer {
    Renderer::new(
        Box::new(HeadlessDevice::new(WIDTH, HEIGHT)),
        config,
        TextureCache::new(Box::new(MemoryTextureSource::new())),
    )
    .unwrap()
}

fn camera() -> Camera {
    Camera::perspective(Vec3::new(0.0, 2.0, 8.0), 60.0, WIDTH as f32 / HEIGHT as f32, 0.1, 50.0).look_at(Vec3::zeros())
}

fn spawn(world: &mut World, position: Vec3) -> Entity {
    let entity = world.create_entity();
    TransformSystem::attach(world, entity, &Transform::new(position, Quat::identity(), Vec3::new(1.0, 1.0, 1.0)))
        .unwrap();
    entity
}

fn spawn_mesh(world: &mut World, mesh: Mesh, position: Vec3) -> Entity {
    let entity = spawn(world, position);
    world.add_component(entity, mesh).unwrap();
    entity
}

fn spawn_light(world: &mut World, light: Light, position: Vec3, rotation: Quat) -> Entity {
    let entity = world.create_entity();
    TransformSystem::attach(world, entity, &Transform::new(position, rotation, Vec3::new(1.0, 1.0, 1.0))).unwrap();
    world.add_component(entity, light).unwrap();
    entity
}

fn sun_rotation() -> Quat {
    Quat::from_axis_angle(&Vec3::x_axis(), -std::f32::consts::FRAC_PI_2)
}

/// Two deferred cubes, one forward cube, a shadowed point light and a
/// shadowed sun
struct Scene {
    world: World,
    renderer: Renderer,
    graph: FrameGraph,
    camera: Camera,
    point: Entity,
    sun: Entity,
}

impl Scene {
    fn new(config: &EngineConfig) -> Self {
        let mut renderer = renderer(config);
        let mut world = World::new();

        let opaque = renderer.get_material_index(&MaterialDefinition::colored([0.8, 0.8, 0.8, 1.0])).unwrap();
        let glass = renderer
            .get_material_index(&MaterialDefinition::colored([0.2, 0.4, 1.0, 0.5]).forward())
            .unwrap();
        let cube = primitives::cube().unwrap();
        let deferred_cube = renderer.register_mesh(&cube, opaque, "cube").unwrap();
        let forward_cube = renderer.register_mesh(&cube, glass, "glass_cube").unwrap();

        spawn_mesh(&mut world, deferred_cube, Vec3::new(-1.5, 0.0, 0.0));
        spawn_mesh(&mut world, deferred_cube, Vec3::new(1.5, 0.0, 0.0));
        spawn_mesh(&mut world, forward_cube, Vec3::new(0.0, 0.0, 1.5));

        let point = spawn_light(
            &mut world,
            Light::point(Vec3::new(1.0, 0.9, 0.8), 4.0, 10.0).with_shadows(),
            Vec3::new(0.0, 3.0, 0.0),
            Quat::identity(),
        );
        let sun = spawn_light(
            &mut world,
            Light::directional(Vec3::new(1.0, 1.0, 1.0), 1.5, 20.0).with_shadows(),
            Vec3::new(0.0, 10.0, 0.0),
            sun_rotation(),
        );
        TransformSystem::update(&mut world);

        Self { world, renderer, graph: FrameGraph::new(), camera: camera(), point, sun }
    }

    fn frame(&mut self) -> crate::render::FrameStats {
        if let Some(device) = self.renderer.headless_mut() {
            device.take_draws();
        }
        self.graph.execute(&mut self.world, &self.camera, &mut self.renderer).unwrap()
    }

    fn device(&self) -> &HeadlessDevice {
        self.renderer.headless().unwrap()
    }

    /// Program labels in draw order with consecutive repeats collapsed
    fn pass_sequence(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for draw in self.device().draws() {
            let label = draw.program_label.clone().unwrap_or_default();
            if labels.last() != Some(&label) {
                labels.push(label);
            }
        }
        labels
    }
}

#[test]
fn test_default_pass_order() {
    let graph = FrameGraph::new();
    assert_eq!(graph.pass_names(), vec!["shadow", "geometry", "light", "forward", "skybox", "debug"]);
}

#[test]
fn test_frame_draws_passes_in_order() {
    let mut scene = Scene::new(&config());
    let stats = scene.frame();

    assert_eq!(scene.pass_sequence(), vec!["shadow_depth", "geometry", "deferred_light", "forward"]);
    // Skybox and debug are disabled without a cubemap and with debug mode 0.
    assert_eq!(stats.passes_run, 4);
    assert_eq!(stats.instances, 3);
    assert_eq!(stats.frame, 1);
}

#[test]
fn test_instance_map_rebuilt_once_per_frame() {
    let mut scene = Scene::new(&config());
    scene.frame();
    assert_eq!(scene.graph.instance_rebuild_count(), 1);
    assert!(!scene.graph.update_instance_map(&scene.world, &mut scene.renderer));

    scene.frame();
    assert_eq!(scene.graph.instance_rebuild_count(), 2);
    assert_eq!(scene.graph.instance_map().len(), 2);
    assert_eq!(scene.graph.instance_map().instance_count(), 3);
}

#[test]
fn test_geometry_pass_instances_deferred_groups() {
    let mut scene = Scene::new(&config());
    scene.frame();

    let device = scene.device();
    let geometry = device.draws_with_program("geometry");
    assert_eq!(geometry.len(), 1);
    let draw = geometry[0];
    assert!(matches!(draw.target, FramebufferTarget::Offscreen(_)));
    assert_eq!(draw.viewport, Viewport::new(0, 0, WIDTH, HEIGHT));
    match &draw.call {
        DrawCall::Indirect { indexed, commands } => {
            assert!(indexed);
            assert_eq!(commands.len(), 1);
            assert_eq!(commands[0].instance_count, 2);
            assert_eq!(commands[0].base_instance, 0);
            assert_eq!(commands[0].count, 36);
        }
        other => panic!("unexpected draw {:?}", other),
    }
    assert_eq!(device.depth_blit_count(), 1);
}

#[test]
fn test_forward_pass_blends_into_default_target() {
    let mut scene = Scene::new(&config());
    scene.frame();

    let forward = scene.device().draws_with_program("forward");
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].target, FramebufferTarget::Default);
    assert!(forward[0].blend.enabled);
    assert_eq!(forward[0].blend.src, BlendFactor::SrcAlpha);
    assert_eq!(forward[0].instance_total(), 1);
}

#[test]
fn test_light_pass_accumulates_additively() {
    let mut scene = Scene::new(&config());
    let stats = scene.frame();

    let light = scene.device().draws_with_program("deferred_light");
    assert_eq!(light.len(), 1);
    assert_eq!(light[0].blend, BlendState::ADDITIVE);
    assert_eq!(light[0].depth, DepthState { test: true, write: false, func: CompareFunc::Always });
    assert_eq!(light[0].call, DrawCall::Arrays { first: 0, count: 3 });
    assert_eq!((stats.point_lights, stats.spot_lights, stats.directional_lights), (1, 0, 1));
    assert_eq!(stats.lights_dropped, 0);
}

#[test]
fn test_state_restored_after_frame() {
    let mut scene = Scene::new(&config());
    scene.frame();

    let device = scene.device();
    use crate::render::GraphicsDevice;
    assert_eq!(device.viewport(), Viewport::new(0, 0, WIDTH, HEIGHT));
    assert_eq!(device.blend_state(), BlendState::DISABLED);
    assert_eq!(device.depth_state(), DepthState::default());
}

#[test]
fn test_shadow_maps_cover_every_tile() {
    let mut scene = Scene::new(&config());
    let stats = scene.frame();

    // Six cube faces plus four cascades.
    assert_eq!(stats.shadow_maps_rendered, 2);
    assert_eq!(stats.shadow_views, 10);
    assert_eq!(scene.device().draws_with_program("shadow_depth").len(), 10);

    let point = scene.world.get_component::<Light>(scene.point).unwrap();
    let handle = point.depth_handle.unwrap();
    assert!(scene.device().is_resident(handle));

    let cascades = scene.world.get_component::<LightSpaceMatrixArray>(scene.sun).unwrap();
    assert_eq!(cascades.count, 4);
    assert!(cascades.active_splits().windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_cascade_count_sets_strip_width() {
    let mut config = config();
    config.shadows.cascade_count = 3;
    let mut scene = Scene::new(&config);
    scene.frame();

    let shadow = scene.graph.pass::<ShadowPass>().unwrap();
    let map = *shadow.atlas().unwrap().get(scene.sun).unwrap();
    assert_eq!(map.tiles, 3);
    assert_eq!(scene.device().texture_desc(map.texture).unwrap().width, 96);

    let views = scene.device().draws_with_program("shadow_depth");
    let sun_tiles: Vec<Viewport> = views.iter().rev().take(3).rev().map(|d| d.viewport).collect();
    assert_eq!(sun_tiles, vec![map.tile_viewport(0), map.tile_viewport(1), map.tile_viewport(2)]);
}

#[test]
fn test_light_tables_carry_shadow_indices() {
    let mut scene = Scene::new(&config());
    scene.frame();

    let device = scene.device();
    let buffer = device.storage_binding(bindings::POINT_LIGHTS).unwrap();
    let bytes = device.buffer_data(buffer).unwrap();
    let point: PointLightData = bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<PointLightData>()]);
    assert_eq!(point.shadow_index, 0);
    assert_eq!(point.matrix_index, 0);
    assert_eq!(point.position_radius, [0.0, 3.0, 0.0, 10.0]);

    let packed = scene.graph.pass::<LightPass>().unwrap().last_packed();
    assert_eq!(packed.directionals[0].matrix_index, 6);
    assert_eq!(packed.matrices.len(), 10);
}

#[test]
fn test_removed_light_releases_shadow_map() {
    let mut scene = Scene::new(&config());
    scene.frame();
    let handle = scene.world.get_component::<Light>(scene.point).unwrap().depth_handle.unwrap();

    scene.world.destroy_entity(scene.point);
    scene.frame();

    let shadow = scene.graph.pass::<ShadowPass>().unwrap();
    assert_eq!(shadow.atlas().unwrap().len(), 1);
    assert!(!scene.device().is_resident(handle));
}

#[test]
fn test_shadow_map_limit_drops_extra_casters() {
    let mut config = config();
    config.renderer.max_shadow_maps = 1;
    let mut scene = Scene::new(&config);
    let stats = scene.frame();

    assert_eq!(stats.shadow_maps_rendered, 1);
    assert_eq!(stats.lights_dropped, 1);
    let sun = scene.world.get_component::<Light>(scene.sun).unwrap();
    assert!(sun.depth_handle.is_none());
}

#[test]
fn test_point_light_overflow_is_dropped() {
    let mut config = config();
    config.renderer.max_point_lights = 1;
    let mut scene = Scene::new(&config);
    spawn_light(&mut scene.world, Light::point(Vec3::new(1.0, 0.0, 0.0), 1.0, 4.0), Vec3::new(2.0, 1.0, 0.0), Quat::identity());
    TransformSystem::update(&mut scene.world);

    let stats = scene.frame();
    assert_eq!(stats.point_lights, 1);
    assert_eq!(stats.lights_dropped, 1);
}

#[test]
fn test_skybox_drawn_at_far_plane() {
    let mut scene = Scene::new(&config());
    let faces: [ImageData; 6] = std::array::from_fn(|_| ImageData::solid_color(2, 2, [40, 80, 160, 255]));
    scene.renderer.set_skybox(&faces).unwrap();
    let stats = scene.frame();

    assert_eq!(scene.pass_sequence(), vec!["shadow_depth", "geometry", "deferred_light", "forward", "skybox"]);
    assert_eq!(stats.passes_run, 5);
    let skybox = scene.device().draws_with_program("skybox");
    assert_eq!(skybox[0].depth, DepthState { test: true, write: false, func: CompareFunc::LessEqual });
    assert_eq!(skybox[0].instance_total(), 1);
}

#[test]
fn test_debug_view_toggle() {
    let mut scene = Scene::new(&config());
    scene.renderer.set_debug_mode(2);
    scene.frame();

    let debug = scene.device().draws_with_program("debug_view");
    assert_eq!(debug.len(), 1);
    let program = debug[0].program.unwrap();
    assert_eq!(
        scene.device().uniform(program, "u_debugMode"),
        Some(crate::render::device::UniformValue::Int(2))
    );

    scene.renderer.set_debug_mode(0);
    scene.frame();
    assert!(scene.device().draws_with_program("debug_view").is_empty());
}

#[test]
fn test_mesh_instances_share_one_command() {
    let mut scene = Scene::new(&config());
    let material = scene.renderer.get_material_index(&MaterialDefinition::colored([0.1, 0.9, 0.1, 1.0])).unwrap();
    let plane = scene.renderer.register_mesh(&primitives::plane(2.0).unwrap(), material, "tile").unwrap();
    let definition = scene.renderer.meshes_mut().define(plane);
    for i in 0..4 {
        let entity = spawn(&mut scene.world, Vec3::new(i as f32 * 2.0, -1.0, 0.0));
        scene.renderer.meshes_mut().attach_instance(&mut scene.world, entity, definition).unwrap();
    }
    TransformSystem::update(&mut scene.world);
    scene.frame();

    assert_eq!(scene.renderer.meshes().definition(definition).unwrap().instance_count, 4);
    let geometry = scene.device().draws_with_program("geometry");
    match &geometry[0].call {
        DrawCall::Indirect { commands, .. } => {
            assert_eq!(commands.len(), 2);
            let mut expected_base = 0;
            for command in commands {
                assert_eq!(command.base_instance, expected_base);
                expected_base += command.instance_count;
            }
            assert_eq!(expected_base, 6);
        }
        other => panic!("unexpected draw {:?}", other),
    }
}

#[test]
fn test_release_frees_pass_objects() {
    let mut scene = Scene::new(&config());
    scene.frame();
    let before = scene.device().live_texture_count();
    scene.graph.release(&mut scene.renderer);
    // Both shadow maps go away with the shadow pass.
    assert_eq!(scene.device().live_texture_count(), before - 2);
}
