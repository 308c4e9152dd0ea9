//! Headless scene demo
//!
//! Builds a small lit scene (a floor, spinning cubes, a glass sphere, an
//! orbiting shadowed lamp and a sun), runs it for a fixed number of frames
//! against the recording device and logs the per-frame statistics.
//!
//! Usage: `scene_demo [config.toml|config.ron] [frames]`

use std::f32::consts::TAU;

use lumen_engine::foundation::logging;
use lumen_engine::prelude::*;
use lumen_engine::spatial::Octree;
use rand::prelude::*;

const DEFAULT_FRAMES: u32 = 240;
const FRAME_TIME: f32 = 1.0 / 60.0;
const NUM_CUBES: usize = 12;
const INSTANCED_CUBES: usize = 24;

/// Spins its entity around the Y axis
struct Spinner {
    speed: f32,
}

impl Script for Spinner {
    fn update(&mut self, ctx: &mut ScriptContext<'_>, delta_time: f32) {
        let entity = ctx.entity();
        let delta = Quat::from_axis_angle(&Vec3::y_axis(), self.speed * delta_time);
        if let Err(e) = TransformSystem::rotate(ctx.world_mut(), entity, delta) {
            log::warn!("Spinner on {:?}: {}", entity, e);
        }
    }
}

/// Moves its entity on a horizontal circle
struct Orbit {
    radius: f32,
    height: f32,
    speed: f32,
    angle: f32,
}

impl Script for Orbit {
    fn start(&mut self, _ctx: &mut ScriptContext<'_>) {
        log::info!("Lamp orbit started (radius {})", self.radius);
    }

    fn update(&mut self, ctx: &mut ScriptContext<'_>, delta_time: f32) {
        self.angle = (self.angle + self.speed * delta_time) % TAU;
        let position = Vec3::new(self.radius * self.angle.cos(), self.height, self.radius * self.angle.sin());
        let entity = ctx.entity();
        if let Err(e) = TransformSystem::set_position(ctx.world_mut(), entity, position) {
            log::warn!("Orbit on {:?}: {}", entity, e);
        }
    }
}

/// Destroys its entity, children included, after a delay
struct Fuse {
    remaining: f32,
}

impl Script for Fuse {
    fn update(&mut self, ctx: &mut ScriptContext<'_>, delta_time: f32) {
        self.remaining -= delta_time;
        if self.remaining <= 0.0 {
            ctx.destroy_self();
        }
    }

    fn on_destroy(&mut self, ctx: &mut ScriptContext<'_>) {
        log::info!("Fuse burnt out, removing {:?}", ctx.entity());
    }
}

fn at(position: Vec3) -> Transform {
    Transform::new(position, Quat::identity(), Vec3::new(1.0, 1.0, 1.0))
}

fn load_config(path: Option<&String>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn build_scene(engine: &mut Engine, octree: &mut Octree<Entity>) -> Result<(), EngineError> {
    let mut rng = rand::thread_rng();

    let floor_material = engine.renderer_mut().get_material_index(&MaterialDefinition::colored([0.6, 0.6, 0.6, 1.0]))?;
    let glass_material =
        engine.renderer_mut().get_material_index(&MaterialDefinition::colored([0.4, 0.7, 1.0, 0.35]).forward())?;

    let floor = engine.renderer_mut().register_mesh(&primitives::plane(40.0)?, floor_material, "floor")?;
    let sphere = engine.renderer_mut().register_mesh(&primitives::uv_sphere(1.0, 24, 16)?, glass_material, "sphere")?;

    let cube = engine.renderer_mut().register_mesh(&primitives::cube()?, 0, "cube")?;

    let scene = engine.scene_mut();
    let entity = scene.create_entity(&Transform::identity())?;
    scene.world_mut().add_component(entity, floor)?;
    let entity = scene.create_entity(&at(Vec3::new(0.0, 1.5, 0.0)))?;
    scene.world_mut().add_component(entity, sphere)?;

    // Individually coloured cubes, each with its own material
    for i in 0..NUM_CUBES {
        let color = [rng.gen_range(0.2..1.0), rng.gen_range(0.2..1.0), rng.gen_range(0.2..1.0), 1.0];
        let definition = MaterialDefinition::colored(color).with_pbr(rng.gen_range(0.0..1.0), rng.gen_range(0.2..0.9));
        let mut mesh = cube;
        mesh.material_index = engine.renderer_mut().material_index_or_default(&definition);

        let angle = i as f32 / NUM_CUBES as f32 * TAU;
        let position = Vec3::new(6.0 * angle.cos(), 0.5, 6.0 * angle.sin());
        let scene = engine.scene_mut();
        let spinner = scene.create_entity(&at(position))?;
        scene.world_mut().add_component(spinner, mesh)?;
        scene.add_script(spinner, ScriptKey("spinner"), Box::new(Spinner { speed: rng.gen_range(0.5..3.0) }))?;
        octree.insert(spinner, position, 0.87);
    }

    // One shared definition drawn many times
    let mut shared = cube;
    shared.material_index = floor_material;
    let definition = engine.renderer_mut().meshes_mut().define(shared);
    let cluster = engine.scene_mut().create_entity(&at(Vec3::new(-3.0, 0.25, -3.0)))?;
    engine.scene_mut().add_script(cluster, ScriptKey("fuse"), Box::new(Fuse { remaining: 2.0 }))?;
    for _ in 0..INSTANCED_CUBES {
        let offset = Vec3::new(rng.gen_range(-1.5..1.5), rng.gen_range(0.0..1.0), rng.gen_range(-1.5..1.5));
        let position = Vec3::new(-3.0, 0.25, -3.0) + offset;
        let child = engine.scene_mut().create_child(cluster, &at(position))?;
        engine.attach_instance(child, definition)?;
    }

    let scene = engine.scene_mut();
    let lamp = scene.create_entity(&at(Vec3::new(4.0, 3.0, 0.0)))?;
    scene.world_mut().add_component(lamp, Light::point(Vec3::new(1.0, 0.85, 0.6), 4.0, 12.0).with_shadows())?;
    scene.add_script(lamp, ScriptKey("orbit"), Box::new(Orbit { radius: 4.0, height: 3.0, speed: 0.8, angle: 0.0 }))?;

    let sun_rotation = Quat::from_axis_angle(&Vec3::x_axis(), -1.0);
    let sun = scene.create_entity(&Transform::new(Vec3::new(0.0, 10.0, 0.0), sun_rotation, Vec3::new(1.0, 1.0, 1.0)))?;
    scene.world_mut().add_component(sun, Light::directional(Vec3::new(1.0, 1.0, 0.95), 1.0, 20.0).with_shadows())?;

    let camera = engine.camera_mut();
    camera.position = Vec3::new(0.0, 6.0, 14.0);
    camera.set_target(&Vec3::zeros());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1))?;
    let frames = match args.get(2) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_FRAMES,
    };
    logging::init_with_level(&config.log_level);
    log::info!("Starting scene demo for {} frames", frames);

    let mut octree = Octree::new(config.spatial.clone());
    let mut engine = Engine::headless(config)?;
    build_scene(&mut engine, &mut octree)?;

    let mut total_draws = 0;
    for frame in 0..frames {
        let stats = engine.frame(FRAME_TIME)?;
        total_draws += stats.draw_calls;
        if frame % 60 == 0 {
            log::info!(
                "frame {}: {} instances, {} draw calls, {} lights ({} dropped), {} shadow views, {} transforms",
                stats.frame,
                stats.instances,
                stats.draw_calls,
                stats.point_lights + stats.spot_lights + stats.directional_lights,
                stats.lights_dropped,
                stats.shadow_views,
                stats.transforms_updated
            );
        }
    }

    let nearby = octree.query_radius(Vec3::new(6.0, 0.5, 0.0), 3.0);
    log::info!("{} cubes within 3 units of the first cube", nearby.len());
    log::info!("Submitted {} draw calls over {} frames", total_draws, frames);

    engine.shutdown();
    log::info!("Scene demo completed successfully");
    Ok(())
}
