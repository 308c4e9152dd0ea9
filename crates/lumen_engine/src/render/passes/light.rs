//! Deferred lighting pass
//!
//! Point and spot lights are packed into storage buffers, directional lights
//! into uniform arrays. A shadow-casting light takes one slot in the shared
//! shadow-handle table and one matrix slot per tile (six for point lights,
//! one per cascade for directional lights). Lights and shadows that do not
//! fit the configured tables are dropped with a warning.

use std::any::Any;

use super::{build_program, draw_fullscreen, SavedState};
use crate::config::RendererConfig;
use crate::ecs::components::{Light, LightKind, LightSpaceMatrix, LightSpaceMatrixArray, LIGHT_SPACE_ARRAY_SIZE};
use crate::ecs::{Entity, World};
use crate::foundation::math::Mat4;
use crate::render::bindings;
use crate::render::device::{
    BlendState, BufferId, BufferKind, CompareFunc, DepthState, FramebufferTarget, GraphicsDevice, Viewport,
};
use crate::render::frame_graph::{FrameContext, RenderPass};
use crate::render::gbuffer::GBufferChannel;
use crate::render::lights_gpu::{DirectionalLightData, PointLightData, ShadowHandle, SpotLightData};
use crate::render::renderer::Renderer;
use crate::render::shader::{builtin, ShaderProgram};
use crate::render::shadow::light_pose;
use crate::render::{RenderError, RenderResult};

/// Directional lights the lighting shader can take as uniforms
pub const MAX_DIRECTIONAL_UNIFORMS: usize = 4;

/// One frame's light tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedLights {
    pub points: Vec<PointLightData>,
    pub spots: Vec<SpotLightData>,
    pub directionals: Vec<DirectionalLightData>,
    /// Cascade far depths, one row per directional light
    pub cascade_splits: Vec<[f32; LIGHT_SPACE_ARRAY_SIZE]>,
    pub shadow_handles: Vec<ShadowHandle>,
    pub matrices: Vec<[[f32; 4]; 4]>,
    /// Lights or shadows left out because a table was full
    pub dropped: usize,
}

impl PackedLights {
    /// Claim a shadow slot and `matrices.len()` matrix slots. Returns the
    /// shadow and first matrix index, or `None` when either table is full.
    fn push_shadow(&mut self, light: &Light, matrices: &[Mat4], config: &RendererConfig) -> Option<(i32, i32)> {
        let handle = light.depth_handle?;
        if matrices.is_empty() {
            return None;
        }
        if self.shadow_handles.len() >= config.max_shadow_maps
            || self.matrices.len() + matrices.len() > config.max_light_space_matrices
        {
            self.dropped += 1;
            return None;
        }
        let shadow_index = self.shadow_handles.len() as i32;
        let matrix_index = self.matrices.len() as i32;
        self.shadow_handles.push(handle.into());
        self.matrices.extend(matrices.iter().map(|m| <[[f32; 4]; 4]>::from(*m)));
        Some((shadow_index, matrix_index))
    }
}

fn matrix_array(world: &World, entity: Entity) -> Vec<Mat4> {
    world
        .get_component::<LightSpaceMatrixArray>(entity)
        .map(|a| a.active().to_vec())
        .unwrap_or_default()
}

/// Build the light tables from every active light in `world`
///
/// Shadow indices are assigned in iteration order and stay consistent
/// between the handle table and the matrix table.
pub fn pack_lights(world: &World, config: &RendererConfig) -> PackedLights {
    let mut packed = PackedLights::default();
    let max_directional = config.max_directional_lights.min(MAX_DIRECTIONAL_UNIFORMS);

    for (entity, light) in world.query::<Light>() {
        if !light.active {
            continue;
        }
        let (position, forward) = light_pose(world, entity);
        let shadowed = light.cast_shadows && light.depth_handle.is_some();

        match light.kind {
            LightKind::Point { radius } => {
                if packed.points.len() >= config.max_point_lights {
                    packed.dropped += 1;
                    continue;
                }
                let mut data = PointLightData::new(&position, radius, &light.color, light.intensity);
                if shadowed {
                    let faces = matrix_array(world, entity);
                    if let Some((shadow, matrix)) = packed.push_shadow(light, &faces, config) {
                        data.shadow_index = shadow;
                        data.matrix_index = matrix;
                    }
                }
                packed.points.push(data);
            }
            LightKind::Spot { inner_cutoff, outer_cutoff, range } => {
                if packed.spots.len() >= config.max_spot_lights {
                    packed.dropped += 1;
                    continue;
                }
                let mut data = SpotLightData::new(
                    &position,
                    &forward,
                    range,
                    inner_cutoff,
                    outer_cutoff,
                    &light.color,
                    light.intensity,
                );
                if shadowed {
                    let matrix: Vec<Mat4> = world
                        .get_component::<LightSpaceMatrix>(entity)
                        .map(|m| vec![m.matrix])
                        .unwrap_or_default();
                    if let Some((shadow, matrix)) = packed.push_shadow(light, &matrix, config) {
                        data.shadow_index = shadow;
                        data.matrix_index = matrix;
                    }
                }
                packed.spots.push(data);
            }
            LightKind::Directional { .. } => {
                if packed.directionals.len() >= max_directional {
                    packed.dropped += 1;
                    continue;
                }
                let mut data = DirectionalLightData::new(&forward, &light.color, light.intensity);
                let mut splits = [0.0; LIGHT_SPACE_ARRAY_SIZE];
                if shadowed {
                    if let Some(array) = world.get_component::<LightSpaceMatrixArray>(entity) {
                        if let Some((shadow, matrix)) = packed.push_shadow(light, array.active(), config) {
                            data.shadow_index = shadow;
                            data.matrix_index = matrix;
                            data.cascade_count = array.count as i32;
                            splits[..array.count].copy_from_slice(array.active_splits());
                        }
                    }
                }
                packed.directionals.push(data);
                packed.cascade_splits.push(splits);
            }
        }
    }

    if packed.dropped > 0 {
        log::warn!("Light tables full: {} lights or shadows dropped this frame", packed.dropped);
    }
    packed
}

#[derive(Debug, Clone, Copy)]
struct LightBuffers {
    points: BufferId,
    spots: BufferId,
    shadow_handles: BufferId,
    matrices: BufferId,
}

impl LightBuffers {
    fn create(device: &mut dyn GraphicsDevice, config: &RendererConfig) -> RenderResult<Self> {
        let sized = |count: usize, stride: usize| count.max(1) * stride;
        let points = device.create_buffer(
            BufferKind::Storage,
            sized(config.max_point_lights, std::mem::size_of::<PointLightData>()),
            "point_lights",
        )?;
        let spots = device.create_buffer(
            BufferKind::Storage,
            sized(config.max_spot_lights, std::mem::size_of::<SpotLightData>()),
            "spot_lights",
        )?;
        let shadow_handles = device.create_buffer(
            BufferKind::Storage,
            sized(config.max_shadow_maps, std::mem::size_of::<ShadowHandle>()),
            "shadow_handles",
        )?;
        let matrices = device.create_buffer(
            BufferKind::Storage,
            sized(config.max_light_space_matrices, std::mem::size_of::<[[f32; 4]; 4]>()),
            "light_space_matrices",
        )?;
        Ok(Self { points, spots, shadow_handles, matrices })
    }

    fn upload(&self, device: &mut dyn GraphicsDevice, packed: &PackedLights) -> RenderResult<()> {
        if !packed.points.is_empty() {
            device.write_buffer(self.points, 0, bytemuck::cast_slice(&packed.points))?;
        }
        if !packed.spots.is_empty() {
            device.write_buffer(self.spots, 0, bytemuck::cast_slice(&packed.spots))?;
        }
        if !packed.shadow_handles.is_empty() {
            device.write_buffer(self.shadow_handles, 0, bytemuck::cast_slice(&packed.shadow_handles))?;
        }
        if !packed.matrices.is_empty() {
            device.write_buffer(self.matrices, 0, bytemuck::cast_slice(&packed.matrices))?;
        }
        Ok(())
    }

    fn bind(&self, device: &mut dyn GraphicsDevice) {
        device.bind_storage_buffer(bindings::POINT_LIGHTS, self.points);
        device.bind_storage_buffer(bindings::SPOT_LIGHTS, self.spots);
        device.bind_storage_buffer(bindings::SHADOW_HANDLES, self.shadow_handles);
        device.bind_storage_buffer(bindings::LIGHT_MATRICES, self.matrices);
    }

    fn release(&self, device: &mut dyn GraphicsDevice) {
        for buffer in [self.points, self.spots, self.shadow_handles, self.matrices] {
            device.delete_buffer(buffer);
        }
    }
}

/// Fullscreen lighting accumulation over the G-buffer
#[derive(Debug, Default)]
pub struct LightPass {
    program: Option<ShaderProgram>,
    buffers: Option<LightBuffers>,
    last: PackedLights,
}

impl LightPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables packed by the most recent frame
    pub fn last_packed(&self) -> &PackedLights {
        &self.last
    }
}

impl RenderPass for LightPass {
    fn name(&self) -> &'static str {
        "light"
    }

    fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if self.program.is_some() {
            return Ok(());
        }
        let config = renderer.config().clone();
        let device = renderer.device();
        let program = build_program(device, &builtin::deferred_light())?;
        self.buffers = Some(LightBuffers::create(device, &config)?);
        self.program = Some(program);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        let (Some(program), Some(buffers)) = (self.program.as_mut(), self.buffers) else {
            return Err(RenderError::PassNotReady("light"));
        };
        let parts = ctx.renderer.parts();
        let packed = pack_lights(ctx.world, parts.config);
        let device = parts.device;

        buffers.upload(device, &packed)?;
        let saved = SavedState::capture(device);
        if program.bind(device) {
            buffers.bind(device);
            device.bind_framebuffer(FramebufferTarget::Default);
            device.set_viewport(Viewport::new(0, 0, parts.config.width, parts.config.height));
            device.set_blend_state(BlendState::ADDITIVE);
            device.set_depth_state(DepthState { test: true, write: false, func: CompareFunc::Always });

            parts.gbuffer.bind_textures(device);
            for (unit, channel) in GBufferChannel::ALL.iter().enumerate() {
                program.set_int(device, channel.sampler_name(), unit as i32);
            }
            program.set_mat4(device, "u_view", &ctx.camera.view_matrix());
            program.set_vec3(device, "u_cameraPosition", &ctx.camera.position);
            program.set_int(device, "u_pointLightCount", packed.points.len() as i32);
            program.set_int(device, "u_spotLightCount", packed.spots.len() as i32);
            program.set_int(device, "u_dirLightCount", packed.directionals.len() as i32);

            for (i, (light, splits)) in packed.directionals.iter().zip(&packed.cascade_splits).enumerate() {
                program.set_vec3(device, &format!("u_dirLightDirection[{}]", i), &light.direction());
                program.set_vec3(device, &format!("u_dirLightColor[{}]", i), &light.color());
                program.set_float(device, &format!("u_dirLightIntensity[{}]", i), light.color_intensity[3]);
                program.set_int(device, &format!("u_dirLightShadowIndex[{}]", i), light.shadow_index);
                program.set_int(device, &format!("u_dirLightMatrixIndex[{}]", i), light.matrix_index);
                program.set_int(device, &format!("u_dirLightCascadeCount[{}]", i), light.cascade_count);
                for (c, split) in splits.iter().enumerate().take(light.cascade_count.max(0) as usize) {
                    let slot = i * LIGHT_SPACE_ARRAY_SIZE + c;
                    program.set_float(device, &format!("u_cascadeSplits[{}]", slot), *split);
                }
            }

            draw_fullscreen(device);
            parts.stats.draw_calls += 1;
        }
        saved.restore(device);

        parts.stats.point_lights = packed.points.len();
        parts.stats.spot_lights = packed.spots.len();
        parts.stats.directional_lights = packed.directionals.len();
        parts.stats.lights_dropped += packed.dropped;
        self.last = packed;
        Ok(())
    }

    fn release(&mut self, renderer: &mut Renderer) {
        let device = renderer.device();
        if let Some(program) = self.program.as_mut() {
            program.destroy(device);
        }
        if let Some(buffers) = self.buffers.take() {
            buffers.release(device);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::Position;
    use crate::foundation::math::Vec3;
    use crate::render::device::BindlessHandle;
    use crate::render::lights_gpu::NO_SHADOW;

    fn spawn(world: &mut World, light: Light, position: Vec3) -> Entity {
        let entity = world.create_entity();
        world.add_component(entity, light).unwrap();
        world.add_component(entity, Position(position)).unwrap();
        entity
    }

    fn shadowed(mut light: Light, handle: u64) -> Light {
        light.cast_shadows = true;
        light.depth_handle = Some(BindlessHandle(handle));
        light
    }

    #[test]
    fn test_overflow_drops_extra_lights() {
        let mut world = World::new();
        for i in 0..5 {
            spawn(&mut world, Light::point(Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0), Vec3::new(i as f32, 0.0, 0.0));
        }
        let config = RendererConfig { max_point_lights: 3, ..RendererConfig::default() };
        let packed = pack_lights(&world, &config);
        assert_eq!(packed.points.len(), 3);
        assert_eq!(packed.dropped, 2);
        assert_eq!(packed.points[2].position_radius[0], 2.0);
    }

    #[test]
    fn test_inactive_lights_skipped() {
        let mut world = World::new();
        let mut light = Light::spot(Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0, 20.0, 15.0);
        light.active = false;
        spawn(&mut world, light, Vec3::zeros());
        let packed = pack_lights(&world, &RendererConfig::default());
        assert!(packed.spots.is_empty());
        assert_eq!(packed.dropped, 0);
    }

    #[test]
    fn test_shadow_indices_are_threaded() {
        let mut world = World::new();
        let point = spawn(&mut world, shadowed(Light::point(Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0), 10), Vec3::zeros());
        let mut faces = LightSpaceMatrixArray::default();
        faces.count = 6;
        world.add_component(point, faces).unwrap();

        let spot = spawn(
            &mut world,
            shadowed(Light::spot(Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0, 20.0, 15.0), 20),
            Vec3::zeros(),
        );
        world.add_component(spot, LightSpaceMatrix { matrix: Mat4::identity() }).unwrap();

        let sun = spawn(&mut world, shadowed(Light::directional(Vec3::new(1.0, 1.0, 1.0), 2.0, 20.0), 30), Vec3::zeros());
        let mut cascades = LightSpaceMatrixArray::default();
        cascades.count = 3;
        cascades.split_depths[..3].copy_from_slice(&[5.0, 20.0, 100.0]);
        world.add_component(sun, cascades).unwrap();

        spawn(&mut world, Light::point(Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0), Vec3::zeros());

        let packed = pack_lights(&world, &RendererConfig::default());
        assert_eq!(packed.shadow_handles.len(), 3);
        assert_eq!(packed.matrices.len(), 6 + 1 + 3);
        assert_eq!((packed.points[0].shadow_index, packed.points[0].matrix_index), (0, 0));
        assert_eq!((packed.spots[0].shadow_index, packed.spots[0].matrix_index), (1, 6));
        assert_eq!(packed.directionals[0].shadow_index, 2);
        assert_eq!(packed.directionals[0].matrix_index, 7);
        assert_eq!(packed.directionals[0].cascade_count, 3);
        assert_eq!(packed.cascade_splits[0][..3], [5.0, 20.0, 100.0]);
        assert_eq!(packed.points[1].shadow_index, NO_SHADOW);
        assert_eq!(packed.shadow_handles[1], ShadowHandle { lo: 20, hi: 0 });
    }

    #[test]
    fn test_full_matrix_table_drops_shadow_not_light() {
        let mut world = World::new();
        let point = spawn(&mut world, shadowed(Light::point(Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0), 10), Vec3::zeros());
        let mut faces = LightSpaceMatrixArray::default();
        faces.count = 6;
        world.add_component(point, faces).unwrap();

        let config = RendererConfig { max_light_space_matrices: 4, ..RendererConfig::default() };
        let packed = pack_lights(&world, &config);
        assert_eq!(packed.points.len(), 1);
        assert_eq!(packed.points[0].shadow_index, NO_SHADOW);
        assert!(packed.shadow_handles.is_empty());
        assert_eq!(packed.dropped, 1);
    }
}
