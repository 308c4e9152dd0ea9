//! Shadow map rendering
//!
//! For every active shadow-casting light the pass picks a tile layout (six
//! cube faces, one spot tile, or one tile per cascade), computes the
//! light-space matrices, stores them on the light entity and renders scene
//! depth into each tile of the light's strip texture. The resulting bindless
//! handle is written back to `Light::depth_handle` for the lighting pass.

use std::any::Any;
use std::collections::HashSet;

use super::{build_program, SavedState};
use crate::config::ShadowConfig;
use crate::ecs::components::{Light, LightKind, LightSpaceMatrix, LightSpaceMatrixArray};
use crate::ecs::{Entity, World};
use crate::foundation::math::Mat4;
use crate::render::batch::RenderBatch;
use crate::render::camera::Camera;
use crate::render::device::{
    BindlessHandle, ClearMask, DepthState, FramebufferDesc, FramebufferId, FramebufferTarget, GraphicsDevice, TextureId,
    Viewport,
};
use crate::render::frame_graph::{FrameContext, RenderPass};
use crate::render::renderer::Renderer;
use crate::render::shader::{builtin, ShaderProgram};
use crate::render::shadow::{directional_cascades, light_pose, point_light_faces, spot_light_matrix, ShadowAtlasCache};
use crate::render::{RenderError, RenderResult};

/// Light-space transforms of one light for the current frame
enum LightViews {
    Single(Mat4),
    Array(LightSpaceMatrixArray),
}

impl LightViews {
    fn matrices(&self) -> &[Mat4] {
        match self {
            LightViews::Single(m) => std::slice::from_ref(m),
            LightViews::Array(a) => a.active(),
        }
    }
}

fn light_views(world: &World, entity: Entity, light: &Light, camera: &Camera, config: &ShadowConfig) -> LightViews {
    let (position, forward) = light_pose(world, entity);
    match light.kind {
        LightKind::Point { radius } => LightViews::Array(point_light_faces(&position, config.point_near, radius)),
        LightKind::Spot { outer_cutoff, range, .. } => {
            LightViews::Single(spot_light_matrix(&position, &forward, outer_cutoff, config.spot_near, range))
        }
        LightKind::Directional { ortho_size } => {
            LightViews::Array(directional_cascades(camera, &forward, &position, ortho_size, config))
        }
    }
}

fn set_depth_handle(world: &mut World, entity: Entity, handle: Option<BindlessHandle>) {
    if let Some(light) = world.get_component_mut::<Light>(entity) {
        light.depth_handle = handle;
    }
}

fn store_views(world: &mut World, entity: Entity, views: &LightViews) {
    let result = match views {
        LightViews::Single(matrix) => world.add_component(entity, LightSpaceMatrix { matrix: *matrix }),
        LightViews::Array(array) => world.add_component(entity, *array),
    };
    if let Err(e) = result {
        log::warn!("Could not store light-space matrices: {}", e);
    }
}

#[derive(Debug, Default)]
pub struct ShadowPass {
    program: Option<ShaderProgram>,
    batch: Option<RenderBatch>,
    atlas: Option<ShadowAtlasCache>,
    framebuffer: Option<FramebufferId>,
}

impl ShadowPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atlas(&self) -> Option<&ShadowAtlasCache> {
        self.atlas.as_ref()
    }

    /// Point the shadow framebuffer at `texture`, creating it on first use
    fn target(
        &mut self,
        device: &mut dyn GraphicsDevice,
        texture: TextureId,
        width: u32,
        height: u32,
    ) -> RenderResult<FramebufferId> {
        match self.framebuffer {
            Some(framebuffer) => {
                device.set_depth_attachment(framebuffer, texture)?;
                Ok(framebuffer)
            }
            None => {
                let framebuffer = device.create_framebuffer(&FramebufferDesc {
                    label: "shadow".to_string(),
                    width,
                    height,
                    color_attachments: Vec::new(),
                    depth_attachment: Some(texture),
                })?;
                self.framebuffer = Some(framebuffer);
                Ok(framebuffer)
            }
        }
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if self.program.is_some() {
            return Ok(());
        }
        let capacity = renderer.config().initial_batch_capacity;
        let tile_size = renderer.shadow_config().map_size;
        self.program = Some(build_program(renderer.device(), &builtin::shadow_depth())?);
        self.batch = Some(RenderBatch::new("shadow", capacity));
        self.atlas = Some(ShadowAtlasCache::new(tile_size));
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        if self.program.is_none() || self.batch.is_none() || self.atlas.is_none() {
            return Err(RenderError::PassNotReady("shadow"));
        }
        let lights: Vec<(Entity, Light)> = ctx.world.query::<Light>().map(|(e, l)| (e, l.clone())).collect();
        let parts = ctx.renderer.parts();
        let device = parts.device;
        let max_maps = parts.config.max_shadow_maps;

        let saved = SavedState::capture(device);
        if let Some(batch) = self.batch.as_mut() {
            batch.clear();
            for (_, group) in ctx.instances.groups() {
                batch.add_instances(&group.mesh, group.mode, &group.worlds, [1.0, 1.0]);
            }
            batch.prepare(device)?;
        }

        let mut live = HashSet::new();
        let mut rendered = 0;
        for (entity, light) in &lights {
            if !light.active || !light.cast_shadows {
                set_depth_handle(ctx.world, *entity, None);
                continue;
            }
            if rendered >= max_maps {
                log::warn!("Shadow map limit of {} reached; {:?} renders unshadowed", max_maps, entity);
                set_depth_handle(ctx.world, *entity, None);
                parts.stats.lights_dropped += 1;
                continue;
            }

            let views = light_views(ctx.world, *entity, light, ctx.camera, parts.shadows);
            let matrices = views.matrices();
            if matrices.is_empty() {
                set_depth_handle(ctx.world, *entity, None);
                continue;
            }

            let map = match self.atlas.as_mut() {
                Some(atlas) => atlas.acquire(device, *entity, matrices.len() as u32)?,
                None => return Err(RenderError::PassNotReady("shadow")),
            };
            let framebuffer = self.target(device, map.texture, map.width(), map.tile_size)?;
            device.bind_framebuffer(FramebufferTarget::Offscreen(framebuffer));
            device.set_viewport(Viewport::new(0, 0, map.width(), map.tile_size));
            device.set_depth_state(DepthState::default());
            device.clear(ClearMask::DEPTH, [0.0; 4]);

            if let (Some(program), Some(batch)) = (self.program.as_mut(), self.batch.as_ref()) {
                if !batch.is_empty() && program.bind(device) {
                    parts.meshes.bind(device);
                    for (tile, matrix) in matrices.iter().enumerate() {
                        device.set_viewport(map.tile_viewport(tile as u32));
                        program.set_mat4(device, "u_viewProjection", matrix);
                        parts.stats.draw_calls += batch.render(device);
                        parts.stats.shadow_views += 1;
                    }
                }
            }

            store_views(ctx.world, *entity, &views);
            set_depth_handle(ctx.world, *entity, Some(map.handle));
            live.insert(*entity);
            rendered += 1;
        }
        parts.stats.shadow_maps_rendered = rendered;

        if let Some(atlas) = self.atlas.as_mut() {
            let released = atlas.retain(device, &live);
            if released > 0 {
                log::debug!("Released {} unused shadow maps", released);
            }
        }
        device.bind_framebuffer(FramebufferTarget::Default);
        saved.restore(device);
        Ok(())
    }

    fn release(&mut self, renderer: &mut Renderer) {
        let device = renderer.device();
        if let Some(program) = self.program.as_mut() {
            program.destroy(device);
        }
        if let Some(batch) = self.batch.as_mut() {
            batch.release(device);
        }
        if let Some(atlas) = self.atlas.as_mut() {
            atlas.clear(device);
        }
        if let Some(framebuffer) = self.framebuffer.take() {
            device.delete_framebuffer(framebuffer);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
