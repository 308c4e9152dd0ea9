//! Skybox pass

use std::any::Any;

use super::{build_program, SavedState};
use crate::ecs::components::{DrawMode, Mesh};
use crate::foundation::math::Mat4;
use crate::render::batch::RenderBatch;
use crate::render::device::{CompareFunc, DepthState};
use crate::render::frame_graph::{FrameContext, RenderPass};
use crate::render::primitives;
use crate::render::renderer::Renderer;
use crate::render::shader::{builtin, ShaderProgram};
use crate::render::{RenderError, RenderResult};

/// Draws the renderer's cubemap behind everything else. The vertex shader
/// pins depth to the far plane, so the test is `LessEqual` with writes off.
#[derive(Debug, Default)]
pub struct SkyboxPass {
    program: Option<ShaderProgram>,
    cube: Option<Mesh>,
    batch: Option<RenderBatch>,
}

impl SkyboxPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for SkyboxPass {
    fn name(&self) -> &'static str {
        "skybox"
    }

    fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if self.program.is_some() {
            return Ok(());
        }
        self.program = Some(build_program(renderer.device(), &builtin::skybox())?);
        self.cube = Some(renderer.register_mesh(&primitives::cube()?, 0, "skybox_cube")?);
        self.batch = Some(RenderBatch::new("skybox", 1));
        Ok(())
    }

    fn is_enabled(&self, renderer: &Renderer) -> bool {
        renderer.skybox().is_some()
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        let (Some(program), Some(cube), Some(batch)) = (self.program.as_mut(), self.cube, self.batch.as_mut()) else {
            return Err(RenderError::PassNotReady("skybox"));
        };
        let parts = ctx.renderer.parts();
        let Some(cubemap) = parts.skybox else {
            return Ok(());
        };

        let device = parts.device;
        let saved = SavedState::capture(device);
        batch.clear();
        batch.add(&cube, DrawMode::Triangles, &Mat4::identity(), [1.0, 1.0]);
        batch.prepare(device)?;

        if program.bind(device) {
            device.set_depth_state(DepthState { test: true, write: false, func: CompareFunc::LessEqual });
            program.set_mat4(device, "u_view", &ctx.camera.view_matrix());
            program.set_mat4(device, "u_projection", &ctx.camera.projection_matrix());
            device.bind_texture_unit(0, Some(cubemap));
            program.set_int(device, "u_skybox", 0);
            parts.meshes.bind(device);
            parts.stats.draw_calls += batch.render(device);
            device.bind_texture_unit(0, None);
        }
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
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
