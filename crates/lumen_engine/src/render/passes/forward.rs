//! Forward pass for materials that opt out of the G-buffer

use std::any::Any;

use super::{build_program, fill_batch, SavedState};
use crate::render::batch::RenderBatch;
use crate::render::device::{BlendFactor, BlendState, DepthState};
use crate::render::frame_graph::{FrameContext, RenderPass};
use crate::render::renderer::Renderer;
use crate::render::shader::{builtin, ShaderProgram};
use crate::render::{RenderError, RenderResult};

const ALPHA_BLEND: BlendState = BlendState {
    enabled: true,
    src: BlendFactor::SrcAlpha,
    dst: BlendFactor::OneMinusSrcAlpha,
};

/// Alpha-blended draw of the non-deferred instance groups straight into the
/// default framebuffer, depth-tested against the blitted G-buffer depth
#[derive(Debug, Default)]
pub struct ForwardPass {
    program: Option<ShaderProgram>,
    batch: Option<RenderBatch>,
}

impl ForwardPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(&self) -> Option<&RenderBatch> {
        self.batch.as_ref()
    }
}

impl RenderPass for ForwardPass {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if self.program.is_some() {
            return Ok(());
        }
        let capacity = renderer.config().initial_batch_capacity;
        self.program = Some(build_program(renderer.device(), &builtin::forward())?);
        self.batch = Some(RenderBatch::new("forward", capacity));
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        let (Some(program), Some(batch)) = (self.program.as_mut(), self.batch.as_mut()) else {
            return Err(RenderError::PassNotReady("forward"));
        };
        let parts = ctx.renderer.parts();
        fill_batch(batch, ctx.instances, false, parts.materials);
        if batch.is_empty() {
            return Ok(());
        }

        let device = parts.device;
        let saved = SavedState::capture(device);
        batch.prepare(device)?;
        if program.bind(device) {
            device.set_depth_state(DepthState::default());
            device.set_blend_state(ALPHA_BLEND);
            program.set_mat4(device, "u_viewProjection", &ctx.camera.view_projection());
            program.set_vec3(device, "u_cameraPosition", &ctx.camera.position);
            program.set_vec3(device, "u_ambientColor", &parts.ambient_color);
            parts.materials.bind(device);
            parts.meshes.bind(device);
            parts.stats.draw_calls += batch.render(device);
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
