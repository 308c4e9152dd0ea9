//! Deferred geometry pass: fills the G-buffer

use std::any::Any;

use super::{build_program, fill_batch, SavedState};
use crate::render::batch::RenderBatch;
use crate::render::device::{ClearMask, DepthState, FramebufferTarget, Viewport};
use crate::render::frame_graph::{FrameContext, RenderPass};
use crate::render::renderer::Renderer;
use crate::render::shader::{builtin, ShaderProgram};
use crate::render::{RenderError, RenderResult};

/// Draws every deferred instance group into the G-buffer, then copies its
/// depth into the default framebuffer so later forward and skybox draws are
/// occluded correctly.
#[derive(Debug)]
pub struct GeometryPass {
    program: Option<ShaderProgram>,
    batch: Option<RenderBatch>,
}

impl GeometryPass {
    pub fn new() -> Self {
        Self { program: None, batch: None }
    }

    pub fn batch(&self) -> Option<&RenderBatch> {
        self.batch.as_ref()
    }
}

impl Default for GeometryPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for GeometryPass {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if self.program.is_some() {
            return Ok(());
        }
        let capacity = renderer.config().initial_batch_capacity;
        self.program = Some(build_program(renderer.device(), &builtin::geometry())?);
        self.batch = Some(RenderBatch::new("geometry", capacity));
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        let (Some(program), Some(batch)) = (self.program.as_mut(), self.batch.as_mut()) else {
            return Err(RenderError::PassNotReady("geometry"));
        };
        let parts = ctx.renderer.parts();
        let device = parts.device;
        let saved = SavedState::capture(device);

        let (width, height) = parts.gbuffer.size();
        device.bind_framebuffer(FramebufferTarget::Offscreen(parts.gbuffer.framebuffer()));
        device.set_viewport(Viewport::new(0, 0, width, height));
        device.set_depth_state(DepthState::default());
        device.clear(ClearMask::COLOR | ClearMask::DEPTH, [0.0; 4]);

        fill_batch(batch, ctx.instances, true, parts.materials);
        batch.prepare(device)?;
        if !batch.is_empty() && program.bind(device) {
            program.set_mat4(device, "u_viewProjection", &ctx.camera.view_projection());
            parts.materials.bind(device);
            parts.meshes.bind(device);
            parts.stats.draw_calls += batch.render(device);
        }

        device.bind_framebuffer(FramebufferTarget::Default);
        device.blit_depth(parts.gbuffer.framebuffer(), FramebufferTarget::Default, width, height);
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
