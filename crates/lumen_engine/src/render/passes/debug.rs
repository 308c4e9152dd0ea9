//! G-buffer visualization

use std::any::Any;

use super::{build_program, draw_fullscreen, SavedState};
use crate::render::device::{BlendState, CompareFunc, DepthState, FramebufferTarget, Viewport};
use crate::render::frame_graph::{FrameContext, RenderPass};
use crate::render::gbuffer::GBufferChannel;
use crate::render::renderer::Renderer;
use crate::render::shader::{builtin, ShaderProgram};
use crate::render::{RenderError, RenderResult};

/// Overwrites the frame with one G-buffer channel while the renderer's debug
/// mode is non-zero: 1 position, 2 normal, 3 albedo, 4 PBR, 5 emissive,
/// anything else linearized depth.
#[derive(Debug, Default)]
pub struct DebugPass {
    program: Option<ShaderProgram>,
}

impl DebugPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for DebugPass {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if self.program.is_none() {
            self.program = Some(build_program(renderer.device(), &builtin::debug_view())?);
        }
        Ok(())
    }

    fn is_enabled(&self, renderer: &Renderer) -> bool {
        renderer.debug_mode() != 0
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        let program = self.program.as_mut().ok_or(RenderError::PassNotReady("debug"))?;
        let parts = ctx.renderer.parts();
        let device = parts.device;
        let saved = SavedState::capture(device);
        if !program.bind(device) {
            return Ok(());
        }

        device.bind_framebuffer(FramebufferTarget::Default);
        device.set_viewport(Viewport::new(0, 0, parts.config.width, parts.config.height));
        device.set_depth_state(DepthState { test: false, write: false, func: CompareFunc::Always });
        device.set_blend_state(BlendState::DISABLED);

        let depth_unit = parts.gbuffer.bind_textures(device);
        for (unit, channel) in GBufferChannel::ALL.iter().enumerate() {
            program.set_int(device, channel.sampler_name(), unit as i32);
        }
        device.bind_texture_unit(depth_unit, Some(parts.gbuffer.depth_texture()));
        program.set_int(device, "u_gDepth", depth_unit as i32);
        program.set_int(device, "u_debugMode", parts.config.debug_mode);
        program.set_float(device, "u_near", ctx.camera.near);
        program.set_float(device, "u_far", ctx.camera.far);

        draw_fullscreen(device);
        parts.stats.draw_calls += 1;
        saved.restore(device);
        Ok(())
    }

    fn release(&mut self, renderer: &mut Renderer) {
        if let Some(program) = self.program.as_mut() {
            program.destroy(renderer.device());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
