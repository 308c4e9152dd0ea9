//! The built-in render passes
//!
//! Every pass that changes fixed-function state captures it with
//! [`SavedState`] first and restores it before returning, so passes never
//! depend on each other's leftovers.

mod debug;
mod forward;
mod geometry;
mod light;
mod shadow;
mod skybox;

pub use debug::DebugPass;
pub use forward::ForwardPass;
pub use geometry::GeometryPass;
pub use light::{pack_lights, LightPass, PackedLights};
pub use shadow::ShadowPass;
pub use skybox::SkyboxPass;

use super::batch::RenderBatch;
use super::device::{BlendState, DepthState, GraphicsDevice, Viewport};
use super::frame_graph::InstanceMap;
use super::material::MaterialManager;
use super::shader::{ShaderProgram, ShaderSource};
use super::RenderResult;
use crate::ecs::components::DrawMode;

/// Viewport, depth and blend state captured at the start of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedState {
    pub viewport: Viewport,
    pub depth: DepthState,
    pub blend: BlendState,
}

impl SavedState {
    pub fn capture(device: &dyn GraphicsDevice) -> Self {
        Self {
            viewport: device.viewport(),
            depth: device.depth_state(),
            blend: device.blend_state(),
        }
    }

    pub fn restore(&self, device: &mut dyn GraphicsDevice) {
        device.set_viewport(self.viewport);
        device.set_depth_state(self.depth);
        device.set_blend_state(self.blend);
    }
}

/// Compile a pass program, turning failure into a setup error
fn build_program(device: &mut dyn GraphicsDevice, source: &ShaderSource) -> RenderResult<ShaderProgram> {
    ShaderProgram::try_compile(device, source).map_err(|e| {
        log::error!("{}", e);
        e
    })
}

/// Fill `batch` with the instance groups routed to the given path
fn fill_batch(batch: &mut RenderBatch, instances: &InstanceMap, deferred: bool, materials: &MaterialManager) {
    batch.clear();
    for group in instances.with_deferred(deferred) {
        batch.add_instances(&group.mesh, group.mode, &group.worlds, materials.uv_scale(group.mesh.material_index));
    }
}

/// Fullscreen triangle generated from `gl_VertexID`
fn draw_fullscreen(device: &mut dyn GraphicsDevice) {
    device.bind_vertex_array(None);
    device.draw_arrays(DrawMode::Triangles, 0, 3);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::CompareFunc;
    use crate::render::HeadlessDevice;

    #[test]
    fn test_saved_state_round_trip() {
        let mut device = HeadlessDevice::new(320, 200);
        let saved = SavedState::capture(&device);

        device.set_viewport(Viewport::new(0, 0, 16, 16));
        device.set_depth_state(DepthState { test: false, write: false, func: CompareFunc::Always });
        device.set_blend_state(BlendState::ADDITIVE);
        saved.restore(&mut device);

        assert_eq!(SavedState::capture(&device), saved);
        assert_eq!(device.viewport(), Viewport::new(0, 0, 320, 200));
    }
}
