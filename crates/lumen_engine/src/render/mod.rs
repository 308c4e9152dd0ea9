//! # Rendering System
//!
//! Deferred/forward hybrid renderer built on bindless textures and
//! multi-draw indirect.
//!
//! ## Architecture
//!
//! - **Device**: [`GraphicsDevice`] is the seam to the graphics context;
//!   [`HeadlessDevice`] records everything for tests and offline runs
//! - **Resources**: [`MeshRegistry`] (shared geometry pool),
//!   [`MaterialManager`] (content-addressed material table),
//!   [`TextureCache`] (path-deduplicated bindless textures)
//! - **Batching**: [`RenderBatch`] turns instance groups into indirect
//!   commands and a flat instance buffer
//! - **Frame graph**: [`FrameGraph`] runs shadow, geometry, light, forward,
//!   skybox and debug passes over a once-per-frame instance map
//!
//! All per-frame work reads the world matrices produced by the transform
//! system; the renderer never walks the hierarchy itself.

pub mod batch;
pub mod camera;
pub mod device;
pub mod error;
pub mod frame_graph;
pub mod gbuffer;
pub mod headless;
pub mod lights_gpu;
pub mod material;
pub mod mesh;
pub mod passes;
pub mod primitives;
pub mod renderer;
pub mod shader;
pub mod shadow;
pub mod tangent_frame;
pub mod texture;

#[cfg(test)]
mod tests;

/// Storage buffer binding points shared with the GLSL sources
pub mod bindings {
    pub const INSTANCES: u32 = 0;
    pub const MATERIALS: u32 = 1;
    pub const POINT_LIGHTS: u32 = 2;
    pub const SPOT_LIGHTS: u32 = 3;
    pub const SHADOW_HANDLES: u32 = 4;
    pub const LIGHT_MATRICES: u32 = 5;
}

pub use batch::{InstanceData, RenderBatch};
pub use camera::Camera;
pub use device::{
    BindlessHandle, BlendState, BufferId, BufferKind, DepthState, FramebufferTarget, GraphicsDevice, TextureFormat,
    TextureId, Viewport,
};
pub use error::{RenderError, RenderResult};
pub use frame_graph::{FrameContext, FrameGraph, InstanceMap, RenderPass};
pub use gbuffer::{GBuffer, GBufferChannel};
pub use headless::HeadlessDevice;
pub use material::{MaterialDefinition, MaterialFlags, MaterialManager};
pub use mesh::{MeshRegistry, RawMeshData, Vertex};
pub use renderer::{FrameStats, Renderer};
pub use shader::{ShaderProgram, ShaderSource};
pub use texture::{ImageData, ImageFileSource, MemoryTextureSource, TextureCache, TextureSource};
