//! # Lumen Engine
//!
//! Real-time 3D rendering core: an entity-component store with a transform
//! hierarchy, a scripted game-object layer, and a deferred/forward hybrid
//! renderer driven by a fixed frame graph.
//!
//! ## Features
//!
//! - **ECS**: sparse per-type component arrays with id recycling
//! - **Transforms**: parent/child hierarchy with dirty propagation
//! - **Scenes**: game objects with start/update/destroy scripts and
//!   cascading deferred destruction
//! - **Rendering**: bindless material table, multi-draw indirect batching,
//!   cascaded and cube shadow maps, G-buffer lighting
//! - **Headless**: every GPU call goes through [`render::GraphicsDevice`];
//!   [`render::HeadlessDevice`] records them without a GPU
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lumen_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let mut engine = Engine::headless(EngineConfig::default())?;
//!     let cube = primitives::cube()?;
//!     let mesh = engine.renderer_mut().register_mesh(&cube, 0, "cube")?;
//!     let entity = engine.scene_mut().create_entity(&Transform::identity())?;
//!     engine.scene_mut().world_mut().add_component(entity, mesh)?;
//!     let stats = engine.frame(1.0 / 60.0)?;
//!     println!("{} draw calls", stats.draw_calls);
//!     Ok(())
//! }
//! ```

pub mod foundation;
pub mod config;
pub mod ecs;
pub mod scene;
pub mod spatial;
pub mod render;

mod engine;

pub use engine::{Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        Engine, EngineError,
        config::{Config, EngineConfig},
        foundation::math::{Vec3, Mat4, Quat, Transform},
        ecs::{World, Entity, Component},
        ecs::components::{Light, Mesh, MeshInstance},
        ecs::systems::TransformSystem,
        scene::{Scene, GameObject, Script, ScriptContext, ScriptKey},
        render::{Camera, FrameGraph, FrameStats, MaterialDefinition, Renderer, primitives},
    };
}
