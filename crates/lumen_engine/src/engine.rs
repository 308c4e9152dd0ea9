//! Core engine implementation

use thiserror::Error;

use crate::config::{Config, ConfigError, EngineConfig};
use crate::ecs::systems::TransformSystem;
use crate::ecs::{EcsError, Entity};
use crate::render::{
    Camera, FrameGraph, FrameStats, GraphicsDevice, HeadlessDevice, ImageFileSource, RenderError, Renderer,
    TextureCache,
};
use crate::scene::Scene;

/// Main engine struct
///
/// Owns the scene, the renderer and the frame graph, and drives them in a
/// fixed order every frame: scripts, pending-destroy sweep, transform
/// propagation, then rendering.
pub struct Engine {
    scene: Scene,
    renderer: Renderer,
    frame_graph: FrameGraph,
    camera: Camera,
    config: EngineConfig,
    released: bool,
}

impl Engine {
    /// Create an engine rendering through `device`
    pub fn new(config: EngineConfig, device: Box<dyn GraphicsDevice>, textures: TextureCache) -> Result<Self, EngineError> {
        config.validate()?;
        log::info!("Initializing engine...");

        let renderer = Renderer::new(device, &config, textures)?;
        let scene = Scene::new(&config.scene);
        let aspect = config.renderer.width as f32 / config.renderer.height as f32;
        let camera = Camera { aspect, ..Camera::default() };

        let mut engine = Self { scene, renderer, frame_graph: FrameGraph::new(), camera, config, released: false };
        engine.frame_graph.setup(&mut engine.renderer)?;
        Ok(engine)
    }

    /// Engine over a [`HeadlessDevice`] loading textures from disk
    pub fn headless(config: EngineConfig) -> Result<Self, EngineError> {
        let device = HeadlessDevice::new(config.renderer.width, config.renderer.height);
        Self::new(config, Box::new(device), TextureCache::new(Box::new(ImageFileSource::new())))
    }

    /// Advance and render one frame
    pub fn frame(&mut self, delta_time: f32) -> Result<FrameStats, EngineError> {
        self.scene.update_scripts(delta_time);
        let destroyed = self.scene.flush_destroyed();
        if destroyed > 0 {
            log::trace!("Swept {} entities", destroyed);
        }
        let transforms_updated = TransformSystem::update(self.scene.world_mut());

        let mut stats = self.frame_graph.execute(self.scene.world_mut(), &self.camera, &mut self.renderer)?;
        stats.transforms_updated = transforms_updated;
        self.renderer.parts().stats.transforms_updated = transforms_updated;
        Ok(stats)
    }

    /// Resize the viewport and the G-buffer, keeping the camera aspect in step
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.renderer.resize(width, height)?;
        self.camera.set_aspect(width, height);
        self.config.renderer.width = width;
        self.config.renderer.height = height;
        Ok(())
    }

    /// Draw `entity` as an instance of a shared mesh definition
    pub fn attach_instance(&mut self, entity: Entity, definition: u32) -> Result<(), EngineError> {
        self.renderer.meshes_mut().attach_instance(self.scene.world_mut(), entity, definition)?;
        Ok(())
    }

    /// Release the frame graph's GPU objects. Also runs on drop.
    pub fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.frame_graph.release(&mut self.renderer);
        self.released = true;
        log::info!("Engine shutdown complete");
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn frame_graph(&self) -> &FrameGraph {
        &self.frame_graph
    }

    pub fn frame_graph_mut(&mut self) -> &mut FrameGraph {
        &mut self.frame_graph
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Scene error: {0}")]
    Scene(#[from] EcsError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
