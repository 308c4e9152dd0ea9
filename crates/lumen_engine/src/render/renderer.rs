//! Renderer: owner of the device and the GPU-resident scene resources
//!
//! The renderer holds the graphics device, the material table (injected at
//! construction), the shared geometry pool, the G-buffer and the optional
//! skybox cubemap. Passes borrow these through [`Renderer::parts`].
//!
//! Construction fails on a device without bindless textures or multi-draw
//! indirect, and when the G-buffer cannot be completed. Dropping the renderer
//! releases every texture's residency before deleting it.

use super::device::{
    ClearMask, FramebufferTarget, GraphicsDevice, TextureDesc, TextureFormat, TextureId, TextureKind, Viewport,
};
use super::gbuffer::GBuffer;
use super::headless::HeadlessDevice;
use super::material::{MaterialDefinition, MaterialManager};
use super::mesh::{MeshRegistry, RawMeshData};
use super::texture::{ImageData, TextureCache};
use super::{RenderError, RenderResult};
use crate::config::{EngineConfig, RendererConfig, ShadowConfig};
use crate::ecs::components::Mesh;
use crate::foundation::math::Vec3;

/// Counters for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub passes_run: usize,
    /// Multi-draw and fullscreen draw submissions
    pub draw_calls: usize,
    pub instances: usize,
    pub point_lights: usize,
    pub spot_lights: usize,
    pub directional_lights: usize,
    /// Lights or shadows skipped because a table was full
    pub lights_dropped: usize,
    pub shadow_maps_rendered: usize,
    /// Individual faces and cascades rendered into shadow maps
    pub shadow_views: usize,
    pub transforms_updated: usize,
}

/// Mutable views of the renderer's parts, handed to passes
pub struct RendererParts<'a> {
    pub device: &'a mut dyn GraphicsDevice,
    pub materials: &'a mut MaterialManager,
    pub meshes: &'a mut MeshRegistry,
    pub gbuffer: &'a GBuffer,
    pub stats: &'a mut FrameStats,
    pub config: &'a RendererConfig,
    pub shadows: &'a ShadowConfig,
    pub skybox: Option<TextureId>,
    pub ambient_color: Vec3,
}

pub struct Renderer {
    device: Box<dyn GraphicsDevice>,
    config: RendererConfig,
    shadow_config: ShadowConfig,
    materials: MaterialManager,
    meshes: MeshRegistry,
    gbuffer: GBuffer,
    skybox: Option<TextureId>,
    ambient_color: Vec3,
    stats: FrameStats,
    frame: u64,
}

impl Renderer {
    pub fn new(mut device: Box<dyn GraphicsDevice>, config: &EngineConfig, textures: TextureCache) -> RenderResult<Self> {
        let capabilities = device.capabilities();
        log::info!(
            "Initializing renderer {}x{} (bindless: {}, multi-draw indirect: {})",
            config.renderer.width,
            config.renderer.height,
            capabilities.bindless_textures,
            capabilities.multi_draw_indirect
        );
        if !capabilities.multi_draw_indirect {
            return Err(RenderError::MissingFeature("multi_draw_indirect"));
        }

        let mut materials = MaterialManager::new(device.as_mut(), config.renderer.max_materials, textures)?;
        let gbuffer = match GBuffer::new(device.as_mut(), config.renderer.width, config.renderer.height) {
            Ok(gbuffer) => gbuffer,
            Err(e) => {
                materials.release(device.as_mut());
                return Err(e);
            }
        };

        Ok(Self {
            device,
            config: config.renderer.clone(),
            shadow_config: config.shadows.clone(),
            materials,
            meshes: MeshRegistry::new(),
            gbuffer,
            skybox: None,
            ambient_color: Vec3::new(0.03, 0.03, 0.03),
            stats: FrameStats::default(),
            frame: 0,
        })
    }

    pub fn device(&mut self) -> &mut dyn GraphicsDevice {
        self.device.as_mut()
    }

    /// The device as a [`HeadlessDevice`], if that is what drives this renderer
    pub fn headless(&self) -> Option<&HeadlessDevice> {
        self.device.as_any().downcast_ref::<HeadlessDevice>()
    }

    pub fn headless_mut(&mut self) -> Option<&mut HeadlessDevice> {
        self.device.as_any_mut().downcast_mut::<HeadlessDevice>()
    }

    pub fn parts(&mut self) -> RendererParts<'_> {
        RendererParts {
            device: self.device.as_mut(),
            materials: &mut self.materials,
            meshes: &mut self.meshes,
            gbuffer: &self.gbuffer,
            stats: &mut self.stats,
            config: &self.config,
            shadows: &self.shadow_config,
            skybox: self.skybox,
            ambient_color: self.ambient_color,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn shadow_config(&self) -> &ShadowConfig {
        &self.shadow_config
    }

    pub fn materials(&self) -> &MaterialManager {
        &self.materials
    }

    pub fn meshes(&self) -> &MeshRegistry {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut MeshRegistry {
        &mut self.meshes
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn debug_mode(&self) -> i32 {
        self.config.debug_mode
    }

    /// 0 disables the debug view; 1..=5 show a G-buffer channel, 6 depth
    pub fn set_debug_mode(&mut self, mode: i32) {
        self.config.debug_mode = mode;
    }

    pub fn ambient_color(&self) -> Vec3 {
        self.ambient_color
    }

    pub fn set_ambient_color(&mut self, color: Vec3) {
        self.ambient_color = color;
    }

    pub fn skybox(&self) -> Option<TextureId> {
        self.skybox
    }

    /// Material table index for a definition
    pub fn get_material_index(&mut self, definition: &MaterialDefinition) -> RenderResult<u32> {
        self.materials.get_material_index(self.device.as_mut(), definition)
    }

    /// Like [`Self::get_material_index`], falling back to material 0 when the
    /// table is full
    pub fn material_index_or_default(&mut self, definition: &MaterialDefinition) -> u32 {
        match self.get_material_index(definition) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Using material 0: {}", e);
                0
            }
        }
    }

    /// Add a mesh to the geometry pool
    pub fn register_mesh(&mut self, raw: &RawMeshData, material_index: u32, label: &str) -> RenderResult<Mesh> {
        self.meshes.register(raw, material_index, label)
    }

    /// Replace the skybox with six faces in +X, -X, +Y, -Y, +Z, -Z order
    pub fn set_skybox(&mut self, faces: &[ImageData; 6]) -> RenderResult<()> {
        let (width, height) = (faces[0].width, faces[0].height);
        if width != height || faces.iter().any(|f| f.width != width || f.height != height) {
            return Err(RenderError::TextureLoad {
                path: "skybox".to_string(),
                reason: "cubemap faces must be square and equally sized".to_string(),
            });
        }
        let pixels: Vec<u8> = faces.iter().flat_map(|f| f.pixels.iter().copied()).collect();
        let desc = TextureDesc {
            kind: TextureKind::CubeMap,
            format: TextureFormat::Rgba8,
            width,
            height,
            label: "skybox".to_string(),
        };
        let texture = self.device.create_texture(&desc, Some(&pixels))?;
        if let Some(old) = self.skybox.replace(texture) {
            self.device.delete_texture(old);
        }
        log::debug!("Skybox set ({}x{} faces)", width, height);
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        self.gbuffer.resize(self.device.as_mut(), width, height)?;
        self.config.width = width;
        self.config.height = height;
        log::info!("Renderer resized to {}x{}", width, height);
        Ok(())
    }

    /// Reset stats, flush pending geometry and materials, clear the screen
    pub fn begin_frame(&mut self) -> RenderResult<()> {
        self.frame += 1;
        self.stats = FrameStats { frame: self.frame, ..FrameStats::default() };

        let device = self.device.as_mut();
        self.meshes.upload(device)?;
        self.materials.update_material_buffer(device)?;

        device.bind_framebuffer(FramebufferTarget::Default);
        device.set_viewport(Viewport::new(0, 0, self.config.width, self.config.height));
        device.clear(ClearMask::COLOR | ClearMask::DEPTH, self.config.clear_color);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let device = self.device.as_mut();
        if let Some(skybox) = self.skybox.take() {
            device.delete_texture(skybox);
        }
        self.gbuffer.release(device);
        self.meshes.release(device);
        self.materials.release(device);
        log::debug!("Renderer released");
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .field("materials", &self.materials.material_count())
            .field("meshes", &self.meshes.mesh_count())
            .field("frame", &self.frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::texture::MemoryTextureSource;

    fn textures() -> TextureCache {
        TextureCache::new(Box::new(MemoryTextureSource::new()))
    }

    #[test]
    fn test_requires_bindless() {
        let result = Renderer::new(Box::new(HeadlessDevice::without_bindless(64, 64)), &EngineConfig::default(), textures());
        assert!(matches!(result, Err(RenderError::MissingFeature(_))));
    }

    #[test]
    fn test_zero_sized_gbuffer_is_fatal() {
        let mut config = EngineConfig::default();
        config.renderer.width = 0;
        let result = Renderer::new(Box::new(HeadlessDevice::new(64, 64)), &config, textures());
        assert!(result.is_err());
    }

    #[test]
    fn test_skybox_faces_must_match() {
        let mut renderer = Renderer::new(Box::new(HeadlessDevice::new(64, 64)), &EngineConfig::default(), textures()).unwrap();
        let face = ImageData::solid_color(4, 4, [0, 0, 255, 255]);
        let mut faces: [ImageData; 6] = std::array::from_fn(|_| face.clone());
        renderer.set_skybox(&faces).unwrap();
        assert!(renderer.skybox().is_some());

        faces[3] = ImageData::solid_color(2, 2, [0, 0, 0, 255]);
        assert!(renderer.set_skybox(&faces).is_err());
    }

    #[test]
    fn test_material_fallback_on_overflow() {
        let mut config = EngineConfig::default();
        config.renderer.max_materials = 1;
        let mut renderer = Renderer::new(Box::new(HeadlessDevice::new(64, 64)), &config, textures()).unwrap();
        assert_eq!(renderer.material_index_or_default(&MaterialDefinition::colored([1.0, 0.0, 0.0, 1.0])), 0);
        assert_eq!(renderer.material_index_or_default(&MaterialDefinition::colored([0.0, 1.0, 0.0, 1.0])), 0);
        assert_eq!(renderer.materials().material_count(), 1);
    }
}
