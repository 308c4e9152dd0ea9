//! Texture loading and the bindless texture cache
//!
//! Textures are deduplicated by path. The first request for a path loads the
//! image through a [`TextureSource`], uploads it, fetches its bindless handle
//! and makes that handle resident. Later requests return the cached handle
//! without touching the source or the device again.
//!
//! Residency is tied to the cache entry: releasing an entry (or clearing the
//! cache) makes the handle non-resident before the texture is deleted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::device::{BindlessHandle, GraphicsDevice, TextureDesc, TextureFormat, TextureId};
use super::{RenderError, RenderResult};

/// Decoded RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ImageData {
    /// Decode an image file into RGBA8
    pub fn from_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| RenderError::TextureLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Decoded image {}x{} from {}", width, height, path.display());
        Ok(Self { pixels: rgba.into_raw(), width, height })
    }

    /// Decode an in-memory encoded image into RGBA8
    pub fn from_bytes(bytes: &[u8], label: &str) -> RenderResult<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| RenderError::TextureLoad {
            path: label.to_string(),
            reason: e.to_string(),
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self { pixels: rgba.into_raw(), width, height })
    }

    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixels = color.repeat(width as usize * height as usize);
        Self { pixels, width, height }
    }
}

/// Where texture paths are resolved and decoded
pub trait TextureSource {
    fn load(&mut self, path: &str) -> RenderResult<ImageData>;
}

/// Reads image files from disk, optionally relative to a root directory
#[derive(Debug, Clone, Default)]
pub struct ImageFileSource {
    root: Option<PathBuf>,
}

impl ImageFileSource {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }
}

impl TextureSource for ImageFileSource {
    fn load(&mut self, path: &str) -> RenderResult<ImageData> {
        match &self.root {
            Some(root) => ImageData::from_file(root.join(path)),
            None => ImageData::from_file(path),
        }
    }
}

/// Serves pre-registered images by name. Used for generated textures.
#[derive(Debug, Clone, Default)]
pub struct MemoryTextureSource {
    images: HashMap<String, ImageData>,
    loads: usize,
}

impl MemoryTextureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, image: ImageData) {
        self.images.insert(path.into(), image);
    }

    pub fn with(mut self, path: impl Into<String>, image: ImageData) -> Self {
        self.insert(path, image);
        self
    }

    /// Number of successful loads served
    pub fn load_count(&self) -> usize {
        self.loads
    }
}

impl TextureSource for MemoryTextureSource {
    fn load(&mut self, path: &str) -> RenderResult<ImageData> {
        let image = self.images.get(path).cloned().ok_or_else(|| RenderError::TextureLoad {
            path: path.to_string(),
            reason: "not registered".to_string(),
        })?;
        self.loads += 1;
        Ok(image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CachedTexture {
    texture: TextureId,
    handle: BindlessHandle,
}

/// Path-keyed texture cache holding one resident handle per texture
pub struct TextureCache {
    source: Box<dyn TextureSource>,
    entries: HashMap<String, CachedTexture>,
    failed: HashSet<String>,
    uploads: usize,
}

impl TextureCache {
    pub fn new(source: Box<dyn TextureSource>) -> Self {
        Self {
            source,
            entries: HashMap::new(),
            failed: HashSet::new(),
            uploads: 0,
        }
    }

    /// Bindless handle for `path`, loading and making it resident on first use
    ///
    /// Load failures are logged once and yield `None`; the caller renders
    /// without the map.
    pub fn get_handle(&mut self, device: &mut dyn GraphicsDevice, path: &str) -> Option<BindlessHandle> {
        if let Some(entry) = self.entries.get(path) {
            return Some(entry.handle);
        }
        if self.failed.contains(path) {
            return None;
        }
        match self.load(device, path) {
            Ok(entry) => {
                self.entries.insert(path.to_string(), entry);
                Some(entry.handle)
            }
            Err(e) => {
                log::error!("Failed to load texture '{}': {}", path, e);
                self.failed.insert(path.to_string());
                None
            }
        }
    }

    fn load(&mut self, device: &mut dyn GraphicsDevice, path: &str) -> RenderResult<CachedTexture> {
        let image = self.source.load(path)?;
        let desc = TextureDesc::texture_2d(TextureFormat::Rgba8, image.width, image.height, path);
        if image.pixels.len() != desc.byte_len() {
            return Err(RenderError::TextureLoad {
                path: path.to_string(),
                reason: format!("expected {} bytes, got {}", desc.byte_len(), image.pixels.len()),
            });
        }
        let texture = device.create_texture(&desc, Some(&image.pixels))?;
        let handle = match device.texture_handle(texture) {
            Ok(handle) => handle,
            Err(e) => {
                device.delete_texture(texture);
                return Err(e);
            }
        };
        device.make_handle_resident(handle);
        self.uploads += 1;
        log::debug!("Texture '{}' resident as {:#x}", path, handle.0);
        Ok(CachedTexture { texture, handle })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn texture(&self, path: &str) -> Option<TextureId> {
        self.entries.get(path).map(|e| e.texture)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Textures uploaded over the cache's lifetime
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Drop one texture, releasing its residency first
    pub fn release(&mut self, device: &mut dyn GraphicsDevice, path: &str) -> bool {
        match self.entries.remove(path) {
            Some(entry) => {
                device.make_handle_non_resident(entry.handle);
                device.delete_texture(entry.texture);
                true
            }
            None => false,
        }
    }

    /// Release every texture and forget failed paths
    pub fn clear(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, entry) in self.entries.drain() {
            device.make_handle_non_resident(entry.handle);
            device.delete_texture(entry.texture);
        }
        self.failed.clear();
    }
}

impl std::fmt::Debug for TextureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureCache")
            .field("entries", &self.entries.len())
            .field("failed", &self.failed.len())
            .field("uploads", &self.uploads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessDevice;

    fn cache() -> TextureCache {
        let source = MemoryTextureSource::new()
            .with("bricks.png", ImageData::solid_color(4, 4, [200, 80, 40, 255]))
            .with("grass.png", ImageData::solid_color(2, 2, [20, 180, 40, 255]));
        TextureCache::new(Box::new(source))
    }

    #[test]
    fn test_same_path_loads_once() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut cache = cache();
        let a = cache.get_handle(&mut device, "bricks.png").unwrap();
        let b = cache.get_handle(&mut device, "bricks.png").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.upload_count(), 1);
        assert_eq!(device.textures_created(), 1);
        assert!(device.is_resident(a));
    }

    #[test]
    fn test_missing_texture_yields_none() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut cache = cache();
        assert!(cache.get_handle(&mut device, "missing.png").is_none());
        assert!(cache.get_handle(&mut device, "missing.png").is_none());
        assert_eq!(device.textures_created(), 0);
    }

    #[test]
    fn test_clear_releases_residency() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut cache = cache();
        let a = cache.get_handle(&mut device, "bricks.png").unwrap();
        let b = cache.get_handle(&mut device, "grass.png").unwrap();
        assert!(cache.release(&mut device, "grass.png"));
        assert!(!device.is_resident(b));
        cache.clear(&mut device);
        assert!(!device.is_resident(a));
        assert_eq!(device.live_texture_count(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_source_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255])).save(&path).unwrap();

        let mut source = ImageFileSource::with_root(dir.path());
        let image = source.load("dot.png").unwrap();
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(&image.pixels[..4], &[1, 2, 3, 255]);
        assert!(source.load("nope.png").is_err());
    }
}
