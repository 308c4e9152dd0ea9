//! Per-light shadow map cache
//!
//! Every shadow-casting light owns one depth texture: a single square tile for
//! spot lights, or a horizontal strip of tiles (six cube faces for point
//! lights, one tile per cascade for directional lights). Textures are created
//! on first use, keyed by light entity, and released when the light goes away
//! or needs a different tile count.

use std::collections::{HashMap, HashSet};

use crate::ecs::Entity;
use crate::render::device::{BindlessHandle, GraphicsDevice, TextureDesc, TextureFormat, TextureId, Viewport};
use crate::render::RenderResult;

/// One light's depth texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowMap {
    pub texture: TextureId,
    pub handle: BindlessHandle,
    pub tiles: u32,
    pub tile_size: u32,
}

impl ShadowMap {
    /// Viewport of one tile inside the strip
    pub fn tile_viewport(&self, tile: u32) -> Viewport {
        Viewport::new((tile * self.tile_size) as i32, 0, self.tile_size, self.tile_size)
    }

    pub fn width(&self) -> u32 {
        self.tiles * self.tile_size
    }
}

#[derive(Debug)]
pub struct ShadowAtlasCache {
    tile_size: u32,
    maps: HashMap<Entity, ShadowMap>,
    allocations: usize,
}

impl ShadowAtlasCache {
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size: tile_size.max(1), maps: HashMap::new(), allocations: 0 }
    }

    /// Shadow map for `light` with `tiles` tiles, allocating or replacing as needed
    pub fn acquire(&mut self, device: &mut dyn GraphicsDevice, light: Entity, tiles: u32) -> RenderResult<ShadowMap> {
        let tiles = tiles.max(1);
        if let Some(existing) = self.maps.get(&light) {
            if existing.tiles == tiles && existing.tile_size == self.tile_size {
                return Ok(*existing);
            }
            log::debug!("Shadow map of {:?} changes from {} to {} tiles", light, existing.tiles, tiles);
            self.release(device, light);
        }

        let desc = TextureDesc::texture_2d(
            TextureFormat::Depth32F,
            self.tile_size * tiles,
            self.tile_size,
            format!("shadow_{}_{}", light.id(), light.generation()),
        );
        let texture = device.create_texture(&desc, None)?;
        let handle = match device.texture_handle(texture) {
            Ok(handle) => handle,
            Err(e) => {
                device.delete_texture(texture);
                return Err(e);
            }
        };
        device.make_handle_resident(handle);

        let map = ShadowMap { texture, handle, tiles, tile_size: self.tile_size };
        self.maps.insert(light, map);
        self.allocations += 1;
        log::debug!("Allocated {}x{} shadow map for {:?}", map.width(), self.tile_size, light);
        Ok(map)
    }

    pub fn get(&self, light: Entity) -> Option<&ShadowMap> {
        self.maps.get(&light)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Maps allocated over the cache's lifetime
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice, light: Entity) -> bool {
        match self.maps.remove(&light) {
            Some(map) => {
                device.make_handle_non_resident(map.handle);
                device.delete_texture(map.texture);
                true
            }
            None => false,
        }
    }

    /// Release maps of lights not in `live`. Returns how many were released.
    pub fn retain(&mut self, device: &mut dyn GraphicsDevice, live: &HashSet<Entity>) -> usize {
        let stale: Vec<Entity> = self.maps.keys().filter(|e| !live.contains(e)).copied().collect();
        for light in &stale {
            self.release(device, *light);
        }
        stale.len()
    }

    pub fn clear(&mut self, device: &mut dyn GraphicsDevice) {
        let all: Vec<Entity> = self.maps.keys().copied().collect();
        for light in all {
            self.release(device, light);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::World;
    use crate::render::HeadlessDevice;

    #[test]
    fn test_acquire_is_cached_per_light() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut world = World::new();
        let light = world.create_entity();
        let mut cache = ShadowAtlasCache::new(256);

        let first = cache.acquire(&mut device, light, 6).unwrap();
        let second = cache.acquire(&mut device, light, 6).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.allocation_count(), 1);
        assert_eq!(device.texture_desc(first.texture).unwrap().width, 1536);
        assert_eq!(first.tile_viewport(2), Viewport::new(512, 0, 256, 256));
        assert!(device.is_resident(first.handle));
    }

    #[test]
    fn test_shape_change_replaces_map() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut world = World::new();
        let light = world.create_entity();
        let mut cache = ShadowAtlasCache::new(64);

        let strip = cache.acquire(&mut device, light, 4).unwrap();
        let single = cache.acquire(&mut device, light, 1).unwrap();
        assert_ne!(strip.texture, single.texture);
        assert!(!device.is_resident(strip.handle));
        assert_eq!(device.live_texture_count(), 1);
    }

    #[test]
    fn test_retain_releases_missing_lights() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut world = World::new();
        let a = world.create_entity();
        let b = world.create_entity();
        let mut cache = ShadowAtlasCache::new(64);
        cache.acquire(&mut device, a, 1).unwrap();
        let map_b = cache.acquire(&mut device, b, 6).unwrap();

        let live: HashSet<Entity> = [a].into_iter().collect();
        assert_eq!(cache.retain(&mut device, &live), 1);
        assert!(cache.get(b).is_none());
        assert!(!device.is_resident(map_b.handle));
        assert_eq!(cache.len(), 1);
    }
}
