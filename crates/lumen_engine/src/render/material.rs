//! Material definitions and the content-addressed material table
//!
//! A [`MaterialDefinition`] is hashed field by field (texture paths and scalar
//! parameters) and deduplicated: equal definitions always resolve to the same
//! index in the GPU material table, no matter where they came from. Each new
//! entry resolves its texture paths through the [`TextureCache`] and becomes
//! one [`MaterialData`] record in a fixed-capacity storage buffer.
//!
//! The manager requires bindless textures. There is no fallback path: creating
//! one on a device without them fails with [`RenderError::MissingFeature`].

use std::collections::HashMap;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use super::bindings;
use super::device::{BindlessHandle, BufferId, BufferKind, GraphicsDevice};
use super::texture::TextureCache;
use super::{RenderError, RenderResult};

bitflags! {
    /// Which optional maps a material samples, plus pass routing
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MaterialFlags: u32 {
        const ALBEDO = 1 << 0;
        const NORMAL = 1 << 1;
        const METALLIC_ROUGHNESS = 1 << 2;
        const EMISSIVE = 1 << 3;
        const OCCLUSION = 1 << 4;
        /// Drawn by the geometry pass instead of the forward pass
        const DEFERRED = 1 << 5;
    }
}

/// CPU-side material description
///
/// Empty texture paths mean "no map".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialDefinition {
    pub albedo_map: String,
    pub normal_map: String,
    pub metallic_roughness_map: String,
    pub emissive_map: String,
    pub occlusion_map: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive_strength: f32,
    pub uv_scale: [f32; 2],
    /// Route through the G-buffer. Forward materials (transparent, unlit)
    /// set this to false.
    pub deferred: bool,
}

impl Default for MaterialDefinition {
    fn default() -> Self {
        Self {
            albedo_map: String::new(),
            normal_map: String::new(),
            metallic_roughness_map: String::new(),
            emissive_map: String::new(),
            occlusion_map: String::new(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 1.0,
            emissive_strength: 1.0,
            uv_scale: [1.0, 1.0],
            deferred: true,
        }
    }
}

impl MaterialDefinition {
    pub fn colored(base_color: [f32; 4]) -> Self {
        Self { base_color, ..Self::default() }
    }

    pub fn forward(mut self) -> Self {
        self.deferred = false;
        self
    }

    pub fn with_albedo_map(mut self, path: impl Into<String>) -> Self {
        self.albedo_map = path.into();
        self
    }

    pub fn with_normal_map(mut self, path: impl Into<String>) -> Self {
        self.normal_map = path.into();
        self
    }

    pub fn with_pbr(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic = metallic;
        self.roughness = roughness;
        self
    }

    /// Structural hash over every field
    pub fn content_hash(&self) -> u64 {
        let mut seed = 0u64;
        for path in self.texture_paths() {
            seed = hash_combine(seed, xxh3_64(path.as_bytes()));
        }
        let pbr_scalars = [self.metallic, self.roughness, self.emissive_strength];
        let scalars = self
            .base_color
            .iter()
            .chain(pbr_scalars.iter())
            .chain(self.uv_scale.iter());
        for value in scalars {
            seed = hash_combine(seed, xxh3_64(&float_bits(*value).to_le_bytes()));
        }
        hash_combine(seed, self.deferred as u64)
    }

    fn texture_paths(&self) -> [&str; 5] {
        [
            &self.albedo_map,
            &self.normal_map,
            &self.metallic_roughness_map,
            &self.emissive_map,
            &self.occlusion_map,
        ]
    }
}

/// Bits of a float with `-0.0` folded onto `0.0`, matching `==`
fn float_bits(value: f32) -> u32 {
    if value == 0.0 {
        0
    } else {
        value.to_bits()
    }
}

/// Mix `value` into `seed`
pub fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// One material table entry as the shaders read it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialData {
    pub albedo_handle: [u32; 2],
    pub normal_handle: [u32; 2],
    pub metallic_roughness_handle: [u32; 2],
    pub emissive_handle: [u32; 2],
    pub occlusion_handle: [u32; 2],
    pub flags: u32,
    pub metallic: f32,
    pub base_color: [f32; 4],
    pub roughness: f32,
    pub emissive_strength: f32,
    pub uv_scale: [f32; 2],
}

impl MaterialData {
    pub fn flags(&self) -> MaterialFlags {
        MaterialFlags::from_bits_truncate(self.flags)
    }
}

/// Content-addressed material table backed by a storage buffer
#[derive(Debug)]
pub struct MaterialManager {
    capacity: usize,
    definitions: Vec<MaterialDefinition>,
    records: Vec<MaterialData>,
    lookup: HashMap<u64, Vec<u32>>,
    textures: TextureCache,
    buffer: BufferId,
    dirty: bool,
}

impl MaterialManager {
    /// Allocate the table. Fails without bindless texture support.
    pub fn new(device: &mut dyn GraphicsDevice, capacity: usize, textures: TextureCache) -> RenderResult<Self> {
        if !device.capabilities().bindless_textures {
            log::error!("Material manager requires bindless textures");
            return Err(RenderError::MissingFeature("ARB_bindless_texture"));
        }
        let capacity = capacity.max(1);
        let buffer = device.create_buffer(
            BufferKind::Storage,
            capacity * std::mem::size_of::<MaterialData>(),
            "materials",
        )?;
        log::info!("Material table allocated for {} materials", capacity);
        Ok(Self {
            capacity,
            definitions: Vec::new(),
            records: Vec::new(),
            lookup: HashMap::new(),
            textures,
            buffer,
            dirty: false,
        })
    }

    /// Index of a definition's record, creating it on first sight
    ///
    /// Returns [`RenderError::CapacityExceeded`] once the table is full; the
    /// existing entries are never overwritten.
    pub fn get_material_index(
        &mut self,
        device: &mut dyn GraphicsDevice,
        definition: &MaterialDefinition,
    ) -> RenderResult<u32> {
        let hash = definition.content_hash();
        if let Some(bucket) = self.lookup.get(&hash) {
            if let Some(&index) = bucket.iter().find(|&&i| &self.definitions[i as usize] == definition) {
                return Ok(index);
            }
        }

        if self.records.len() >= self.capacity {
            log::warn!("Material table full ({} entries)", self.capacity);
            return Err(RenderError::CapacityExceeded { resource: "materials", capacity: self.capacity });
        }

        let record = self.build_record(device, definition);
        let index = self.records.len() as u32;
        self.records.push(record);
        self.definitions.push(definition.clone());
        self.lookup.entry(hash).or_default().push(index);
        self.dirty = true;
        log::debug!("Material #{} created (flags {:?})", index, record.flags());
        Ok(index)
    }

    fn build_record(&mut self, device: &mut dyn GraphicsDevice, definition: &MaterialDefinition) -> MaterialData {
        let mut flags = MaterialFlags::empty();
        if definition.deferred {
            flags |= MaterialFlags::DEFERRED;
        }
        let mut resolve = |path: &str, flag: MaterialFlags| -> [u32; 2] {
            if path.is_empty() {
                return [0, 0];
            }
            match self.textures.get_handle(device, path) {
                Some(handle) => {
                    flags |= flag;
                    handle.split()
                }
                None => [0, 0],
            }
        };
        let albedo_handle = resolve(&definition.albedo_map, MaterialFlags::ALBEDO);
        let normal_handle = resolve(&definition.normal_map, MaterialFlags::NORMAL);
        let metallic_roughness_handle = resolve(&definition.metallic_roughness_map, MaterialFlags::METALLIC_ROUGHNESS);
        let emissive_handle = resolve(&definition.emissive_map, MaterialFlags::EMISSIVE);
        let occlusion_handle = resolve(&definition.occlusion_map, MaterialFlags::OCCLUSION);

        MaterialData {
            albedo_handle,
            normal_handle,
            metallic_roughness_handle,
            emissive_handle,
            occlusion_handle,
            flags: flags.bits(),
            metallic: definition.metallic,
            base_color: definition.base_color,
            roughness: definition.roughness,
            emissive_strength: definition.emissive_strength,
            uv_scale: definition.uv_scale,
        }
    }

    /// Upload the table if it changed since the last upload
    pub fn update_material_buffer(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        device.write_buffer(self.buffer, 0, bytemuck::cast_slice(&self.records))?;
        self.dirty = false;
        log::trace!("Material table uploaded ({} entries)", self.records.len());
        Ok(true)
    }

    pub fn bind(&self, device: &mut dyn GraphicsDevice) {
        device.bind_storage_buffer(bindings::MATERIALS, self.buffer);
    }

    /// Whether meshes with this material go through the G-buffer.
    /// Unknown indices are treated as deferred.
    pub fn is_deferred(&self, index: u32) -> bool {
        match self.records.get(index as usize) {
            Some(record) => record.flags().contains(MaterialFlags::DEFERRED),
            None => {
                log::warn!("Unknown material index {}", index);
                true
            }
        }
    }

    pub fn material(&self, index: u32) -> Option<&MaterialData> {
        self.records.get(index as usize)
    }

    /// Texture coordinate scale of a material, identity when unknown
    pub fn uv_scale(&self, index: u32) -> [f32; 2] {
        self.records.get(index as usize).map(|r| r.uv_scale).unwrap_or([1.0, 1.0])
    }

    pub fn definition(&self, index: u32) -> Option<&MaterialDefinition> {
        self.definitions.get(index as usize)
    }

    pub fn material_count(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Bindless handle of a texture outside any material (skyboxes, decals)
    pub fn texture_handle(&mut self, device: &mut dyn GraphicsDevice, path: &str) -> Option<BindlessHandle> {
        self.textures.get_handle(device, path)
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    /// Release every texture and the table buffer
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.textures.clear(device);
        device.delete_buffer(self.buffer);
        log::debug!("Material manager released");
    }
}
