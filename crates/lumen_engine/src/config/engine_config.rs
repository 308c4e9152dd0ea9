//! # Engine Configuration
//!
//! Groups the tunables of every subsystem: renderer table sizes, shadow
//! quality, scene sizing and the spatial index.

use serde::{Serialize, Deserialize};

use super::{Config, ConfigError, ConfigResult};
use crate::render::shadow::MAX_CASCADES;
use crate::spatial::OctreeConfig;

/// # Renderer Configuration
///
/// Viewport size and the fixed capacities of the GPU-side tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels
    pub height: u32,
    /// Capacity of the material table (SSBO records)
    pub max_materials: usize,
    /// Maximum point lights packed per frame
    pub max_point_lights: usize,
    /// Maximum spot lights packed per frame
    pub max_spot_lights: usize,
    /// Maximum directional lights set as uniforms per frame
    pub max_directional_lights: usize,
    /// Slots in the shared shadow-map handle array
    pub max_shadow_maps: usize,
    /// Slots in the shared light-space matrix array
    pub max_light_space_matrices: usize,
    /// Initial instance capacity of every render batch
    pub initial_batch_capacity: usize,
    /// G-buffer channel to visualize (0 disables the debug pass)
    pub debug_mode: i32,
    /// Clear color of the default framebuffer
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            max_materials: 256,
            max_point_lights: 64,
            max_spot_lights: 32,
            max_directional_lights: 4,
            max_shadow_maps: 16,
            max_light_space_matrices: 64,
            initial_batch_capacity: 64,
            debug_mode: 0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// # Shadow Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Edge length of one shadow tile in texels
    pub map_size: u32,
    /// Cascades per directional light (1 uses the light's ortho size instead)
    pub cascade_count: usize,
    /// Blend between uniform (0.0) and logarithmic (1.0) cascade splits
    pub cascade_lambda: f32,
    /// Extra bounding-sphere radius added to every cascade (doubled for the first)
    pub cascade_extra_radius: f32,
    /// Near plane of point light cube faces
    pub point_near: f32,
    /// Near plane of spot light projections
    pub spot_near: f32,
    /// Depth range of directional light projections
    pub directional_depth_range: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            map_size: 1024,
            cascade_count: 4,
            cascade_lambda: 0.75,
            cascade_extra_radius: 1.0,
            point_near: 0.1,
            spot_near: 0.1,
            directional_depth_range: 200.0,
        }
    }
}

/// # Scene Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Entity slots reserved up front
    pub initial_entity_capacity: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self { initial_entity_capacity: 1024 }
    }
}

/// # Complete Engine Configuration
///
/// Top-level configuration that encompasses all engine subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log filter (`RUST_LOG` overrides it)
    pub log_level: String,
    /// Rendering system configuration
    pub renderer: RendererConfig,
    /// Shadow system configuration
    pub shadows: ShadowConfig,
    /// Scene configuration
    pub scene: SceneConfig,
    /// Spatial index configuration
    pub spatial: OctreeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            renderer: RendererConfig::default(),
            shadows: ShadowConfig::default(),
            scene: SceneConfig::default(),
            spatial: OctreeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults and the given log filter
    pub fn new(log_level: impl Into<String>) -> Self {
        Self {
            log_level: log_level.into(),
            ..Self::default()
        }
    }
}

impl Config for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        let r = &self.renderer;
        if r.width == 0 || r.height == 0 {
            return Err(ConfigError::invalid("renderer.width/height", "viewport must be non-empty"));
        }
        if r.max_materials == 0 {
            return Err(ConfigError::invalid("renderer.max_materials", "material table needs at least one slot"));
        }
        if r.initial_batch_capacity == 0 {
            return Err(ConfigError::invalid("renderer.initial_batch_capacity", "must be at least 1"));
        }

        let s = &self.shadows;
        if s.map_size == 0 {
            return Err(ConfigError::invalid("shadows.map_size", "must be non-zero"));
        }
        if s.cascade_count == 0 || s.cascade_count > MAX_CASCADES {
            return Err(ConfigError::invalid(
                "shadows.cascade_count",
                format!("must be within 1..={}", MAX_CASCADES),
            ));
        }
        if !(0.0..=1.0).contains(&s.cascade_lambda) {
            return Err(ConfigError::invalid("shadows.cascade_lambda", "must be within [0, 1]"));
        }

        if self.spatial.min_depth > self.spatial.max_depth {
            return Err(ConfigError::invalid("spatial.min_depth", "exceeds spatial.max_depth"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::new("debug");
        assert!(config.validate().is_ok());
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_cascade_count_rejected() {
        let mut config = EngineConfig::default();
        config.shadows.cascade_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "shadows.cascade_count", .. })
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::new("warn");
        config.renderer.max_point_lights = 7;
        config.shadows.cascade_lambda = 0.5;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.renderer.max_point_lights, 7);
        assert!((loaded.shadows.cascade_lambda - 0.5).abs() < f32::EPSILON);
        assert_eq!(loaded.log_level, "warn");
    }

    #[test]
    fn test_ron_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");

        let mut config = EngineConfig::default();
        config.shadows.cascade_count = 2;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.shadows.cascade_count, 2);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = EngineConfig::default().save("engine.yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[shadows]\ncascade_lambda = 2.0\n").unwrap();

        let result = EngineConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Invalid { field: "shadows.cascade_lambda", .. })));
    }

    #[test]
    fn test_save_refuses_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        let mut config = EngineConfig::default();
        config.renderer.width = 0;

        assert!(matches!(config.save(&path), Err(ConfigError::Invalid { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_names_path() {
        let result = EngineConfig::load("does/not/exist.toml");
        match result {
            Err(ConfigError::Io { path, .. }) => assert!(path.ends_with("exist.toml")),
            other => panic!("expected an io error, got {:?}", other.map(|_| ())),
        }
    }
}
