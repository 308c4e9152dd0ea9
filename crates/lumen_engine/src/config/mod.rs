//! Engine settings on disk
//!
//! Settings are serde structs stored as TOML or RON; the extension picks the
//! format. Loading always validates, so a file that parses but describes an
//! unusable engine is rejected at the boundary.

mod engine_config;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use engine_config::{EngineConfig, RendererConfig, SceneConfig, ShadowConfig};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("ron") => Ok(ConfigFormat::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    fn parse<T: DeserializeOwned>(self, text: &str) -> ConfigResult<T> {
        match self {
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
            ConfigFormat::Ron => ron::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    fn render<T: Serialize>(self, value: &T) -> ConfigResult<String> {
        match self {
            ConfigFormat::Toml => toml::to_string_pretty(value).map_err(|e| ConfigError::Serialize(e.to_string())),
            ConfigFormat::Ron => ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string())),
        }
    }
}

/// A settings struct that round-trips through a file
pub trait Config: Serialize + DeserializeOwned + Default {
    /// Reject values the engine cannot run with
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }

    /// Parse and validate `path`
    fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = format.parse(&text)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validate, then write `self` to `path`
    fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        self.validate()?;
        let text = format.render(self)?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Cannot access {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Unsupported config format: {0} (expected .toml or .ron)")]
    UnsupportedFormat(PathBuf),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field, reason: reason.into() }
    }
}
