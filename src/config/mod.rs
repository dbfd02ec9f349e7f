//! Configuration module for VolVis-RS
//!
//! This module handles the persisted configuration of a render run:
//! - Render settings (image size, ray function, partitioning, compositing)
//! - Logging options for the binary
//! - How many in-process ranks the binary runs
//!
//! # Files
//!
//! A config file is JSON (`.json`) or TOML (`.toml`); the format is picked
//! from the file extension on both load and save.
//!
//! # Example
//!
//! ```ignore
//! use volvis_rs::config::VisConfig;
//!
//! let mut config = VisConfig::load_or_default("render.toml");
//! config.render.width = 512;
//! config.save("render.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, VolVisError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current config file format version
pub const CONFIG_FILE_VERSION: u32 = 1;

/// Default image width and height in pixels
pub const DEFAULT_IMAGE_SIZE: usize = 256;

/// Default number of samples along each ray
pub const DEFAULT_DEPTH_SAMPLES: usize = 128;

/// Default initial primitive capacity of a cell list
pub const DEFAULT_CELL_LIST_CAPACITY: usize = 1024;

/// Default number of in-process ranks
pub const DEFAULT_RANKS: usize = 4;

// ==================== File Format ====================

/// On-disk encoding of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(ConfigFormat::Toml),
            _ => Err(VolVisError::Config(format!(
                "Unsupported config file extension: {:?}",
                path
            ))),
        }
    }
}

// ==================== Logging Config ====================

/// Logging options for the binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub level: Option<String>,

    /// Also write logs to a daily file in this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

// ==================== Vis Config ====================

/// Persisted configuration of a render run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisConfig {
    /// Version for future migration support
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default)]
    pub render: RenderSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Number of in-process ranks the binary runs
    #[serde(default = "default_ranks")]
    pub ranks: usize,
}

fn default_config_version() -> u32 {
    CONFIG_FILE_VERSION
}

fn default_ranks() -> usize {
    DEFAULT_RANKS
}

impl Default for VisConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FILE_VERSION,
            render: RenderSettings::default(),
            logging: LoggingConfig::default(),
            ranks: DEFAULT_RANKS,
        }
    }
}

impl VisConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            VolVisError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(&content)?,
            ConfigFormat::Toml => toml::from_str(&content)?,
        };
        if config.version > CONFIG_FILE_VERSION {
            tracing::warn!(
                "Config file {:?} has version {}, newer than {}",
                path,
                config.version,
                CONFIG_FILE_VERSION
            );
        }
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, creating the parent directory if needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                VolVisError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content).map_err(|e| {
            VolVisError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Validate the render settings against the rank count
    pub fn validate(&self) -> Result<()> {
        if self.ranks == 0 {
            return Err(VolVisError::Config("At least one rank is required".to_string()));
        }
        if let CompositingMode::GatherToRoot { root } = self.render.compositing {
            if root >= self.ranks {
                return Err(VolVisError::Config(format!(
                    "Compositing root {} does not exist with {} ranks",
                    root, self.ranks
                )));
            }
        }
        self.render.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = VisConfig::default();
        assert_eq!(config.version, CONFIG_FILE_VERSION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("a.yaml")).is_err());
        assert!(ConfigFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_round_trip_both_formats() {
        let dir = TempDir::new().unwrap();
        let mut config = VisConfig::default();
        config.ranks = 3;
        config.render.width = 64;
        config.render.compositing = CompositingMode::AllGather;
        config.render.ray_function = RayFunctionSettings::Threshold { value: 0.25 };
        config.logging.level = Some("debug".to_string());

        for name in ["nested/render.json", "render.toml"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(VisConfig::load(&path).unwrap(), config);
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "ranks = 2\n[render]\nwidth = 32\n").unwrap();
        let config = VisConfig::load(&path).unwrap();
        assert_eq!(config.ranks, 2);
        assert_eq!(config.render.width, 32);
        assert_eq!(config.render.height, DEFAULT_IMAGE_SIZE);
    }

    #[test]
    fn test_invalid_root_rejected() {
        let mut config = VisConfig::default();
        config.render.compositing = CompositingMode::GatherToRoot { root: 4 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = VisConfig::load_or_default("/nonexistent/volvis.json");
        assert_eq!(config, VisConfig::default());
    }
}
