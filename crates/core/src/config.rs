//! Configuration for the shadow layer
//!
//! A single [`ShadowConfig`] governs the whole process. Hosts typically set
//! it once during startup, either programmatically or by loading a TOML
//! file.

use std::path::Path;
use std::sync::LazyLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Process-wide shadow layer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Whether property values are cached in shadows. When disabled, every
    /// read goes to the live object and change subscriptions are not set up.
    pub cache_properties: bool,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            cache_properties: true,
        }
    }
}

impl ShadowConfig {
    /// Load config from a TOML file, creating it with defaults if missing.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded shadow config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save(path)?;
            tracing::info!("Created default shadow config at {:?}", path);
            Ok(default)
        }
    }

    /// Save config to a TOML file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved shadow config to {:?}", path);
        Ok(())
    }
}

static CONFIG: LazyLock<RwLock<ShadowConfig>> = LazyLock::new(Default::default);

/// Current process-wide config.
pub fn get() -> ShadowConfig {
    *CONFIG.read()
}

/// Replace the process-wide config.
///
/// Takes effect for shadows created afterwards; existing shadows keep the
/// caching decision they were created with.
pub fn set(config: ShadowConfig) {
    *CONFIG.write() = config;
    tracing::debug!(?config, "shadow config updated");
}
