// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::EngineParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineParams,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// Which encoder catalog the CLI queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    /// Builtin table of a typical full FFmpeg build
    #[default]
    Builtin,
    /// Probe the local `ffmpeg` binary
    Ffmpeg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Configuration string used when none is given on the command line
    #[serde(default = "default_config_string")]
    pub config: String,

    #[serde(default)]
    pub catalog: CatalogKind,

    /// Source format assumed by `plan` and `simulate`
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_config_string() -> String {
    "codec=H264".to_string()
}

fn default_source() -> String {
    "UYVY".to_string()
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            config: default_config_string(),
            catalog: CatalogKind::default(),
            source: default_source(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("rtenc")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("rtenc")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // Best effort: the directory may not be writable
            if let Err(e) = config.save() {
                tracing::warn!("Could not create default config file: {}", e);
                tracing::warn!(
                    "Using built-in defaults. Run 'rtenc init-config' to create a config file."
                );
            }

            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<()> {
        if !Self::exists() {
            Config::default().save()?;
        }
        Ok(())
    }
}
