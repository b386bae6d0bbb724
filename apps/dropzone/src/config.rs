//! Uploader configuration.
//!
//! Stored as TOML at `$DROPZONE_CONFIG`, or else:
//! - Linux: `~/.config/dropzone/config.toml`
//! - Windows: `%APPDATA%/dropzone/config.toml`

use std::path::{Path, PathBuf};

use dropzone_orchestrator::OrchestratorConfig;
use dropzone_transfer::{SimulatorConfig, ValidationConstraints};
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// `.ext` patterns or MIME globs. Empty accepts every type.
    #[serde(default)]
    pub accepted_types: Vec<String>,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Files accepted per selection.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Session store document. Empty keeps sessions in memory only.
    /// The document is rewritten after every acknowledged chunk.
    #[serde(default)]
    pub store_path: String,

    #[serde(default)]
    pub simulator: SimulatorConfig,
}

fn default_max_file_size_mb() -> u64 {
    100
}

fn default_max_files() -> usize {
    20
}

fn default_max_concurrent_uploads() -> usize {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accepted_types: Vec::new(),
            max_file_size_mb: default_max_file_size_mb(),
            max_files: default_max_files(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            store_path: String::new(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn constraints(&self) -> ValidationConstraints {
        ValidationConstraints {
            accepted_types: self.accepted_types.clone(),
            max_file_size_mb: self.max_file_size_mb,
            max_files: self.max_files,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_uploads: self.max_concurrent_uploads,
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("DROPZONE_CONFIG") {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("dropzone").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("dropzone")
            .join("config.toml")
    }
}
