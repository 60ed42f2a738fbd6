use crate::decl::DEFAULT_CAPACITY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub ignore: IgnoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_ms: u64,
    #[serde(default = "default_poll")]
    pub handoff_poll_ms: u64,
    #[serde(default = "default_poll")]
    pub cancel_wait_poll_ms: u64,
}

fn default_flush_timeout() -> u64 {
    300
}
fn default_poll() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: default_flush_timeout(),
            handoff_poll_ms: default_poll(),
            cancel_wait_poll_ms: default_poll(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of documents whose declarations are kept.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_progress: bool,
    pub show_summary: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_progress: true,
            show_summary: true,
        }
    }
}

/// Filtering applied when a directory is indexed as a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// File or directory names skipped wherever they appear.
    pub patterns: Vec<String>,
    /// Skip dot-files and dot-directories.
    pub hidden_files: bool,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["node_modules".to_string(), ".git".to_string()],
            hidden_files: true,
        }
    }
}

impl Config {
    /// Load from the first config file found, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match Self::find_config_path()? {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content).with_context(|| "Failed to parse config file")
    }

    fn find_config_path() -> Result<Option<PathBuf>> {
        if let Some(xdg_config) = dirs::config_dir() {
            let xdg_path = xdg_config.join("locator/config.toml");
            if xdg_path.exists() {
                return Ok(Some(xdg_path));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let home_path = home.join(".locator.toml");
            if home_path.exists() {
                return Ok(Some(home_path));
            }
        }

        let current_path = Path::new(".locator.toml");
        if current_path.exists() {
            return Ok(Some(current_path.to_path_buf()));
        }

        Ok(None)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
