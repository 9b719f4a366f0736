//! Configuration management for Infoscava.
//!
//! Handles loading settings from TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::history::DEFAULT_HISTORY_CAPACITY;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "INFOSCAVA_CONFIG";

/// Default per-call timeout in seconds.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plugin runtime settings
    pub plugin: PluginConfig,
}

/// Plugin runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Directory holding manifests, artifacts and state files (`~` expands)
    pub directory: String,

    /// Maximum number of history entries to keep
    pub max_history_entries: i64,

    /// Python interpreter used to host plugins
    pub python: String,

    /// Seconds a single plugin call may take
    pub call_timeout_secs: i64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: "~/.infoscava/plugins".to_string(),
            max_history_entries: DEFAULT_HISTORY_CAPACITY as i64,
            python: crate::plugin::DEFAULT_INTERPRETER.to_string(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS as i64,
        }
    }
}

impl PluginConfig {
    /// Plugin directory with `~` and environment variables expanded.
    pub fn plugin_dir(&self) -> PathBuf {
        let expanded = shellexpand::full(&self.directory)
            .map_or_else(|_| shellexpand::tilde(&self.directory), |v| v);
        PathBuf::from(expanded.as_ref())
    }

    /// History capacity. Non-positive values fall back to the default.
    pub fn history_capacity(&self) -> usize {
        usize::try_from(self.max_history_entries)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_HISTORY_CAPACITY)
    }

    /// Per-call timeout. Non-positive values fall back to the default.
    pub fn call_timeout(&self) -> Duration {
        let secs = u64::try_from(self.call_timeout_secs)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CALL_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Looks for config in:
    /// 1. `explicit`, when given
    /// 2. the file named by `INFOSCAVA_CONFIG`
    /// 3. `~/.infoscava/config.toml`
    /// 4. Falls back to defaults
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Self::load_from_file(Path::new(&path));
        }

        if let Some(path) = Self::default_path().filter(|p| p.exists()) {
            return Self::load_from_file(&path);
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        config.warn_on_fallbacks();
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|d| d.join(".infoscava").join("config.toml"))
    }

    /// Override the plugin directory.
    #[must_use]
    pub fn with_plugin_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.plugin.directory = dir.as_ref().display().to_string();
        self
    }

    fn warn_on_fallbacks(&self) {
        if self.plugin.max_history_entries <= 0 {
            tracing::warn!(
                value = self.plugin.max_history_entries,
                "max_history_entries must be positive, using {}",
                DEFAULT_HISTORY_CAPACITY
            );
        }
        if self.plugin.call_timeout_secs <= 0 {
            tracing::warn!(
                value = self.plugin.call_timeout_secs,
                "call_timeout_secs must be positive, using {}",
                DEFAULT_CALL_TIMEOUT_SECS
            );
        }
    }
}
