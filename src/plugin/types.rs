//! Core plugin types.

use serde::{Deserialize, Serialize};

/// Type of plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Invoked for every analyzed file with `(path, bytes)`.
    #[default]
    AnalysisPlugin,
    /// Invoked once after loading, produces a fixed HTML page.
    StaticHtmlPlugin,
}

impl PluginType {
    /// Get the display name for this plugin type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::AnalysisPlugin => "Analysis",
            Self::StaticHtmlPlugin => "Static HTML",
        }
    }

    /// Identifier used in manifests and in the history log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalysisPlugin => "analysis_plugin",
            Self::StaticHtmlPlugin => "static_html_plugin",
        }
    }
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis_plugin" | "analysis" => Ok(Self::AnalysisPlugin),
            "static_html_plugin" | "static_html" | "static" => Ok(Self::StaticHtmlPlugin),
            other => Err(format!("unknown plugin type '{other}'")),
        }
    }
}

/// Summary of an active plugin, as shown in plugin lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin description.
    pub description: String,
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
}

/// Manifest file extension.
pub const MANIFEST_EXTENSION: &str = "infoscava";

/// Generated source artifact extension.
pub const ARTIFACT_EXTENSION: &str = "py";

/// Persisted list of active plugins.
pub const CONFIG_FILE: &str = "plugins_config.json";

/// Persisted plugin history log.
pub const HISTORY_FILE: &str = "plugin_history.json";

/// Key a plugin result uses to request special rendering.
pub const OUTPUT_TYPE_KEY: &str = "infoscava_output_type";

/// Prefix of the module name each plugin is imported under.
pub const MODULE_PREFIX: &str = "infoscava_plugin_";

/// Description used when a manifest does not carry one.
pub const DEFAULT_DESCRIPTION: &str = "No description provided.";
