//! Plugin manifest parsing and validation.
//!
//! A manifest is a JSON file (`<name>.infoscava`) that carries a plugin's
//! metadata together with its base64-encoded Python source. The plugin name
//! is not stored in the file; it comes from the file stem.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::{PluginError, PluginResult, PluginType, DEFAULT_DESCRIPTION};

/// Plugin manifest containing metadata and embedded source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name (unique identifier, taken from the file stem).
    #[serde(skip)]
    pub name: String,
    /// Entry point the plugin exposes.
    #[serde(default)]
    pub function_name: String,
    /// Plugin type.
    #[serde(rename = "type", default)]
    pub plugin_type: PluginType,
    /// Plugin description.
    #[serde(default = "default_description")]
    pub description: String,
    /// Display label; the plugin name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_title: Option<String>,
    /// Base64-encoded UTF-8 Python source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_code: Option<String>,
}

fn default_description() -> String {
    DEFAULT_DESCRIPTION.to_string()
}

impl PluginManifest {
    /// Create a manifest with no source attached.
    pub fn new(name: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            function_name: function_name.into(),
            plugin_type: PluginType::default(),
            description: default_description(),
            tab_title: None,
            python_code: None,
        }
    }

    /// Set the plugin type.
    #[must_use]
    pub fn with_type(mut self, plugin_type: PluginType) -> Self {
        self.plugin_type = plugin_type;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the tab title.
    #[must_use]
    pub fn with_tab_title(mut self, tab_title: impl Into<String>) -> Self {
        self.tab_title = Some(tab_title.into());
        self
    }

    /// Embed Python source, base64-encoding it.
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.python_code = Some(STANDARD.encode(source.as_bytes()));
        self
    }

    /// Parse a manifest from JSON, naming it `name`.
    pub fn from_json(name: &str, content: &str, path: &Path) -> PluginResult<Self> {
        let mut manifest: Self = serde_json::from_str(content).map_err(|e| {
            PluginError::ManifestParse { path: path.to_path_buf(), message: e.to_string() }
        })?;
        manifest.name = name.to_string();
        Ok(manifest)
    }

    /// Parse a manifest from a file. The name is the file stem.
    pub fn from_file(path: &Path) -> PluginResult<Self> {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let content = std::fs::read_to_string(path)?;
        Self::from_json(name, &content, path)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> PluginResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PluginError::InvalidManifest(e.to_string()))
    }

    /// Validate the manifest.
    pub fn validate(&self) -> PluginResult<()> {
        if self.name.trim().is_empty() || self.function_name.trim().is_empty() {
            return Err(PluginError::InvalidManifest(format!(
                "Skipping plugin '{}': Missing 'name' or 'function_name' in JSON data.",
                self.name
            )));
        }

        Ok(())
    }

    /// Label to show for this plugin.
    pub fn tab_title(&self) -> &str {
        match self.tab_title.as_deref() {
            Some(title) if !title.is_empty() => title,
            _ => &self.name,
        }
    }

    /// Whether the manifest carries a non-empty source payload.
    pub fn has_source(&self) -> bool {
        self.python_code.as_deref().is_some_and(|code| !code.trim().is_empty())
    }

    /// Decode the embedded source.
    ///
    /// Whitespace inside the payload is ignored, so wrapped base64 decodes.
    pub fn decode_source(&self) -> PluginResult<String> {
        let missing = |message: String| PluginError::MissingCodePayload {
            name: self.name.clone(),
            message,
        };

        let encoded = match self.python_code.as_deref() {
            Some(code) if !code.trim().is_empty() => code,
            _ => return Err(missing("Missing 'python_code'.".to_string())),
        };

        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| missing(format!("'python_code' is not valid base64: {e}")))?;

        String::from_utf8(bytes)
            .map_err(|e| missing(format!("'python_code' is not UTF-8 source: {e}")))
    }
}
