//! Plugin system error types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur during plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin is not registered or its files are missing.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// Manifest file is not valid JSON or has the wrong shape.
    #[error("Invalid manifest JSON in {path}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    /// Manifest parsed but is not loadable (missing name or function_name).
    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    /// Manifest has no `python_code`, or it does not decode to UTF-8 source.
    #[error("Malformed plugin '{name}': {message}")]
    MissingCodePayload { name: String, message: String },

    /// Writing the generated source artifact failed.
    #[error("Failed to write source for '{name}' to {path}: {source}")]
    CodeGeneration {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact could not be imported (syntax error, import-time exception,
    /// interpreter missing).
    #[error("Failed to import plugin '{name}': {message}")]
    Import { name: String, message: String },

    /// Declared entry point is absent or not callable.
    #[error("Function '{function}' not found or not callable in plugin '{name}'")]
    EntryPointMissing { name: String, function: String },

    /// The plugin raised while it was being invoked.
    #[error("Error executing plugin '{name}': {message}")]
    Execution { name: String, message: String },

    /// Plugin did not answer within the configured call timeout.
    #[error("Plugin '{0}' timed out after {1:?}")]
    Timeout(String, Duration),

    /// HTML output was requested but the content was not a string.
    #[error("Plugin '{name}' returned HTML output type, but the content was not a string (got {found})")]
    OutputTypeMismatch { name: String, found: String },

    /// Writing the active-plugin list failed.
    #[error("Error saving plugin configuration: {0}")]
    ConfigPersist(String),

    /// Reading or writing the history file failed.
    #[error("Error saving plugin history: {0}")]
    HistoryPersist(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Whether this error happened while bringing a plugin up, as opposed to
    /// running it.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::ManifestParse { .. }
                | Self::InvalidManifest(_)
                | Self::MissingCodePayload { .. }
                | Self::CodeGeneration { .. }
                | Self::Import { .. }
                | Self::EntryPointMissing { .. }
        )
    }
}
