//! Generation of source artifacts from manifests.

use std::fs::{self, File};
use std::path::Path;
use std::time::SystemTime;

use super::{PluginError, PluginManifest, PluginResult};

/// Writes a manifest's embedded source to its artifact file.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceMaterializer;

impl SourceMaterializer {
    /// Create a new materializer.
    pub fn new() -> Self {
        Self
    }

    /// Whether the artifact must be (re)generated from the manifest.
    ///
    /// True when the artifact is missing or the manifest is strictly newer.
    pub fn is_stale(&self, manifest_path: &Path, artifact_path: &Path) -> bool {
        let Some(artifact_mtime) = modified(artifact_path) else {
            return true;
        };
        modified(manifest_path).is_some_and(|manifest_mtime| manifest_mtime > artifact_mtime)
    }

    /// Decode the manifest source and write it to `artifact_path`.
    ///
    /// Without `force`, the write only happens when the artifact is stale.
    /// Returns whether the artifact was written. The payload is decoded even
    /// when nothing is written, so a broken manifest is always reported.
    pub fn materialize(
        &self,
        manifest: &PluginManifest,
        manifest_path: &Path,
        artifact_path: &Path,
        force: bool,
    ) -> PluginResult<bool> {
        let source = manifest.decode_source()?;

        if !force && !self.is_stale(manifest_path, artifact_path) {
            tracing::debug!(plugin = %manifest.name, "Artifact is up to date");
            return Ok(false);
        }

        let codegen = |source: std::io::Error| PluginError::CodeGeneration {
            name: manifest.name.clone(),
            path: artifact_path.to_path_buf(),
            source,
        };

        fs::write(artifact_path, source).map_err(codegen)?;

        // Keep artifact mtime >= manifest mtime even if the manifest carries
        // a timestamp from the future.
        if let (Some(manifest_mtime), Some(artifact_mtime)) =
            (modified(manifest_path), modified(artifact_path))
        {
            if artifact_mtime < manifest_mtime {
                File::options()
                    .write(true)
                    .open(artifact_path)
                    .and_then(|file| file.set_modified(manifest_mtime))
                    .map_err(codegen)?;
            }
        }

        tracing::debug!(plugin = %manifest.name, path = %artifact_path.display(), "Wrote artifact");
        Ok(true)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
