//! On-disk layout of the plugin directory.
//!
//! ```text
//! plugins/
//!   hexdump.infoscava      manifest (JSON)
//!   hexdump.py             generated source artifact
//!   plugins_config.json    active plugin names
//!   plugin_history.json    history log lines
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use super::{
    PluginError, PluginManifest, PluginResult, ARTIFACT_EXTENSION, CONFIG_FILE, HISTORY_FILE,
    MANIFEST_EXTENSION,
};

/// Reads and writes manifests and the persisted state files.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    /// Directory holding manifests, artifacts and state files.
    dir: PathBuf,
}

impl ManifestStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> PluginResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Get the plugin directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the manifest for `name`.
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{MANIFEST_EXTENSION}"))
    }

    /// Path of the generated source for `name`.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{ARTIFACT_EXTENSION}"))
    }

    /// Path of the active-plugin list.
    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Path of the history file.
    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Whether a manifest for `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.manifest_path(name).is_file()
    }

    /// One pass over the manifests in the directory, ordered by file name.
    ///
    /// Call again for a fresh pass.
    pub fn discover(&self) -> PluginResult<impl Iterator<Item = PathBuf>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION)
            })
            .collect();
        paths.sort();
        Ok(paths.into_iter())
    }

    /// Read and parse one manifest.
    pub fn read_manifest(&self, path: &Path) -> PluginResult<PluginManifest> {
        PluginManifest::from_file(path)
    }

    /// Copy an external manifest into the directory as `<stem>.infoscava`,
    /// whatever the source extension, replacing any manifest of that name.
    /// Returns the destination path.
    pub fn import_manifest(&self, source: &Path) -> PluginResult<PathBuf> {
        if !source.is_file() {
            return Err(PluginError::NotFound(source.display().to_string()));
        }

        let name = source
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PluginError::NotFound(source.display().to_string()))?;
        let dest = self.manifest_path(name);

        if !same_file(source, &dest) {
            fs::copy(source, &dest)?;
        }

        Ok(dest)
    }

    /// Delete the manifest and the artifact of `name`. Missing files are not
    /// an error. Returns the paths that were removed.
    pub fn remove_plugin_files(&self, name: &str) -> PluginResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for path in [self.manifest_path(name), self.artifact_path(name)] {
            if path.exists() {
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }
        Ok(removed)
    }

    /// Delete one file if it exists.
    pub fn remove_file(&self, path: &Path) -> PluginResult<bool> {
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Write the active-plugin list.
    pub fn write_config(&self, names: &[String]) -> PluginResult<()> {
        let content = serde_json::to_string_pretty(names)
            .map_err(|e| PluginError::ConfigPersist(e.to_string()))?;
        fs::write(self.config_path(), content)
            .map_err(|e| PluginError::ConfigPersist(e.to_string()))
    }

    /// Read the active-plugin list. A missing file is an empty list.
    pub fn read_config(&self) -> PluginResult<Vec<String>> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| PluginError::ManifestParse { path, message: e.to_string() })
    }

    /// Read the history lines. A missing file is an empty history.
    pub fn read_history(&self) -> PluginResult<Vec<String>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content =
            fs::read_to_string(&path).map_err(|e| PluginError::HistoryPersist(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| {
            PluginError::HistoryPersist(format!("Error reading plugin history file (JSON error): {e}"))
        })
    }

    /// Write the history lines.
    pub fn write_history(&self, lines: &[String]) -> PluginResult<()> {
        let content = serde_json::to_string_pretty(lines)
            .map_err(|e| PluginError::HistoryPersist(e.to_string()))?;
        fs::write(self.history_path(), content)
            .map_err(|e| PluginError::HistoryPersist(e.to_string()))
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ManifestStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = ManifestStore::open(temp_dir.path().join("plugins")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_open_creates_directory() {
        let (_temp, store) = store();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn test_discover_only_manifests_sorted() {
        let (_temp, store) = store();
        fs::write(store.manifest_path("zeta"), "{}").unwrap();
        fs::write(store.manifest_path("alpha"), "{}").unwrap();
        fs::write(store.artifact_path("alpha"), "").unwrap();
        fs::write(store.config_path(), "[]").unwrap();

        let found: Vec<_> = store.discover().unwrap().collect();
        assert_eq!(found, vec![store.manifest_path("alpha"), store.manifest_path("zeta")]);

        // Restartable
        assert_eq!(store.discover().unwrap().count(), 2);
    }

    #[test]
    fn test_config_round_trip() {
        let (_temp, store) = store();
        assert!(store.read_config().unwrap().is_empty());

        let names = vec!["b".to_string(), "a".to_string()];
        store.write_config(&names).unwrap();
        assert_eq!(store.read_config().unwrap(), names);
    }

    #[test]
    fn test_history_round_trip() {
        let (_temp, store) = store();
        assert!(store.read_history().unwrap().is_empty());

        let lines = vec!["[2024-01-01 00:00:00] one".to_string()];
        store.write_history(&lines).unwrap();
        assert_eq!(store.read_history().unwrap(), lines);
    }

    #[test]
    fn test_corrupt_history_is_an_error() {
        let (_temp, store) = store();
        fs::write(store.history_path(), "{ nope").unwrap();
        assert!(matches!(store.read_history(), Err(PluginError::HistoryPersist(_))));
    }

    #[test]
    fn test_import_and_remove() {
        let (temp, store) = store();
        let source = temp.path().join("demo.infoscava");
        fs::write(&source, r#"{"function_name": "analyze"}"#).unwrap();

        let dest = store.import_manifest(&source).unwrap();
        assert_eq!(dest, store.manifest_path("demo"));
        assert!(store.contains("demo"));

        // Importing the copy onto itself is a no-op
        store.import_manifest(&dest).unwrap();

        fs::write(store.artifact_path("demo"), "x = 1").unwrap();
        let removed = store.remove_plugin_files("demo").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!store.contains("demo"));
        assert!(store.remove_plugin_files("demo").unwrap().is_empty());
    }

    #[test]
    fn test_import_normalizes_extension() {
        let (temp, store) = store();
        let source = temp.path().join("demo.json");
        fs::write(&source, r#"{"function_name": "analyze"}"#).unwrap();

        let dest = store.import_manifest(&source).unwrap();
        assert_eq!(dest, store.manifest_path("demo"));
        assert!(!store.dir().join("demo.json").exists());
        assert_eq!(store.discover().unwrap().collect::<Vec<_>>(), vec![dest]);
    }

    #[test]
    fn test_import_missing_source() {
        let (temp, store) = store();
        let err = store.import_manifest(&temp.path().join("nope.infoscava")).unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }
}
