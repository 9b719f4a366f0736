//! Loading generated artifacts into fresh execution contexts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::registry::PluginRecord;
use super::{Plugin, PluginError, PluginManifest, PluginResult, MODULE_PREFIX};

/// Identity a plugin is loaded under.
///
/// The module name is stable per plugin name. The generation grows with
/// every load, so no two loads share an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    /// Module name inside the execution context.
    pub module: String,
    /// Load counter for this plugin name, starting at 1.
    pub generation: u64,
}

impl ModuleIdentity {
    /// Identity of the `generation`-th load of `name`.
    pub fn for_plugin(name: &str, generation: u64) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        Self { module: format!("{MODULE_PREFIX}{hex}"), generation }
    }
}

impl std::fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.module, self.generation)
    }
}

/// Creates execution contexts for plugin artifacts.
///
/// Every call must produce a context that shares no module state with
/// earlier loads, so an edited artifact always takes effect.
pub trait PluginBackend: Send + Sync {
    /// Import `artifact_path` under `identity` and resolve `function`.
    ///
    /// Fails with [`PluginError::Import`] when the artifact cannot be
    /// imported, and [`PluginError::EntryPointMissing`] when `function` is
    /// absent or not callable.
    fn load(
        &self,
        name: &str,
        identity: &ModuleIdentity,
        artifact_path: &Path,
        function: &str,
    ) -> PluginResult<Arc<dyn Plugin>>;
}

/// Turns materialized manifests into registry records.
pub struct Loader {
    backend: Arc<dyn PluginBackend>,
    generations: Mutex<HashMap<String, u64>>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader").field("generations", &*self.generations.lock()).finish()
    }
}

impl Loader {
    /// Create a loader over `backend`.
    pub fn new(backend: Arc<dyn PluginBackend>) -> Self {
        Self { backend, generations: Mutex::new(HashMap::new()) }
    }

    fn next_identity(&self, name: &str) -> ModuleIdentity {
        let mut generations = self.generations.lock();
        let generation = generations.entry(name.to_string()).or_insert(0);
        *generation += 1;
        ModuleIdentity::for_plugin(name, *generation)
    }

    /// Load the artifact of `manifest` into a fresh context.
    pub fn load(
        &self,
        manifest: &PluginManifest,
        manifest_path: &Path,
        artifact_path: &Path,
    ) -> PluginResult<PluginRecord> {
        manifest.validate()?;

        if !artifact_path.is_file() {
            return Err(PluginError::Import {
                name: manifest.name.clone(),
                message: format!("Source file {} does not exist", artifact_path.display()),
            });
        }

        let identity = self.next_identity(&manifest.name);
        tracing::debug!(plugin = %manifest.name, module = %identity, "Loading plugin");

        let entry = self.backend.load(&manifest.name, &identity, artifact_path, &manifest.function_name)?;

        Ok(PluginRecord {
            name: manifest.name.clone(),
            plugin_type: manifest.plugin_type,
            description: manifest.description.clone(),
            tab_title: manifest.tab_title().to_string(),
            manifest_path: manifest_path.to_path_buf(),
            artifact_path: artifact_path.to_path_buf(),
            module: identity,
            entry,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plugin::PluginContext;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// In-process backend. The loaded plugin returns the artifact text read at
    /// load time; `raise` and `missing` in the source simulate failures.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub loads: AtomicUsize,
    }

    struct Snapshot(String);

    impl Plugin for Snapshot {
        fn run(&self, _ctx: &PluginContext<'_>) -> PluginResult<Value> {
            Ok(Value::String(self.0.clone()))
        }
    }

    impl PluginBackend for FakeBackend {
        fn load(
            &self,
            name: &str,
            _identity: &ModuleIdentity,
            artifact_path: &Path,
            function: &str,
        ) -> PluginResult<Arc<dyn Plugin>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let source = std::fs::read_to_string(artifact_path)?;
            if source.contains("raise") {
                return Err(PluginError::Import {
                    name: name.to_string(),
                    message: "SyntaxError".to_string(),
                });
            }
            if source.contains("missing") {
                return Err(PluginError::EntryPointMissing {
                    name: name.to_string(),
                    function: function.to_string(),
                });
            }
            Ok(Arc::new(Snapshot(source)))
        }
    }

    #[test]
    fn test_module_identity() {
        let first = ModuleIdentity::for_plugin("demo", 1);
        let second = ModuleIdentity::for_plugin("demo", 2);
        assert_eq!(first.module, second.module);
        assert_ne!(first, second);
        assert!(first.module.starts_with(MODULE_PREFIX));
        assert_eq!(first.module.len(), MODULE_PREFIX.len() + 16);
        assert_ne!(first.module, ModuleIdentity::for_plugin("other", 1).module);
    }

    #[test]
    fn test_load_builds_record_with_fresh_generation() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("demo.py");
        std::fs::write(&artifact, "hello").unwrap();
        let manifest = PluginManifest::new("demo", "analyze").with_tab_title("Demo");

        let backend = Arc::new(FakeBackend::default());
        let loader = Loader::new(backend.clone());
        let manifest_path = temp_dir.path().join("demo.infoscava");

        let first = loader.load(&manifest, &manifest_path, &artifact).unwrap();
        let second = loader.load(&manifest, &manifest_path, &artifact).unwrap();

        assert_eq!(first.tab_title, "Demo");
        assert_eq!(first.module.generation, 1);
        assert_eq!(second.module.generation, 2);
        assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_load_rejects_invalid_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("demo.py");
        std::fs::write(&artifact, "hello").unwrap();

        let loader = Loader::new(Arc::new(FakeBackend::default()));
        let manifest = PluginManifest::new("demo", "");
        let err = loader.load(&manifest, Path::new("demo.infoscava"), &artifact).unwrap_err();
        assert!(matches!(err, PluginError::InvalidManifest(_)));
    }

    #[test]
    fn test_missing_artifact_is_import_error() {
        let temp_dir = TempDir::new().unwrap();
        let loader = Loader::new(Arc::new(FakeBackend::default()));
        let manifest = PluginManifest::new("demo", "analyze");
        let err = loader
            .load(&manifest, Path::new("demo.infoscava"), &temp_dir.path().join("demo.py"))
            .unwrap_err();
        assert!(matches!(err, PluginError::Import { .. }));
    }
}
