//! Plugin manager for loading, reloading, deleting and running plugins.
//!
//! The manager is the control context. Every mutating operation takes
//! `&mut self`, recovers from every [`PluginError`](super::PluginError) it
//! meets, records what happened in the history log, keeps the persisted
//! active-plugin list in step with the registry, and notifies subscribers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use super::events::{EventBus, PluginEvent};
use super::host::PythonBackend;
use super::loader::{Loader, PluginBackend};
use super::materializer::SourceMaterializer;
use super::output::ClassifiedResult;
use super::registry::{PluginRecord, Registry};
use super::runtime::ExecutionEngine;
use super::store::ManifestStore;
use super::{PluginError, PluginInfo, PluginResult, PluginType};
use crate::core::{Config, HistoryLog};

/// Manages plugin discovery, lifecycle and execution.
pub struct PluginManager {
    /// Settings the manager was opened with.
    config: Config,
    /// Plugin directory.
    store: ManifestStore,
    /// Artifact generator.
    materializer: SourceMaterializer,
    /// Artifact loader.
    loader: Loader,
    /// Active plugins.
    registry: Arc<Registry>,
    /// Audit log.
    history: Arc<HistoryLog>,
    /// Lifecycle notifications.
    events: Arc<EventBus>,
    /// Analysis runner.
    engine: ExecutionEngine,
    /// HTML rendered by static plugins when they were loaded.
    static_outputs: HashMap<String, ClassifiedResult>,
    /// Set once the history has been persisted on shutdown.
    shut_down: bool,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("dir", &self.store.dir())
            .field("registry", &self.registry)
            .finish()
    }
}

impl PluginManager {
    /// Open the plugin directory with the Python backend and load every
    /// plugin found there.
    pub fn new(config: Config) -> PluginResult<Self> {
        let backend = PythonBackend::new(config.plugin.python.clone(), config.plugin.call_timeout());
        Self::with_backend(config, Arc::new(backend))
    }

    /// Open the plugin directory with a custom backend.
    pub fn with_backend(config: Config, backend: Arc<dyn PluginBackend>) -> PluginResult<Self> {
        Self::open(config, backend, Arc::new(EventBus::new()))
    }

    /// Open the plugin directory, delivering startup events to `events`.
    pub fn open(
        config: Config,
        backend: Arc<dyn PluginBackend>,
        events: Arc<EventBus>,
    ) -> PluginResult<Self> {
        let store = ManifestStore::open(config.plugin.plugin_dir())?;
        let history = Arc::new(HistoryLog::new(config.plugin.history_capacity()));
        let registry = Arc::new(Registry::new());
        let engine = ExecutionEngine::new(Arc::clone(&registry), Arc::clone(&history));

        match history.restore(&store) {
            Ok(0) => history.append("No plugin history found."),
            Ok(count) => history.append(format!("Loaded {count} plugin history entries.")),
            Err(e) => {
                history.clear();
                history.append_error(e.to_string());
            }
        }

        let mut manager = Self {
            config,
            store,
            materializer: SourceMaterializer::new(),
            loader: Loader::new(backend),
            registry,
            history,
            events,
            engine,
            static_outputs: HashMap::new(),
            shut_down: false,
        };

        let previous = manager.store.read_config().unwrap_or_else(|e| {
            manager.history.append_error(format!("Error reading plugin configuration: {e}"));
            Vec::new()
        });

        manager.scan();

        for name in previous.iter().filter(|name| !manager.registry.contains(name)) {
            manager.history.append(format!(
                "Plugin '{name}' from the saved configuration is no longer available."
            ));
        }

        manager.events.emit(PluginEvent::Reloaded);
        Ok(manager)
    }

    /// Get the settings.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the plugin directory store.
    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Get the registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the history log.
    pub fn history(&self) -> &Arc<HistoryLog> {
        &self.history
    }

    /// Get the event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Get the execution engine. Clone it to run analyses elsewhere.
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Get an active plugin.
    pub fn record(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.registry.get(name)
    }

    /// Scan the directory, loading every manifest. Stale or missing
    /// artifacts are regenerated first.
    fn scan(&mut self) {
        self.history.append("Scanning plugin directory for plugins...");

        let paths = match self.store.discover() {
            Ok(paths) => paths,
            Err(e) => {
                self.history.append_error(format!(
                    "Error scanning plugin directory {}: {e}",
                    self.store.dir().display()
                ));
                return;
            }
        };

        for manifest_path in paths {
            let Some(name) = plugin_name(&manifest_path) else { continue };
            self.activate(&name, &manifest_path, false);
        }

        self.save_config();
        self.history.append(format!(
            "Finished scanning plugins: {} active.",
            self.registry.len()
        ));
    }

    /// Materialize and load one plugin, then install it.
    ///
    /// Emits `Loaded` or `Failed`. A failure removes any previous record.
    fn activate(&mut self, name: &str, manifest_path: &Path, force: bool) -> bool {
        self.registry.begin_load(name);

        match self.build_record(name, manifest_path, force) {
            Ok(record) => {
                let plugin_type = record.plugin_type;
                let module = record.module.clone();
                let static_html = (plugin_type == PluginType::StaticHtmlPlugin)
                    .then(|| self.engine.render_static(&record));

                // Dropping the replaced record stops its process once no
                // analysis pass still holds it.
                drop(self.registry.upsert(record));

                match static_html {
                    Some(output) => self.static_outputs.insert(name.to_string(), output),
                    None => self.static_outputs.remove(name),
                };

                self.history.append(format!(
                    "Loaded plugin: {name} (Type: {plugin_type}) as {module}"
                ));
                self.events.emit(PluginEvent::Loaded(name.to_string()));
                true
            }
            Err(e) => {
                let reason = e.to_string();
                drop(self.registry.mark_failed(name, reason.clone()));
                self.static_outputs.remove(name);
                self.history.append_error(format!("Failed to load plugin '{name}': {reason}"));
                self.events.emit(PluginEvent::Failed { name: name.to_string(), reason });
                false
            }
        }
    }

    fn build_record(
        &self,
        name: &str,
        manifest_path: &Path,
        force: bool,
    ) -> PluginResult<PluginRecord> {
        let manifest = self.store.read_manifest(manifest_path)?;
        manifest.validate()?;

        let artifact_path = self.store.artifact_path(name);
        if self.materializer.materialize(&manifest, manifest_path, &artifact_path, force)? {
            self.history.append(format!(
                "Wrote source for plugin '{name}' to {}",
                artifact_path.display()
            ));
        }

        self.loader.load(&manifest, manifest_path, &artifact_path)
    }

    /// Write the active-plugin list. Failures are logged only.
    fn save_config(&self) {
        let names = self.registry.names();
        match self.store.write_config(&names) {
            Ok(()) => tracing::debug!(count = names.len(), "Saved plugin configuration"),
            Err(e) => self.history.append_error(e.to_string()),
        }
    }

    /// Copy a manifest into the plugin directory as `<stem>.infoscava` and
    /// load it.
    ///
    /// A plugin with the same name is replaced. If loading fails, the copied
    /// manifest and its artifact are removed again.
    pub fn load_new_manifest(&mut self, source: &Path) -> bool {
        let Some(name) = plugin_name(source) else {
            self.history.append_error(format!(
                "Error loading plugin: {}",
                PluginError::NotFound(source.display().to_string())
            ));
            return false;
        };

        if self.store.contains(&name) {
            self.history.append(format!("Replacing existing plugin '{name}'."));
        }

        let dest = match self.store.import_manifest(source) {
            Ok(dest) => dest,
            Err(e) => {
                self.history.append_error(format!("Error loading plugin '{name}': {e}"));
                return false;
            }
        };
        self.history.append(format!(
            "Copied plugin manifest from {} to {}",
            source.display(),
            dest.display()
        ));

        let replaced = self.registry.contains(&name);
        if self.activate(&name, &dest, true) {
            self.save_config();
            self.events.emit(PluginEvent::Reloaded);
            self.events.emit(PluginEvent::ReanalyzeRequested);
            return true;
        }

        for path in [dest, self.store.artifact_path(&name)] {
            match self.store.remove_file(&path) {
                Ok(true) => self.history.append(format!("Removed {}", path.display())),
                Ok(false) => {}
                Err(e) => {
                    self.history.append_error(format!("Error cleaning up plugin '{name}': {e}"));
                }
            }
        }
        self.save_config();

        // The failed load dropped the plugin it was replacing.
        if replaced {
            self.events.emit(PluginEvent::Reloaded);
            self.events.emit(PluginEvent::ReanalyzeRequested);
        }
        false
    }

    /// Delete an active plugin and its files.
    ///
    /// Unknown names return `false` and change nothing, as does a manifest
    /// that cannot be removed. Once the manifest is gone the plugin is
    /// deregistered even if its artifact stays behind.
    pub fn delete_plugin(&mut self, name: &str) -> bool {
        let Some(record) = self.registry.get(name) else {
            self.history.append(format!("Plugin '{name}' not found for deletion."));
            return false;
        };

        match self.store.remove_file(&record.manifest_path) {
            Ok(true) => self.history.append(format!("Deleted {}", record.manifest_path.display())),
            Ok(false) => {}
            Err(e) => {
                self.history.append_error(format!("Error deleting plugin '{name}': {e}"));
                return false;
            }
        }

        match self.store.remove_file(&record.artifact_path) {
            Ok(true) => self.history.append(format!("Deleted {}", record.artifact_path.display())),
            Ok(false) => {}
            Err(e) => self.history.append_error(format!(
                "Plugin '{name}' manifest deleted, but {} could not be removed: {e}",
                record.artifact_path.display()
            )),
        }
        drop(record);

        drop(self.registry.remove(name));
        self.static_outputs.remove(name);
        self.save_config();
        self.history.append(format!("Plugin '{name}' deleted."));
        self.events.emit(PluginEvent::Deleted(name.to_string()));
        self.events.emit(PluginEvent::ReanalyzeRequested);
        true
    }

    /// Regenerate the artifact of an active plugin and load it again.
    ///
    /// On failure the plugin is no longer active. Unknown names return
    /// `false` and change nothing.
    pub fn reload_plugin(&mut self, name: &str) -> bool {
        let Some(record) = self.registry.get(name) else {
            self.history.append(format!("Plugin '{name}' not found for reloading."));
            return false;
        };
        let manifest_path = record.manifest_path.clone();
        drop(record);

        self.history.append(format!("Reloading plugin: {name}..."));
        let loaded = self.activate(name, &manifest_path, true);
        self.save_config();

        if loaded {
            self.history.append(format!("Plugin '{name}' reloaded."));
        }
        self.events.emit(PluginEvent::Reloaded);
        self.events.emit(PluginEvent::ReanalyzeRequested);
        loaded
    }

    /// Forget every plugin and rescan the directory. Every plugin gets a
    /// fresh load; only stale artifacts are regenerated.
    pub fn reload_all(&mut self) {
        self.history.append("Reloading all plugins...");
        drop(self.registry.clear());
        self.static_outputs.clear();

        self.scan();

        self.events.emit(PluginEvent::Reloaded);
        self.events.emit(PluginEvent::ReanalyzeRequested);
    }

    /// Active plugins, in execution order.
    pub fn list_active_plugins(&self) -> Vec<PluginInfo> {
        self.registry.snapshot().iter().map(|record| record.info()).collect()
    }

    /// Run every active analysis plugin against a file's content.
    pub fn run_analysis_plugins(&self, path: &Path, data: &[u8]) -> IndexMap<String, ClassifiedResult> {
        self.engine.run_analysis_plugins(path, data)
    }

    /// HTML a static plugin rendered when it was loaded.
    pub fn static_output(&self, name: &str) -> Option<&ClassifiedResult> {
        self.static_outputs.get(name)
    }

    /// Change the history capacity, trimming immediately.
    pub fn set_history_capacity(&mut self, capacity: usize) {
        self.history.set_capacity(capacity);
        self.config.plugin.max_history_entries = i64::try_from(capacity).unwrap_or(i64::MAX);
    }

    /// Write the history log to disk.
    pub fn persist_history(&self) -> PluginResult<()> {
        self.history.persist(&self.store).inspect_err(|e| {
            tracing::warn!(error = %e, "Failed to persist plugin history");
        })
    }

    /// Persist the history. Also runs on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        let _ = self.persist_history();
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Plugin name of a manifest path: its file stem.
fn plugin_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
