//! In-memory table of active plugins.
//!
//! The registry is the single source of truth for what can run right now.
//! One control context mutates it; analysis workers only ever read a
//! [`Registry::snapshot`], which is a copy taken under the read lock and is
//! unaffected by later mutations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{ModuleIdentity, Plugin, PluginInfo, PluginType};

/// A successfully loaded plugin.
pub struct PluginRecord {
    /// Plugin name.
    pub name: String,
    /// Plugin type.
    pub plugin_type: PluginType,
    /// Plugin description.
    pub description: String,
    /// Display label.
    pub tab_title: String,
    /// Manifest the plugin was loaded from.
    pub manifest_path: PathBuf,
    /// Generated source the plugin was imported from.
    pub artifact_path: PathBuf,
    /// Module identity of this load.
    pub module: ModuleIdentity,
    /// Resolved entry point.
    pub entry: Arc<dyn Plugin>,
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("plugin_type", &self.plugin_type)
            .field("module", &self.module)
            .field("artifact_path", &self.artifact_path)
            .finish()
    }
}

impl PluginRecord {
    /// Summary for plugin lists.
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            plugin_type: self.plugin_type,
        }
    }
}

/// Lifecycle state of a plugin name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    /// Never seen, or forgotten by a full reload.
    Unregistered,
    /// A load is in progress. A previous record, if any, is still runnable.
    Loading,
    /// Loaded and runnable.
    Active,
    /// The last load failed.
    Failed(String),
    /// Deleted by the user.
    Deleted,
}

#[derive(Default)]
struct Inner {
    records: IndexMap<String, Arc<PluginRecord>>,
    states: HashMap<String, PluginState>,
}

/// Registry of active plugins, in most-recently-loaded order.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("active", &self.names()).finish()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as loading.
    pub fn begin_load(&self, name: &str) {
        self.inner.write().states.insert(name.to_string(), PluginState::Loading);
    }

    /// Install or replace a record. The record moves to the end of the
    /// execution order.
    ///
    /// Returns the record it replaced. Dropping that record tears down its
    /// execution context once no analysis pass holds it any more.
    pub fn upsert(&self, record: PluginRecord) -> Option<Arc<PluginRecord>> {
        let mut inner = self.inner.write();
        let name = record.name.clone();
        let previous = inner.records.shift_remove(&name);
        inner.records.insert(name.clone(), Arc::new(record));
        inner.states.insert(name, PluginState::Active);
        previous
    }

    /// Record a failed load. Any previous record is removed, so a plugin is
    /// never left partially active.
    pub fn mark_failed(&self, name: &str, reason: impl Into<String>) -> Option<Arc<PluginRecord>> {
        let mut inner = self.inner.write();
        let previous = inner.records.shift_remove(name);
        inner.states.insert(name.to_string(), PluginState::Failed(reason.into()));
        previous
    }

    /// Remove a record, marking the name deleted.
    pub fn remove(&self, name: &str) -> Option<Arc<PluginRecord>> {
        let mut inner = self.inner.write();
        let previous = inner.records.shift_remove(name);
        if previous.is_some() {
            inner.states.insert(name.to_string(), PluginState::Deleted);
        }
        previous
    }

    /// Drop every record and forget every state.
    pub fn clear(&self) -> Vec<Arc<PluginRecord>> {
        let mut inner = self.inner.write();
        inner.states.clear();
        inner.records.drain(..).map(|(_, record)| record).collect()
    }

    /// Copy of the active records, in execution order.
    pub fn snapshot(&self) -> Vec<Arc<PluginRecord>> {
        self.inner.read().records.values().cloned().collect()
    }

    /// Get an active record.
    pub fn get(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.inner.read().records.get(name).cloned()
    }

    /// Whether `name` is active.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().records.contains_key(name)
    }

    /// Lifecycle state of `name`.
    pub fn state(&self, name: &str) -> PluginState {
        self.inner.read().states.get(name).cloned().unwrap_or(PluginState::Unregistered)
    }

    /// Active plugin names, in execution order.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().records.keys().cloned().collect()
    }

    /// Number of active plugins.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether no plugin is active.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}
