//! Plugin execution.
//!
//! The [`ExecutionEngine`] runs every active analysis plugin against a file.
//! Each call is isolated: an error, a timeout or a panic in one plugin
//! becomes that plugin's result and never stops the others.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use indexmap::IndexMap;
use serde_json::Value;

use super::output::{classify, classify_static, ClassifiedResult};
use super::registry::{PluginRecord, Registry};
use super::{PluginResult, PluginType};
use crate::core::HistoryLog;

/// Arguments of a single plugin invocation.
#[derive(Debug, Clone, Copy)]
pub enum PluginContext<'a> {
    /// Analysis call with the file path and its full content.
    Analyze {
        /// Path of the analyzed file.
        path: &'a Path,
        /// File bytes.
        data: &'a [u8],
    },
    /// Static HTML call, no arguments.
    Render,
}

/// A loaded plugin entry point.
///
/// Implementations must be callable from any thread. Calls into a single
/// plugin may be serialized internally.
pub trait Plugin: Send + Sync {
    /// Invoke the entry point.
    fn run(&self, ctx: &PluginContext<'_>) -> PluginResult<Value>;
}

/// Runs plugins from a registry snapshot.
///
/// Cloning is cheap; clones share the registry and the history log.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<Registry>,
    history: Arc<HistoryLog>,
}

impl ExecutionEngine {
    /// Create an engine over `registry`, logging to `history`.
    pub fn new(registry: Arc<Registry>, history: Arc<HistoryLog>) -> Self {
        Self { registry, history }
    }

    /// Run every active analysis plugin against `data`.
    ///
    /// Results are keyed by plugin name in registry order.
    pub fn run_analysis_plugins(&self, path: &Path, data: &[u8]) -> IndexMap<String, ClassifiedResult> {
        let snapshot = self.registry.snapshot();
        let mut results = IndexMap::new();

        for record in snapshot.iter().filter(|r| r.plugin_type == PluginType::AnalysisPlugin) {
            let ctx = PluginContext::Analyze { path, data };
            let result = match self.invoke(record, &ctx) {
                Ok(value) => classify(&record.name, value).unwrap_or_else(|e| {
                    self.history.append_error(e.to_string());
                    ClassifiedResult::Error(e.to_string())
                }),
                Err(message) => {
                    self.history.append_error(format!(
                        "Error executing plugin '{}' on {}: {}",
                        record.name,
                        path.display(),
                        message
                    ));
                    ClassifiedResult::Error(message)
                }
            };
            results.insert(record.name.clone(), result);
        }

        self.history.append(format!(
            "Ran {} analysis plugin(s) on {}",
            results.len(),
            path.display()
        ));
        results
    }

    /// Invoke a static HTML plugin once.
    pub fn render_static(&self, record: &PluginRecord) -> ClassifiedResult {
        match self.invoke(record, &PluginContext::Render) {
            Ok(value) => {
                let result = classify_static(&record.name, value);
                if let ClassifiedResult::Error(message) = &result {
                    self.history.append_error(message.clone());
                }
                result
            }
            Err(message) => {
                self.history
                    .append_error(format!("Error rendering static plugin '{}': {}", record.name, message));
                ClassifiedResult::Error(message)
            }
        }
    }

    /// Run the analysis pass on a worker thread.
    pub fn spawn_analysis(
        &self,
        path: PathBuf,
        data: Vec<u8>,
    ) -> JoinHandle<IndexMap<String, ClassifiedResult>> {
        let engine = self.clone();
        std::thread::spawn(move || engine.run_analysis_plugins(&path, &data))
    }

    fn invoke(&self, record: &PluginRecord, ctx: &PluginContext<'_>) -> Result<Value, String> {
        tracing::debug!(plugin = %record.name, "Invoking plugin");
        match panic::catch_unwind(AssertUnwindSafe(|| record.entry.run(ctx))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(format!("Plugin '{}' panicked: {}", record.name, reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::registry::tests::{record, Constant};
    use crate::plugin::PluginError;
    use serde_json::json;

    struct Raises;

    impl Plugin for Raises {
        fn run(&self, _ctx: &PluginContext<'_>) -> PluginResult<Value> {
            Err(PluginError::Execution { name: "bad".to_string(), message: "boom".to_string() })
        }
    }

    struct Panics;

    impl Plugin for Panics {
        fn run(&self, _ctx: &PluginContext<'_>) -> PluginResult<Value> {
            panic!("plugin bug")
        }
    }

    struct Length;

    impl Plugin for Length {
        fn run(&self, ctx: &PluginContext<'_>) -> PluginResult<Value> {
            match ctx {
                PluginContext::Analyze { data, .. } => Ok(json!(data.len())),
                PluginContext::Render => Ok(json!("<p>static</p>")),
            }
        }
    }

    fn engine() -> (ExecutionEngine, Arc<Registry>, Arc<HistoryLog>) {
        let registry = Arc::new(Registry::new());
        let history = Arc::new(HistoryLog::new(100));
        (ExecutionEngine::new(Arc::clone(&registry), Arc::clone(&history)), registry, history)
    }

    #[test]
    fn test_results_in_registry_order() {
        let (engine, registry, _) = engine();
        registry.upsert(record("b", Arc::new(Constant(json!("B")))));
        registry.upsert(record("a", Arc::new(Length)));

        let results = engine.run_analysis_plugins(Path::new("f.bin"), b"12345");
        let names: Vec<_> = results.keys().cloned().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(results["b"], ClassifiedResult::Text("B".to_string()));
        assert_eq!(results["a"], ClassifiedResult::Text("5".to_string()));
    }

    #[test]
    fn test_failures_are_isolated() {
        let (engine, registry, history) = engine();
        registry.upsert(record("bad", Arc::new(Raises)));
        registry.upsert(record("panicky", Arc::new(Panics)));
        registry.upsert(record("good", Arc::new(Constant(json!({"ok": true})))));

        let results = engine.run_analysis_plugins(Path::new("f.bin"), b"");
        assert_eq!(results.len(), 3);
        assert!(results["bad"].is_error());
        assert!(matches!(&results["panicky"], ClassifiedResult::Error(m) if m.contains("plugin bug")));
        assert_eq!(results["good"], ClassifiedResult::Structured(json!({"ok": true})));

        let lines = history.lines();
        assert!(lines.iter().any(|l| l.contains("Error executing plugin 'bad'")));
    }

    #[test]
    fn test_html_mismatch_is_error_result() {
        let (engine, registry, _) = engine();
        registry.upsert(record(
            "html",
            Arc::new(Constant(json!({"infoscava_output_type": "html", "content": 42}))),
        ));

        let results = engine.run_analysis_plugins(Path::new("f.bin"), b"");
        assert!(results["html"].is_error());
    }

    #[test]
    fn test_static_plugins_are_skipped() {
        let (engine, registry, _) = engine();
        let mut static_record = record("page", Arc::new(Length));
        static_record.plugin_type = PluginType::StaticHtmlPlugin;
        registry.upsert(static_record);

        assert!(engine.run_analysis_plugins(Path::new("f.bin"), b"x").is_empty());
    }

    #[test]
    fn test_render_static() {
        let (engine, _, _) = engine();
        let page = record("page", Arc::new(Length));
        assert_eq!(engine.render_static(&page), ClassifiedResult::Html("<p>static</p>".to_string()));

        let not_html = record("num", Arc::new(Constant(json!(1))));
        assert!(engine.render_static(&not_html).is_error());
    }

    #[test]
    fn test_spawn_analysis() {
        let (engine, registry, _) = engine();
        registry.upsert(record("len", Arc::new(Length)));

        let handle = engine.spawn_analysis(PathBuf::from("f.bin"), vec![0; 7]);
        registry.clear();

        let results = handle.join().unwrap();
        // The pass may start before or after the clear
        assert!(results.is_empty() || results["len"] == ClassifiedResult::Text("7".to_string()));
    }

    #[test]
    fn test_empty_registry() {
        let (engine, _, _) = engine();
        assert!(engine.run_analysis_plugins(Path::new("f.bin"), b"").is_empty());
    }
}
