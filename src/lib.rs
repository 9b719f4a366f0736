//! # Infoscava
//!
//! File inspection with hot-loadable analysis plugins.
//!
//! Users extend Infoscava by dropping `.infoscava` plugin manifests into a
//! plugin directory. No restart or recompile is needed. This crate is the
//! plugin runtime: it discovers manifests, turns their embedded Python source
//! into importable files, loads each plugin into its own interpreter process,
//! runs the active plugins against file bytes and classifies what they
//! return. A bounded, persisted history records every load, execute and
//! delete event.
//!
//! ## Features
//!
//! - **Hot loading**: load, reload and delete plugins while running
//! - **Isolation**: a plugin that raises, panics or hangs only affects its own result
//! - **Fresh reloads**: every load gets a new interpreter, so edits always apply
//! - **Audit trail**: timestamped plugin history, persisted between runs
//!
//! ## Quick Start
//!
//! ```bash
//! # Pack a Python file into a manifest
//! infoscava pack byte_count.py --function analyze
//!
//! # Load it and analyze a file
//! infoscava load byte_count.infoscava
//! infoscava analyze ./some/file.bin
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::unnecessary_debug_formatting)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

pub mod core;
pub mod plugin;

// Re-export commonly used types
pub use core::{Config, HistoryEntry, HistoryLog};
pub use plugin::{
    ClassifiedResult, EventBus, ExecutionEngine, Plugin, PluginContext, PluginError, PluginEvent,
    PluginInfo, PluginManager, PluginManifest, PluginResult, PluginType, PythonBackend,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "infoscava";
