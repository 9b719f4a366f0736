//! Core functionality shared by the plugin runtime and the CLI.
//!
//! This module contains the settings and the plugin activity history.

mod config;
mod history;

pub use config::{Config, PluginConfig, CONFIG_ENV, DEFAULT_CALL_TIMEOUT_SECS};
pub use history::{HistoryEntry, HistoryLog, DEFAULT_HISTORY_CAPACITY};
