//! Plugin runtime for Infoscava.
//!
//! Third parties extend Infoscava by dropping `.infoscava` manifests into
//! the plugin directory. A manifest carries metadata plus base64-encoded
//! Python source.
//!
//! # Architecture
//!
//! - [`ManifestStore`] finds manifests and owns the persisted state files.
//! - [`SourceMaterializer`] writes the embedded source to `<name>.py`.
//! - [`Loader`] imports the artifact into a fresh execution context through
//!   a [`PluginBackend`]. [`PythonBackend`] gives every load its own
//!   interpreter process, spoken to over line-delimited JSON-RPC.
//! - [`Registry`] holds the active plugins; [`ExecutionEngine`] runs them
//!   against a snapshot so one failing plugin never affects another.
//! - [`PluginManager`] ties it together and notifies an [`EventBus`].
//!
//! # Plugin Types
//!
//! - **Analysis plugins**: `def f(path, data)` called for every file
//! - **Static HTML plugins**: `def f()` called once, returns an HTML page
//!
//! # Example Manifest
//!
//! ```json
//! {
//!     "function_name": "analyze",
//!     "type": "analysis_plugin",
//!     "description": "Counts bytes",
//!     "tab_title": "Size",
//!     "python_code": "ZGVmIGFuYWx5emUocGF0aCwgZGF0YSk6CiAgICByZXR1cm4gbGVuKGRhdGEpCg=="
//! }
//! ```

mod error;
mod events;
mod host;
mod loader;
mod manager;
mod manifest;
mod materializer;
mod output;
mod protocol;
mod registry;
mod runtime;
mod store;
mod types;

pub use error::{PluginError, PluginResult};
pub use events::{EventBus, PluginEvent};
pub use host::{PythonBackend, PythonPlugin, DEFAULT_CALL_TIMEOUT, DEFAULT_INTERPRETER};
pub use loader::{Loader, ModuleIdentity, PluginBackend};
pub use manager::PluginManager;
pub use manifest::PluginManifest;
pub use materializer::SourceMaterializer;
pub use output::{classify, classify_static, ClassifiedResult, Table};
pub use protocol::{ErrorKind, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use registry::{PluginRecord, PluginState, Registry};
pub use runtime::{ExecutionEngine, Plugin, PluginContext};
pub use store::ManifestStore;
pub use types::{
    PluginInfo, PluginType, ARTIFACT_EXTENSION, CONFIG_FILE, DEFAULT_DESCRIPTION, HISTORY_FILE,
    MANIFEST_EXTENSION, MODULE_PREFIX, OUTPUT_TYPE_KEY,
};
