//! Python plugin host.
//!
//! Every load spawns a new interpreter running a small host script. The host
//! imports the artifact under the requested module name, resolves the entry
//! point, then serves `call` requests over line-delimited JSON-RPC. A fresh
//! process per load means no module state ever leaks between generations.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::Value;

use super::loader::{ModuleIdentity, PluginBackend};
use super::protocol::{CallParams, ErrorKind, JsonRpcError, JsonRpcRequest, JsonRpcResponse, LoadParams};
use super::{Plugin, PluginContext, PluginError, PluginResult};

/// Default interpreter command.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Default bound on a single plugin call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker script run by each plugin process.
///
/// Plugin output written to stdout is redirected to stderr so it cannot
/// corrupt the protocol stream.
const HOST_SCRIPT: &str = r##"
import base64
import importlib.util
import json
import os
import sys
import traceback

_protocol = sys.stdout
sys.stdout = sys.stderr
_entry = None


def _send(message):
    try:
        line = json.dumps(message, allow_nan=False, default=str)
    except (TypeError, ValueError) as exc:
        line = json.dumps({
            "jsonrpc": "2.0",
            "id": message.get("id", 0),
            "error": {
                "code": -32603,
                "message": "Result is not JSON serializable: %s" % exc,
                "data": {"kind": "execution"},
            },
        })
    _protocol.write(line + "\n")
    _protocol.flush()


def _fail(rid, code, kind, message, tb=None):
    data = {"kind": kind}
    if tb:
        data["traceback"] = tb
    _send({"jsonrpc": "2.0", "id": rid, "error": {"code": code, "message": message, "data": data}})


def _load(rid, params):
    global _entry
    module_name = params["module"]
    path = params["path"]
    sys.modules.pop(module_name, None)
    plugin_dir = os.path.dirname(os.path.abspath(path))
    if plugin_dir not in sys.path:
        sys.path.insert(0, plugin_dir)
    try:
        spec = importlib.util.spec_from_file_location(module_name, path)
        if spec is None or spec.loader is None:
            raise ImportError("cannot create module spec for %s" % path)
        module = importlib.util.module_from_spec(spec)
        sys.modules[module_name] = module
        spec.loader.exec_module(module)
    except BaseException as exc:
        sys.modules.pop(module_name, None)
        _fail(rid, -32001, "import", "%s: %s" % (type(exc).__name__, exc), traceback.format_exc())
        return
    entry = getattr(module, params["function"], None)
    if entry is None or not callable(entry):
        _fail(rid, -32002, "entry_point", "'%s' is not a callable attribute" % params["function"])
        return
    _entry = entry
    _send({"jsonrpc": "2.0", "id": rid, "result": {"module": module_name}})


def _call(rid, params):
    if _entry is None:
        _fail(rid, -32600, "other", "no plugin loaded")
        return
    try:
        if "data" in params:
            result = _entry(params.get("path"), base64.b64decode(params["data"]))
        else:
            result = _entry()
    except BaseException as exc:
        _fail(rid, -32003, "execution", "%s: %s" % (type(exc).__name__, exc), traceback.format_exc())
        return
    _send({"jsonrpc": "2.0", "id": rid, "result": result})


def _main():
    for line in iter(sys.stdin.readline, ""):
        line = line.strip()
        if not line:
            continue
        try:
            request = json.loads(line)
        except ValueError as exc:
            _fail(0, -32700, "other", "parse error: %s" % exc)
            continue
        rid = request.get("id", 0)
        method = request.get("method")
        params = request.get("params") or {}
        if method == "load":
            _load(rid, params)
        elif method == "call":
            _call(rid, params)
        elif method == "shutdown":
            _send({"jsonrpc": "2.0", "id": rid, "result": None})
            break
        else:
            _fail(rid, -32601, "other", "unknown method %r" % method)


_main()
"##;

/// Why a request to a plugin process did not produce a result.
#[derive(Debug)]
enum Failure {
    /// The host script answered with an error.
    Rpc(JsonRpcError),
    /// No answer within the call timeout. The process has been killed.
    Timeout,
    /// The process died or spoke garbage. It has been killed.
    Broken(String),
}

/// One running plugin host process.
struct PluginProcess {
    name: String,
    child: Child,
    stdin: ChildStdin,
    responses: Receiver<String>,
    next_id: i64,
    alive: bool,
    timeout: Duration,
}

impl PluginProcess {
    fn spawn(interpreter: &str, name: &str, timeout: Duration) -> std::io::Result<Self> {
        let mut child = Command::new(interpreter)
            .args(["-u", "-c", HOST_SCRIPT])
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| std::io::Error::other("Failed to capture stdin"))?;
        let stdout =
            child.stdout.take().ok_or_else(|| std::io::Error::other("Failed to capture stdout"))?;
        let stderr =
            child.stderr.take().ok_or_else(|| std::io::Error::other("Failed to capture stderr"))?;

        let (tx, responses) = mpsc::channel();
        thread::Builder::new().name(format!("plugin-{name}-stdout")).spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;

        let plugin = name.to_string();
        thread::Builder::new().name(format!("plugin-{name}-stderr")).spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                tracing::debug!(plugin = %plugin, "{}", line);
            }
        })?;

        Ok(Self {
            name: name.to_string(),
            child,
            stdin,
            responses,
            next_id: 1,
            alive: true,
            timeout,
        })
    }

    /// Send a request and wait for its response, at most `self.timeout`.
    fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, Failure> {
        if !self.alive {
            return Err(Failure::Broken(format!(
                "Plugin process for '{}' is not running; reload the plugin",
                self.name
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request).map_err(|e| Failure::Broken(e.to_string()))?;
        tracing::trace!(plugin = %self.name, "<- {}", method);

        if let Err(e) = writeln!(self.stdin, "{line}").and_then(|()| self.stdin.flush()) {
            self.kill();
            return Err(Failure::Broken(format!("Failed to write to plugin process: {e}")));
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(line) => {
                    let response: JsonRpcResponse = match serde_json::from_str(&line) {
                        Ok(response) => response,
                        Err(e) => {
                            self.kill();
                            return Err(Failure::Broken(format!(
                                "Invalid response from plugin process: {e}"
                            )));
                        }
                    };
                    if response.id != id {
                        continue;
                    }
                    tracing::trace!(plugin = %self.name, success = response.is_success(), "-> {}", method);
                    return response.into_result().map_err(Failure::Rpc);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(plugin = %self.name, "Plugin call timed out, killing process");
                    self.kill();
                    return Err(Failure::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.kill();
                    return Err(Failure::Broken("Plugin process exited unexpectedly".to_string()));
                }
            }
        }
    }

    fn kill(&mut self) {
        self.alive = false;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        tracing::debug!(plugin = %self.name, "Stopping plugin process");
        self.kill();
    }
}

/// A plugin entry point living in its own Python process.
pub struct PythonPlugin {
    name: String,
    process: Mutex<PluginProcess>,
}

impl std::fmt::Debug for PythonPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonPlugin").field("name", &self.name).finish()
    }
}

impl PythonPlugin {
    /// Whether the backing process is still usable.
    pub fn is_alive(&self) -> bool {
        self.process.lock().alive
    }
}

impl Plugin for PythonPlugin {
    fn run(&self, ctx: &PluginContext<'_>) -> PluginResult<Value> {
        let params = match ctx {
            PluginContext::Analyze { path, data } => CallParams {
                path: Some(path.display().to_string()),
                data: Some(STANDARD.encode(data)),
            },
            PluginContext::Render => CallParams::default(),
        };
        let params = serde_json::to_value(params).map_err(|e| PluginError::Execution {
            name: self.name.clone(),
            message: e.to_string(),
        })?;

        let mut process = self.process.lock();
        process.request("call", Some(params)).map_err(|failure| match failure {
            Failure::Rpc(e) => PluginError::Execution {
                name: self.name.clone(),
                message: e.detailed_message(),
            },
            Failure::Timeout => PluginError::Timeout(self.name.clone(), process.timeout),
            Failure::Broken(message) => PluginError::Execution { name: self.name.clone(), message },
        })
    }
}

/// Loads plugins into Python interpreter processes.
#[derive(Debug, Clone)]
pub struct PythonBackend {
    interpreter: String,
    call_timeout: Duration,
}

impl Default for PythonBackend {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER, DEFAULT_CALL_TIMEOUT)
    }
}

impl PythonBackend {
    /// Create a backend running `interpreter`, bounding each call by
    /// `call_timeout`.
    pub fn new(interpreter: impl Into<String>, call_timeout: Duration) -> Self {
        Self { interpreter: interpreter.into(), call_timeout }
    }

    /// Interpreter command.
    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Whether the interpreter can be started.
    pub fn is_available(&self) -> bool {
        Command::new(&self.interpreter)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }
}

impl PluginBackend for PythonBackend {
    fn load(
        &self,
        name: &str,
        identity: &ModuleIdentity,
        artifact_path: &Path,
        function: &str,
    ) -> PluginResult<Arc<dyn Plugin>> {
        let import_error = |message: String| PluginError::Import { name: name.to_string(), message };

        let mut process = PluginProcess::spawn(&self.interpreter, name, self.call_timeout)
            .map_err(|e| import_error(format!("Failed to start '{}': {e}", self.interpreter)))?;

        let params = LoadParams {
            module: identity.module.clone(),
            path: artifact_path.display().to_string(),
            function: function.to_string(),
        };
        let params = serde_json::to_value(params).map_err(|e| import_error(e.to_string()))?;

        match process.request("load", Some(params)) {
            Ok(_) => {}
            Err(Failure::Rpc(e)) if e.kind() == ErrorKind::EntryPoint => {
                return Err(PluginError::EntryPointMissing {
                    name: name.to_string(),
                    function: function.to_string(),
                });
            }
            Err(Failure::Rpc(e)) => return Err(import_error(e.detailed_message())),
            Err(Failure::Timeout) => {
                return Err(import_error(format!(
                    "Import did not finish within {:?}",
                    self.call_timeout
                )));
            }
            Err(Failure::Broken(message)) => return Err(import_error(message)),
        }

        tracing::debug!(plugin = %name, module = %identity, "Plugin process ready");
        Ok(Arc::new(PythonPlugin { name: name.to_string(), process: Mutex::new(process) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn backend(timeout: Duration) -> Option<PythonBackend> {
        let backend = PythonBackend::new(DEFAULT_INTERPRETER, timeout);
        backend.is_available().then_some(backend)
    }

    fn load(
        backend: &PythonBackend,
        source: &str,
        function: &str,
    ) -> (TempDir, PluginResult<Arc<dyn Plugin>>) {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("demo.py");
        std::fs::write(&artifact, source).unwrap();
        let identity = ModuleIdentity::for_plugin("demo", 1);
        let result = backend.load("demo", &identity, &artifact, function);
        (temp_dir, result)
    }

    fn analyze(plugin: &Arc<dyn Plugin>, data: &[u8]) -> PluginResult<Value> {
        plugin.run(&PluginContext::Analyze { path: Path::new("/tmp/input.bin"), data })
    }

    #[test]
    fn test_missing_interpreter_is_import_error() {
        let backend = PythonBackend::new("definitely-not-a-python-interpreter", DEFAULT_CALL_TIMEOUT);
        assert!(!backend.is_available());
        let (_temp, result) = load(&backend, "def f(p, d):\n    return 1\n", "f");
        assert!(matches!(result, Err(PluginError::Import { .. })));
    }

    #[test]
    fn test_analysis_call() {
        let Some(backend) = backend(DEFAULT_CALL_TIMEOUT) else { return };
        let source = "def analyze(path, data):\n    print('noise')\n    return {'path': path, 'size': len(data), 'head': list(data[:2])}\n";
        let (_temp, plugin) = load(&backend, source, "analyze");
        let plugin = plugin.unwrap();

        let value = analyze(&plugin, b"\x01\x02\x03").unwrap();
        assert_eq!(value, json!({"path": "/tmp/input.bin", "size": 3, "head": [1, 2]}));

        // Same process serves later calls
        assert_eq!(analyze(&plugin, b"").unwrap()["size"], 0);
    }

    #[test]
    fn test_static_call() {
        let Some(backend) = backend(DEFAULT_CALL_TIMEOUT) else { return };
        let (_temp, plugin) = load(&backend, "def render():\n    return '<h1>hi</h1>'\n", "render");
        let value = plugin.unwrap().run(&PluginContext::Render).unwrap();
        assert_eq!(value, json!("<h1>hi</h1>"));
    }

    #[test]
    fn test_import_failure() {
        let Some(backend) = backend(DEFAULT_CALL_TIMEOUT) else { return };
        let (_temp, result) = load(&backend, "def broken(:\n", "broken");
        match result {
            Err(PluginError::Import { message, .. }) => assert!(message.contains("SyntaxError")),
            other => panic!("expected import error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_entry_point_missing() {
        let Some(backend) = backend(DEFAULT_CALL_TIMEOUT) else { return };
        let (_temp, result) = load(&backend, "value = 3\n", "value");
        assert!(matches!(result, Err(PluginError::EntryPointMissing { .. })));
    }

    #[test]
    fn test_exception_is_execution_error_with_traceback() {
        let Some(backend) = backend(DEFAULT_CALL_TIMEOUT) else { return };
        let source = "def analyze(path, data):\n    raise ValueError('bad input')\n";
        let (_temp, plugin) = load(&backend, source, "analyze");
        let plugin = plugin.unwrap();

        match analyze(&plugin, b"x") {
            Err(PluginError::Execution { message, .. }) => {
                assert!(message.contains("ValueError: bad input"));
                assert!(message.contains("Details:"));
            }
            other => panic!("expected execution error, got {other:?}"),
        }

        // Plugin exceptions do not kill the process
        assert!(matches!(analyze(&plugin, b"x"), Err(PluginError::Execution { .. })));
    }

    #[test]
    fn test_timeout_kills_process() {
        let Some(backend) = backend(Duration::from_secs(1)) else { return };
        let source = "import time\n\ndef analyze(path, data):\n    time.sleep(30)\n";
        let (_temp, plugin) = load(&backend, source, "analyze");
        let plugin = plugin.unwrap();

        assert!(matches!(
            analyze(&plugin, b""),
            Err(PluginError::Timeout(_, d)) if d == Duration::from_secs(1)
        ));
        let err = analyze(&plugin, b"").unwrap_err();
        assert!(err.to_string().contains("not running"));
    }
}
