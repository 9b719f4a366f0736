//! Wire protocol between the host and plugin worker processes.
//!
//! Line-delimited JSON-RPC 2.0 over the worker's stdin/stdout. One request
//! per line, one response per line, strictly alternating.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: i64,
    /// Method name
    pub method: String,
    /// Parameters (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, method: method.into(), params }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Request ID
    pub id: i64,
    /// Result; `null` is a legitimate plugin return value
    #[serde(default)]
    pub result: Value,
    /// Error (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Split into the result value or the error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl JsonRpcError {
    /// Which stage of the worker failed.
    pub fn kind(&self) -> ErrorKind {
        self.data.as_ref().map_or(ErrorKind::Other, |d| d.kind)
    }

    /// Message with the Python traceback appended, when there is one.
    pub fn detailed_message(&self) -> String {
        match self.data.as_ref().and_then(|d| d.traceback.as_deref()) {
            Some(tb) if !tb.trim().is_empty() => {
                format!("{}\nDetails:\n{}", self.message, tb.trim_end())
            }
            _ => self.message.clone(),
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// Extra error information sent by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    /// Failure stage.
    #[serde(default)]
    pub kind: ErrorKind,
    /// Formatted Python traceback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Failure stage reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Importing the module failed.
    Import,
    /// The entry point is missing or not callable.
    EntryPoint,
    /// The entry point raised.
    Execution,
    /// Anything else (protocol misuse).
    #[default]
    #[serde(other)]
    Other,
}

/// Parameters of the `load` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadParams {
    /// Module name to import the artifact under.
    pub module: String,
    /// Artifact path.
    pub path: String,
    /// Entry point to resolve.
    pub function: String,
}

/// Parameters of the `call` method.
///
/// Analysis calls carry the file path and base64 file bytes; static calls
/// carry neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallParams {
    /// Path of the analyzed file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Base64 file content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let request = JsonRpcRequest::new(1, "load", None);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"load\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_null_result_is_success() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert!(response.is_success());
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_error_kind_and_traceback() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": -32000,
                "message": "boom",
                "data": {"kind": "execution", "traceback": "Traceback...\nValueError: boom\n"}
            }
        }))
        .unwrap();

        let error = response.into_result().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert!(error.detailed_message().contains("Details:\nTraceback..."));
    }

    #[test]
    fn test_unknown_error_kind() {
        let data: ErrorData = serde_json::from_value(json!({"kind": "weird"})).unwrap();
        assert_eq!(data.kind, ErrorKind::Other);
    }

    #[test]
    fn test_static_call_params_are_empty() {
        let json = serde_json::to_string(&CallParams::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
