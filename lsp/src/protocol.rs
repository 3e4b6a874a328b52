//! JSON-RPC wire types exchanged with the worker.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Method the NetLinx language server answers with its active log file path.
pub const DEFAULT_LOG_PATH_METHOD: &str = "netlinx/serverLogPath";

/// JSON-RPC "method not found", sent back for worker-initiated requests.
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Error payload of a JSON-RPC response, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub(crate) enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    WorkerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
    },
}

pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(serde_json::Value::as_str)
        .map(String::from);
    let is_response = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_response) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::WorkerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification { method }),
        _ => None,
    }
}

pub(crate) fn method_not_found(id: serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// Split a response body into its result or its error payload.
///
/// An absent `result` is read as `null`.
pub(crate) fn into_result(body: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let serde_json::Value::Object(mut map) = body else {
        return Ok(serde_json::Value::Null);
    };
    if let Some(error) = map.remove("error") {
        return Err(serde_json::from_value(error.clone()).unwrap_or_else(|_| RpcError {
            code: 0,
            message: error.to_string(),
            data: None,
        }));
    }
    Ok(map.remove("result").unwrap_or(serde_json::Value::Null))
}

pub(crate) fn initialize_params(root: &Path) -> serde_json::Value {
    let root_uri = url::Url::from_directory_path(root)
        .map(String::from)
        .ok();
    let folders = root_uri.as_ref().map(|uri| {
        serde_json::json!([{
            "uri": uri,
            "name": root
                .file_name()
                .map_or_else(|| "workspace".into(), |n| n.to_string_lossy())
        }])
    });
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {},
        "workspaceFolders": folders,
    })
}
