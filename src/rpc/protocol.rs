//! JSON-RPC 2.0 envelope — §6. Line-delimited, UTF-8, one object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn protocol_error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// A tool-level failure is NOT a JSON-RPC protocol error — it is a
/// successful envelope whose `result.content` carries the error.
pub fn tool_error_result(code: &str, message: &str) -> Value {
    serde_json::json!({
        "content": [{
            "type": "text",
            "text": serde_json::json!({"error": message, "code": code}).to_string(),
        }],
        "isError": true,
    })
}

pub fn tool_ok_result(value: Value) -> Value {
    serde_json::json!({
        "content": [{
            "type": "text",
            "text": value.to_string(),
        }],
        "isError": false,
    })
}
