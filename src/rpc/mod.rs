//! JSON-RPC 2.0 stdio transport.

pub mod dispatch;
pub mod protocol;
pub mod tools;

use crate::core::config::Config;
use crate::core::store::Store;
use protocol::{Request, Response};
use serde_json::{json, Value};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "taskgraph";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const AGENT_CONFIG_URI: &str = "taskgraph://agent-config";

/// Handle one JSON-RPC request and produce its response, or `None` for
/// notifications (no `id`, no reply expected).
pub fn handle_request(store: &Store, config: &Config, req: Request) -> Option<Response> {
    let id = req.id.clone();
    let is_notification = id.is_none();

    let result = match req.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
        })),
        "notifications/initialized" => Ok(Value::Null),
        "tools/list" => Ok(tools::list_tools()),
        "tools/call" => handle_tools_call(store, config, &req.params),
        "resources/list" => Ok(json!({
            "resources": [{
                "uri": AGENT_CONFIG_URI,
                "name": "agent-config",
                "description": "the recommended system prompt for an agent driving this graph",
                "mimeType": "text/plain",
            }]
        })),
        "resources/read" => handle_resources_read(&req.params),
        other => Err((
            "method_not_found".to_string(),
            format!("unknown method '{other}'"),
        )),
    };

    if is_notification {
        return None;
    }
    let id = id.unwrap_or(Value::Null);
    Some(match result {
        Ok(value) => Response::ok(id, value),
        Err((code, message)) => Response::protocol_error(id, rpc_code(&code), message),
    })
}

fn handle_resources_read(params: &Value) -> Result<Value, (String, String)> {
    let uri = params
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| ("invalid_params".to_string(), "missing 'uri'".to_string()))?;
    if uri != AGENT_CONFIG_URI {
        return Err(("not_found".to_string(), format!("no such resource '{uri}'")));
    }
    Ok(json!({
        "contents": [{
            "uri": AGENT_CONFIG_URI,
            "mimeType": "text/plain",
            "text": dispatch::AGENT_PROMPT,
        }]
    }))
}

fn handle_tools_call(store: &Store, config: &Config, params: &Value) -> Result<Value, (String, String)> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ("invalid_params".to_string(), "missing 'name'".to_string()))?;
    if tools::find(name).is_none() {
        return Err((
            "method_not_found".to_string(),
            format!("unknown tool '{name}'"),
        ));
    }
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
    Ok(dispatch::call(store, config, name, &arguments))
}

/// Maps our small set of protocol-level failure reasons onto JSON-RPC's
/// standard error codes. Tool-level failures never reach here — they are
/// reported inside a successful `tools/call` result instead.
fn rpc_code(code: &str) -> i64 {
    match code {
        "method_not_found" => -32601,
        "invalid_params" => -32602,
        "not_found" => -32001,
        _ => -32000,
    }
}
