use serde_json::json;
use taskgraph::core::config::Config;
use taskgraph::core::store::Store;
use taskgraph::rpc::{self, protocol::Request};
use tempfile::tempdir;

fn fresh() -> (Store, Config) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("graph.db");
    let store = Store::open(&db_path).unwrap();
    std::mem::forget(dir);
    let mut config = Config::from_env();
    config.db_path = db_path;
    (store, config)
}

#[test]
fn initialize_reports_server_info() {
    let (store, config) = fresh();
    let req = Request { jsonrpc: Some("2.0".into()), id: Some(json!(1)), method: "initialize".into(), params: json!({}) };
    let response = rpc::handle_request(&store, &config, req).unwrap();
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["serverInfo"]["name"], "taskgraph");
}

#[test]
fn notifications_produce_no_response() {
    let (store, config) = fresh();
    let req = Request { jsonrpc: Some("2.0".into()), id: None, method: "notifications/initialized".into(), params: json!({}) };
    assert!(rpc::handle_request(&store, &config, req).is_none());
}

#[test]
fn tools_list_includes_graph_plan() {
    let (store, config) = fresh();
    let req = Request { jsonrpc: Some("2.0".into()), id: Some(json!(2)), method: "tools/list".into(), params: json!({}) };
    let response = rpc::handle_request(&store, &config, req).unwrap();
    let tools = response.result.unwrap();
    let names: Vec<_> = tools["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"graph_plan"));
    assert!(names.contains(&"graph_resolve"));
}

#[test]
fn unknown_tool_name_is_a_protocol_error() {
    let (store, config) = fresh();
    let req = Request {
        jsonrpc: Some("2.0".into()),
        id: Some(json!(3)),
        method: "tools/call".into(),
        params: json!({"name": "graph_teleport", "arguments": {}}),
    };
    let response = rpc::handle_request(&store, &config, req).unwrap();
    assert!(response.error.is_some());
}

#[test]
fn tool_level_failure_is_a_successful_envelope_with_is_error() {
    let (store, config) = fresh();
    let req = Request {
        jsonrpc: Some("2.0".into()),
        id: Some(json!(4)),
        method: "tools/call".into(),
        params: json!({"name": "graph_plan", "arguments": {}}),
    };
    let response = rpc::handle_request(&store, &config, req).unwrap();
    assert!(response.error.is_none());
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
}

#[test]
fn resources_read_returns_the_agent_config_prompt() {
    let (store, config) = fresh();
    let list_req = Request { jsonrpc: Some("2.0".into()), id: Some(json!(7)), method: "resources/list".into(), params: json!({}) };
    let list_response = rpc::handle_request(&store, &config, list_req).unwrap();
    let resources = list_response.result.unwrap();
    let uri = resources["resources"][0]["uri"].as_str().unwrap().to_string();

    let read_req = Request { jsonrpc: Some("2.0".into()), id: Some(json!(8)), method: "resources/read".into(), params: json!({"uri": uri}) };
    let read_response = rpc::handle_request(&store, &config, read_req).unwrap();
    assert!(read_response.error.is_none());
    let contents = read_response.result.unwrap();
    assert!(contents["contents"][0]["text"].as_str().unwrap().contains("graph_next"));
}

#[test]
fn graph_plan_then_graph_next_round_trip_through_rpc() {
    let (store, config) = fresh();
    let plan_req = Request {
        jsonrpc: Some("2.0".into()),
        id: Some(json!(5)),
        method: "tools/call".into(),
        params: json!({
            "name": "graph_plan",
            "arguments": {
                "project": "demo",
                "nodes": [{"ref": "root", "summary": "root"}],
            }
        }),
    };
    let plan_response = rpc::handle_request(&store, &config, plan_req).unwrap();
    let plan_result = plan_response.result.unwrap();
    assert_eq!(plan_result["isError"], false);

    let next_req = Request {
        jsonrpc: Some("2.0".into()),
        id: Some(json!(6)),
        method: "tools/call".into(),
        params: json!({"name": "graph_next", "arguments": {"project": "demo", "count": 1}}),
    };
    let next_response = rpc::handle_request(&store, &config, next_req).unwrap();
    let next_result = next_response.result.unwrap();
    assert_eq!(next_result["isError"], false);
    let body: serde_json::Value = serde_json::from_str(next_result["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(body["tasks"].as_array().unwrap().len(), 1);
}
