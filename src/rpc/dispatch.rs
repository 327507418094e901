//! Routes a validated `tools/call` onto the engine and wraps the outcome in
//! the `{content, isError}` tool-result envelope.

use crate::core::config::Config;
use crate::core::error::GraphError;
use crate::core::store::Store;
use crate::core::time::now_iso;
use crate::engine::{continuity, knowledge, mutation, query, scheduler};
use crate::graph::{edge, event, node};
use crate::rpc::protocol::{tool_error_result, tool_ok_result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

fn field<T: DeserializeOwned>(args: &Value, key: &str) -> Result<T, GraphError> {
    let v = args.get(key).cloned().ok_or_else(|| {
        GraphError::Validation(format!("missing required field '{key}'"))
    })?;
    serde_json::from_value(v)
        .map_err(|e| GraphError::Validation(format!("field '{key}' is malformed: {e}")))
}

fn field_opt<T: DeserializeOwned>(args: &Value, key: &str) -> Result<Option<T>, GraphError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| GraphError::Validation(format!("field '{key}' is malformed: {e}"))),
    }
}

pub fn call(store: &Store, config: &Config, name: &str, args: &Value) -> Value {
    let outcome = dispatch(store, config, name, args);
    match outcome {
        Ok(value) => tool_ok_result(value),
        Err(e) => tool_error_result(e.code(), &e.to_string()),
    }
}

fn dispatch(store: &Store, config: &Config, name: &str, args: &Value) -> Result<Value, GraphError> {
    match name {
        "graph_open" => graph_open(store, args),
        "graph_plan" => graph_plan(store, config, args),
        "graph_next" => graph_next(store, config, args),
        "graph_context" => graph_context(store, args),
        "graph_update" => graph_update(store, config, args),
        "graph_connect" => graph_connect(store, config, args),
        "graph_query" => graph_query(store, args),
        "graph_restructure" => graph_restructure(store, config, args),
        "graph_history" => graph_history(store, args),
        "graph_onboard" => graph_onboard(store),
        "graph_tree" => graph_tree(store, args),
        "graph_status" => graph_status(store),
        "graph_knowledge_write" => graph_knowledge_write(store, config, args),
        "graph_knowledge_read" => graph_knowledge_read(store, args),
        "graph_knowledge_delete" => graph_knowledge_delete(store, config, args),
        "graph_knowledge_search" => graph_knowledge_search(store, args),
        "graph_knowledge_audit" => graph_knowledge_audit(store, args),
        "graph_retro" => graph_retro(store, config, args),
        "graph_resolve" => graph_resolve(store, config, args),
        "graph_agent_config" => graph_agent_config(),
        other => Err(GraphError::Validation(format!("unknown tool '{other}'"))),
    }
}

fn graph_open(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let project: Option<String> = field_opt(args, "project")?;
    match project {
        Some(project) => {
            let summary: String = field_opt(args, "summary")?.unwrap_or_else(|| project.clone());
            let created = store.with_transaction(|conn| {
                if node::project_root(conn, &project)?.is_some() {
                    return Err(GraphError::Validation(format!(
                        "project '{project}' already exists"
                    )));
                }
                node::create(
                    conn,
                    node::NewNode {
                        project: project.clone(),
                        summary,
                        discovery_override: Some("pending".to_string()),
                        ..Default::default()
                    },
                    "system",
                )
            })?;
            Ok(serde_json::to_value(created).unwrap())
        }
        None => {
            let projects = store.with_conn(|conn| {
                let names = node::list_projects(conn)?;
                names
                    .into_iter()
                    .map(|p| node::project_summary(conn, &p))
                    .collect::<Result<Vec<_>, _>>()
            })?;
            Ok(json!({ "projects": projects }))
        }
    }
}

fn graph_plan(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let nodes: Vec<mutation::PlanNodeInput> = field(args, "nodes")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    let result = mutation::plan(store, &project, nodes, &agent)?;
    Ok(serde_json::to_value(result).unwrap())
}

fn graph_next(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let scope: Option<String> = field_opt(args, "scope")?;
    let filter: Option<Value> = field_opt(args, "filter")?;
    let count: i64 = field_opt(args, "count")?.unwrap_or(1);
    let claim: bool = field_opt(args, "claim")?.unwrap_or(false);
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());

    let result = scheduler::next(
        store,
        scheduler::NextRequest {
            project: &project,
            scope: scope.as_deref(),
            filter: filter.as_ref(),
            count,
            claim,
            agent: &agent,
            claim_ttl: config.claim_ttl,
        },
    )?;
    Ok(serde_json::to_value(result).unwrap())
}

fn graph_context(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let node_id: String = field(args, "node_id")?;
    store.with_conn(|conn| {
        let n = node::get_or_throw(conn, &node_id)?;
        let ancestors = node::ancestors_of(conn, &node_id)?;
        let children = node::children_of(conn, &node_id)?;
        let depends_on = edge::edges_from(conn, &node_id)?
            .into_iter()
            .filter(|e| e.kind == "depends_on")
            .collect::<Vec<_>>();
        let dependents = edge::edges_to(conn, &node_id)?
            .into_iter()
            .filter(|e| e.kind == "depends_on")
            .collect::<Vec<_>>();
        Ok(json!({
            "node": n,
            "ancestors": ancestors,
            "children": children,
            "depends_on": depends_on,
            "dependents": dependents,
        }))
    })
}

fn graph_update(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let updates: Vec<mutation::UpdateInput> = field(args, "updates")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    let result = mutation::update(store, updates, &agent)?;
    Ok(serde_json::to_value(result).unwrap())
}

fn graph_connect(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let edges: Vec<mutation::EdgeOp> = field(args, "edges")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    let result = mutation::connect(store, edges, &agent)?;
    Ok(serde_json::to_value(result).unwrap())
}

fn graph_query(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let filter: query::QueryFilter = field_opt(args, "filter")?.unwrap_or_default();
    let sort: query::SortMode = field_opt(args, "sort")?.unwrap_or_default();
    let cursor: Option<String> = field_opt(args, "cursor")?;
    let limit: i64 = field_opt(args, "limit")?.unwrap_or(20);
    let result = query::query(store, &project, filter, sort, cursor.as_deref(), limit)?;
    Ok(serde_json::to_value(result).unwrap())
}

fn graph_restructure(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let operations: Vec<mutation::RestructureOp> = field(args, "operations")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    let result = mutation::restructure(store, operations, &agent)?;
    Ok(serde_json::to_value(result).unwrap())
}

fn graph_history(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let node_id: String = field(args, "node_id")?;
    let cursor: Option<String> = field_opt(args, "cursor")?;
    let limit: i64 = field_opt(args, "limit")?.unwrap_or(20);
    let (events, next_cursor) =
        store.with_conn(|conn| event::history(conn, &node_id, cursor.as_deref(), limit))?;
    Ok(json!({ "events": events, "next_cursor": next_cursor }))
}

fn graph_onboard(store: &Store) -> Result<Value, GraphError> {
    store.with_conn(|conn| {
        let projects = node::list_projects(conn)?;
        let summaries = projects
            .iter()
            .map(|p| node::project_summary(conn, p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({
            "projects": summaries,
            "categories": ["general", "architecture", "convention", "decision", "environment", "api-contract", "discovery"],
            "hint": "call graph_next with a project to get your first task",
        }))
    })
}

fn graph_tree(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    store.with_conn(|conn| {
        let root = node::project_root(conn, &project)?
            .ok_or_else(|| GraphError::ProjectNotFound(project.clone()))?;
        build_tree(conn, &root)
    })
}

fn build_tree(conn: &rusqlite::Connection, n: &node::Node) -> Result<Value, GraphError> {
    let children = node::children_of(conn, &n.id)?;
    let child_trees = children
        .iter()
        .map(|c| build_tree(conn, c))
        .collect::<Result<Vec<_>, _>>()?;
    let mut value = serde_json::to_value(n).unwrap();
    value["children"] = Value::Array(child_trees);
    Ok(value)
}

fn graph_status(store: &Store) -> Result<Value, GraphError> {
    let projects = store.with_conn(node::list_projects)?;
    let mut md = String::from("# Graph status\n\n");
    for p in &projects {
        let summary = store.with_conn(|conn| node::project_summary(conn, p))?;
        let report = continuity::continuity(store, p)?;
        let audit = continuity::integrity(store, p)?;
        md.push_str(&format!(
            "## {}\n- total: {}\n- resolved: {}\n- blocked: {}\n- continuity: {} ({:?})\n- open issues: {}\n- quality kpi: {:.0}%\n\n",
            summary.project,
            summary.total,
            summary.resolved,
            summary.blocked,
            report.score,
            report.confidence,
            audit.issues.len(),
            audit.quality_kpi,
        ));
    }
    Ok(json!({ "markdown": md }))
}

fn graph_knowledge_write(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let key: String = field(args, "key")?;
    let content: String = field(args, "content")?;
    let category: String = field(args, "category")?;
    let source_node: Option<String> = field_opt(args, "source_node")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    let result = knowledge::write(store, &project, &key, &content, &category, source_node, &agent)?;
    Ok(serde_json::to_value(result).unwrap())
}

fn graph_knowledge_read(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let key: String = field(args, "key")?;
    let entry = knowledge::read(store, &project, &key)?;
    Ok(json!({ "entry": entry }))
}

fn graph_knowledge_delete(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let key: String = field(args, "key")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    knowledge::delete(store, &project, &key, &agent)?;
    Ok(json!({ "deleted": true }))
}

fn graph_knowledge_search(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let text: String = field_opt(args, "text")?.unwrap_or_default();
    let category: Option<String> = field_opt(args, "category")?;
    let entries = knowledge::search(store, &project, &text, category.as_deref())?;
    Ok(json!({ "entries": entries }))
}

fn graph_knowledge_audit(store: &Store, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let limit: i64 = field_opt(args, "limit")?.unwrap_or(50);
    let entries = knowledge::audit(store, &project, limit)?;
    Ok(json!({ "entries": entries }))
}

fn graph_retro(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let project: String = field(args, "project")?;
    let scope: Option<String> = field_opt(args, "scope")?;
    let findings: Option<Vec<knowledge::RetroFinding>> = field_opt(args, "findings")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    match knowledge::retro(store, &project, scope.as_deref(), findings, &agent)? {
        knowledge::RetroOutcome::Context(c) => Ok(serde_json::to_value(c).unwrap()),
        knowledge::RetroOutcome::Recorded(r) => Ok(serde_json::to_value(r).unwrap()),
    }
}

fn graph_resolve(store: &Store, config: &Config, args: &Value) -> Result<Value, GraphError> {
    let node_id: String = field(args, "node_id")?;
    let message: String = field(args, "message")?;
    let agent: String = field_opt(args, "agent")?.unwrap_or_else(|| config.agent.clone());
    let result = mutation::update(
        store,
        vec![mutation::UpdateInput {
            node_id,
            summary: None,
            properties: None,
            add_context_links: vec![],
            add_evidence: vec![],
            plan: None,
            resolved: Some(true),
            resolved_reason: Some(message),
            blocked: None,
            blocked_reason: None,
            expected_rev: None,
        }],
        &agent,
    )?;
    Ok(serde_json::to_value(result).unwrap())
}

pub const AGENT_PROMPT: &str = "\
You are working against a persistent task graph. Call graph_next to find \
what to work on, graph_update or graph_resolve to record progress, and \
graph_knowledge_write to leave durable notes for the next agent.";

fn graph_agent_config() -> Result<Value, GraphError> {
    Ok(json!({ "prompt": AGENT_PROMPT, "generated_at": now_iso() }))
}
