//! Tool surface table.

use serde_json::{json, Value};

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: &'static [&'static str],
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec { name: "graph_open", description: "Lists or creates projects", required: &[] },
    ToolSpec { name: "graph_plan", description: "Create a batch of cross-referential nodes", required: &["nodes"] },
    ToolSpec { name: "graph_next", description: "Rank actionable nodes and optionally claim", required: &["project"] },
    ToolSpec { name: "graph_context", description: "Deep neighborhood read for a node", required: &["node_id"] },
    ToolSpec { name: "graph_update", description: "Apply a batch of node updates", required: &["updates"] },
    ToolSpec { name: "graph_connect", description: "Apply a batch of edge add/remove operations", required: &["edges"] },
    ToolSpec { name: "graph_query", description: "Filtered, sorted, paginated node search", required: &["project"] },
    ToolSpec { name: "graph_restructure", description: "Apply move/merge/drop/delete operations", required: &["operations"] },
    ToolSpec { name: "graph_history", description: "Paginated event history for a node", required: &["node_id"] },
    ToolSpec { name: "graph_onboard", description: "Orientation bundle for a new agent", required: &[] },
    ToolSpec { name: "graph_tree", description: "Full project tree", required: &["project"] },
    ToolSpec { name: "graph_status", description: "Markdown status render", required: &[] },
    ToolSpec { name: "graph_knowledge_write", description: "Upsert a knowledge entry", required: &["project", "key", "content", "category"] },
    ToolSpec { name: "graph_knowledge_read", description: "Read a knowledge entry", required: &["project", "key"] },
    ToolSpec { name: "graph_knowledge_delete", description: "Delete a knowledge entry", required: &["project", "key"] },
    ToolSpec { name: "graph_knowledge_search", description: "Search knowledge entries", required: &["project"] },
    ToolSpec { name: "graph_knowledge_audit", description: "Paginated knowledge mutation log", required: &["project"] },
    ToolSpec { name: "graph_retro", description: "Read or record a structured retrospective", required: &["project"] },
    ToolSpec { name: "graph_resolve", description: "Resolve a node with auto-attached evidence", required: &["node_id", "message"] },
    ToolSpec { name: "graph_agent_config", description: "Returns the agent prompt file", required: &[] },
];

pub fn tool_schema(spec: &ToolSpec) -> Value {
    let properties: Value = json!({});
    json!({
        "name": spec.name,
        "description": spec.description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": spec.required,
        }
    })
}

pub fn list_tools() -> Value {
    json!({ "tools": TOOLS.iter().map(tool_schema).collect::<Vec<_>>() })
}

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}
