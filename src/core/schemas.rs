//! Canonical SQL schema for the graph store.
//!
//! One database file, five tables — `nodes`, `edges`, `events`, `knowledge`,
//! `knowledge_log`.

pub const SCHEMA_NODES: &str = "
    CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        project TEXT NOT NULL,
        parent TEXT,
        summary TEXT NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0,
        blocked INTEGER NOT NULL DEFAULT 0,
        blocked_reason TEXT,
        discovery TEXT NOT NULL DEFAULT 'pending',
        properties TEXT NOT NULL DEFAULT '{}',
        context_links TEXT NOT NULL DEFAULT '[]',
        evidence TEXT NOT NULL DEFAULT '[]',
        plan TEXT,
        depth INTEGER NOT NULL DEFAULT 0,
        rev INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(parent) REFERENCES nodes(id)
    )
";

pub const SCHEMA_EDGES: &str = "
    CREATE TABLE IF NOT EXISTS edges (
        id TEXT PRIMARY KEY,
        from_node TEXT NOT NULL,
        to_node TEXT NOT NULL,
        type TEXT NOT NULL,
        agent TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        UNIQUE(from_node, to_node, type),
        FOREIGN KEY(from_node) REFERENCES nodes(id),
        FOREIGN KEY(to_node) REFERENCES nodes(id)
    )
";

pub const SCHEMA_EVENTS: &str = "
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        node_id TEXT,
        agent TEXT NOT NULL,
        action TEXT NOT NULL,
        changes TEXT NOT NULL DEFAULT '{}',
        timestamp TEXT NOT NULL
    )
";

pub const SCHEMA_KNOWLEDGE: &str = "
    CREATE TABLE IF NOT EXISTS knowledge (
        id TEXT PRIMARY KEY,
        project TEXT NOT NULL,
        key TEXT NOT NULL,
        content TEXT NOT NULL,
        category TEXT NOT NULL,
        source_node TEXT,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(project, key)
    )
";

pub const SCHEMA_KNOWLEDGE_LOG: &str = "
    CREATE TABLE IF NOT EXISTS knowledge_log (
        id TEXT PRIMARY KEY,
        project TEXT NOT NULL,
        key TEXT NOT NULL,
        action TEXT NOT NULL,
        agent TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )
";

pub const INDEX_NODES_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_nodes_project ON nodes(project)";
pub const INDEX_NODES_PARENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent)";
pub const INDEX_NODES_PROJECT_RESOLVED: &str =
    "CREATE INDEX IF NOT EXISTS idx_nodes_project_resolved ON nodes(project, resolved)";
pub const INDEX_NODES_PROJECT_UPDATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_nodes_project_updated ON nodes(project, updated_at)";
pub const INDEX_EDGES_FROM_TYPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_edges_from_type ON edges(from_node, type)";
pub const INDEX_EDGES_TO_TYPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_edges_to_type ON edges(to_node, type)";
pub const INDEX_EVENTS_NODE: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_node ON events(node_id)";
pub const INDEX_KNOWLEDGE_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_knowledge_project ON knowledge(project)";
pub const INDEX_KNOWLEDGE_LOG_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_knowledge_log_project ON knowledge_log(project)";

/// All DDL statements, in dependency order (tables before their indexes).
pub const ALL_SCHEMA_STATEMENTS: &[&str] = &[
    SCHEMA_NODES,
    SCHEMA_EDGES,
    SCHEMA_EVENTS,
    SCHEMA_KNOWLEDGE,
    SCHEMA_KNOWLEDGE_LOG,
    INDEX_NODES_PROJECT,
    INDEX_NODES_PARENT,
    INDEX_NODES_PROJECT_RESOLVED,
    INDEX_NODES_PROJECT_UPDATED,
    INDEX_EDGES_FROM_TYPE,
    INDEX_EDGES_TO_TYPE,
    INDEX_EVENTS_NODE,
    INDEX_KNOWLEDGE_PROJECT,
    INDEX_KNOWLEDGE_LOG_PROJECT,
];
