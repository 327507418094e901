//! Node repository: CRUD, tree walks, and the update/auto-resolve contract.
//!
//! All functions take a borrowed `Connection` so the mutation engine can run
//! several of them inside one transaction.

use crate::core::error::GraphError;
use crate::core::time::{new_node_id, now_iso};
use crate::graph::event;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub agent: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub project: String,
    pub parent: Option<String>,
    pub summary: String,
    pub resolved: bool,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub discovery: String,
    pub properties: Value,
    pub context_links: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub plan: Option<Vec<String>>,
    pub depth: i64,
    pub rev: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Node {
    pub fn is_strict(&self) -> bool {
        self.properties
            .get("strict")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn priority(&self) -> Option<f64> {
        self.properties.get("priority").and_then(Value::as_f64)
    }

    pub fn claimed_by(&self) -> Option<&str> {
        self.properties.get("_claimed_by").and_then(Value::as_str)
    }

    pub fn claimed_at(&self) -> Option<&str> {
        self.properties.get("_claimed_at").and_then(Value::as_str)
    }
}

pub(crate) fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
    let properties_raw: String = row.get("properties")?;
    let context_links_raw: String = row.get("context_links")?;
    let evidence_raw: String = row.get("evidence")?;
    let plan_raw: Option<String> = row.get("plan")?;
    Ok(Node {
        id: row.get("id")?,
        project: row.get("project")?,
        parent: row.get("parent")?,
        summary: row.get("summary")?,
        resolved: row.get::<_, i64>("resolved")? != 0,
        blocked: row.get::<_, i64>("blocked")? != 0,
        blocked_reason: row.get("blocked_reason")?,
        discovery: row.get("discovery")?,
        properties: serde_json::from_str(&properties_raw).unwrap_or(json!({})),
        context_links: serde_json::from_str(&context_links_raw).unwrap_or_default(),
        evidence: serde_json::from_str(&evidence_raw).unwrap_or_default(),
        plan: plan_raw.and_then(|s| serde_json::from_str(&s).ok()),
        depth: row.get("depth")?,
        rev: row.get("rev")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT_NODE: &str = "SELECT id, project, parent, summary, resolved, blocked, blocked_reason, \
     discovery, properties, context_links, evidence, plan, depth, rev, created_at, updated_at FROM nodes";

pub fn get(conn: &Connection, id: &str) -> Result<Option<Node>, GraphError> {
    let sql = format!("{SELECT_NODE} WHERE id = ?1");
    conn.query_row(&sql, [id], row_to_node)
        .optional()
        .map_err(GraphError::from)
}

pub fn get_or_throw(conn: &Connection, id: &str) -> Result<Node, GraphError> {
    get(conn, id)?.ok_or_else(|| GraphError::NotFound(format!("node {id} not found")))
}

#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub project: String,
    pub parent: Option<String>,
    pub summary: String,
    pub properties: Option<Value>,
    pub context_links: Option<Vec<String>>,
    pub discovery_override: Option<String>,
}

/// Create one node. Depth and discovery defaults are derived from the
/// parent; callers needing cross-batch discovery promotion (plan) adjust
/// `discovery` afterward.
pub fn create(conn: &Connection, new: NewNode, agent: &str) -> Result<Node, GraphError> {
    if new.summary.trim().is_empty() {
        return Err(GraphError::Validation("summary is required".to_string()));
    }

    let (depth, parent_id) = match &new.parent {
        None => (0, None),
        Some(parent_id) => {
            let parent = get_or_throw(conn, parent_id)?;
            if parent.project != new.project {
                return Err(GraphError::CrossProjectEdge(format!(
                    "parent {parent_id} belongs to project {}, not {}",
                    parent.project, new.project
                )));
            }
            if parent.discovery == "pending" {
                return Err(GraphError::DiscoveryPending(format!(
                    "parent {parent_id} has not recorded discovery yet"
                )));
            }
            (parent.depth + 1, Some(parent_id.clone()))
        }
    };

    let id = new_node_id();
    let now = now_iso();
    let discovery = new
        .discovery_override
        .unwrap_or_else(|| "pending".to_string());
    let properties = new.properties.unwrap_or(json!({}));
    let context_links = dedup(new.context_links.unwrap_or_default());

    conn.execute(
        "INSERT INTO nodes (id, project, parent, summary, resolved, blocked, blocked_reason, \
         discovery, properties, context_links, evidence, plan, depth, rev, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 0, 0, NULL, ?5, ?6, ?7, '[]', NULL, ?8, 1, ?9, ?9)",
        rusqlite::params![
            id,
            new.project,
            parent_id,
            new.summary,
            discovery,
            properties.to_string(),
            serde_json::to_string(&context_links).unwrap(),
            depth,
            now,
        ],
    )?;

    event::append(
        conn,
        Some(&id),
        agent,
        "created",
        json!({"summary": new.summary, "project": new.project}),
    )?;

    get_or_throw(conn, &id)
}

pub fn children_of(conn: &Connection, id: &str) -> Result<Vec<Node>, GraphError> {
    let sql = format!("{SELECT_NODE} WHERE parent = ?1 ORDER BY created_at ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([id], row_to_node)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(GraphError::from)
}

/// Ancestor chain, nearest parent first, root last.
pub fn ancestors_of(conn: &Connection, id: &str) -> Result<Vec<Node>, GraphError> {
    let sql = "
        WITH RECURSIVE chain(id, parent, depth_order) AS (
            SELECT parent, (SELECT parent FROM nodes WHERE id = n.parent), 0
            FROM nodes n WHERE n.id = ?1 AND n.parent IS NOT NULL
            UNION ALL
            SELECT n.parent, (SELECT parent FROM nodes WHERE id = n.parent), c.depth_order + 1
            FROM chain c JOIN nodes n ON n.id = c.id
            WHERE c.id IS NOT NULL
        )
        SELECT n.id, n.project, n.parent, n.summary, n.resolved, n.blocked, n.blocked_reason, \
               n.discovery, n.properties, n.context_links, n.evidence, n.plan, n.depth, n.rev, \
               n.created_at, n.updated_at
        FROM chain c JOIN nodes n ON n.id = c.id
        WHERE c.id IS NOT NULL
        ORDER BY c.depth_order ASC
    ";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([id], row_to_node)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(GraphError::from)
}

/// All descendants (children, grandchildren, ...), unordered.
pub fn descendants_of(conn: &Connection, id: &str) -> Result<Vec<Node>, GraphError> {
    let sql = "
        WITH RECURSIVE sub(id) AS (
            SELECT id FROM nodes WHERE parent = ?1
            UNION ALL
            SELECT n.id FROM nodes n JOIN sub s ON n.parent = s.id
        )
        SELECT n.id, n.project, n.parent, n.summary, n.resolved, n.blocked, n.blocked_reason, \
               n.discovery, n.properties, n.context_links, n.evidence, n.plan, n.depth, n.rev, \
               n.created_at, n.updated_at
        FROM sub s JOIN nodes n ON n.id = s.id
    ";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([id], row_to_node)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(GraphError::from)
}

pub fn project_root(conn: &Connection, project: &str) -> Result<Option<Node>, GraphError> {
    let sql = format!("{SELECT_NODE} WHERE project = ?1 AND parent IS NULL");
    conn.query_row(&sql, [project], row_to_node)
        .optional()
        .map_err(GraphError::from)
}

pub fn list_projects(conn: &Connection) -> Result<Vec<String>, GraphError> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT project FROM nodes WHERE parent IS NULL ORDER BY project")?;
    let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(GraphError::from)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project: String,
    pub total: i64,
    pub resolved: i64,
    pub blocked: i64,
}

pub fn project_summary(conn: &Connection, project: &str) -> Result<ProjectSummary, GraphError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE project = ?1",
        [project],
        |r| r.get(0),
    )?;
    let resolved: i64 = conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE project = ?1 AND resolved = 1",
        [project],
        |r| r.get(0),
    )?;
    let blocked: i64 = conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE project = ?1 AND blocked = 1",
        [project],
        |r| r.get(0),
    )?;
    Ok(ProjectSummary {
        project: project.to_string(),
        total,
        resolved,
        blocked,
    })
}

pub fn has_unresolved_children(conn: &Connection, id: &str) -> Result<bool, GraphError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE parent = ?1 AND resolved = 0",
        [id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

/// Merge a patch object into `existing`. A `null` value deletes the key.
pub fn merge_properties(existing: &Value, patch: &Value) -> Value {
    let mut base = existing.as_object().cloned().unwrap_or_default();
    if let Some(patch_obj) = patch.as_object() {
        for (k, v) in patch_obj {
            if v.is_null() {
                base.remove(k);
            } else {
                base.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(base)
}

/// The fields an `update` call may change on one node.
#[derive(Debug, Clone, Default)]
pub struct UpdatePatch {
    pub summary: Option<String>,
    pub properties: Option<Value>,
    pub add_context_links: Option<Vec<String>>,
    pub add_evidence: Option<Vec<Evidence>>,
    pub plan: Option<Vec<String>>,
    pub resolved: Option<bool>,
    pub resolved_reason: Option<String>,
    pub blocked: Option<bool>,
    pub blocked_reason: Option<String>,
    pub expected_rev: Option<i64>,
}

/// Apply one update in place, enforcing invariants 5-7 and strict mode, and
/// cascading auto-resolve up the parent chain when this mutation resolves
/// the node. Returns the updated node plus every ancestor that was
/// auto-resolved as a side effect (nearest first).
pub fn apply_update(
    conn: &Connection,
    id: &str,
    patch: UpdatePatch,
    agent: &str,
) -> Result<(Node, Vec<Node>), GraphError> {
    let current = get_or_throw(conn, id)?;

    if let Some(expected) = patch.expected_rev {
        if expected != current.rev {
            return Err(GraphError::RevMismatch(format!(
                "node {id}: expected rev {expected}, found {}",
                current.rev
            )));
        }
    }

    let mut properties = current.properties.clone();
    if let Some(patch_props) = &patch.properties {
        properties = merge_properties(&properties, patch_props);
    }

    let mut context_links = current.context_links.clone();
    if let Some(add) = &patch.add_context_links {
        context_links.extend(add.iter().cloned());
        context_links = dedup(context_links);
    }

    let mut evidence = current.evidence.clone();
    if let Some(reason) = &patch.resolved_reason {
        evidence.insert(
            0,
            Evidence {
                kind: "note".to_string(),
                reference: reason.clone(),
                agent: agent.to_string(),
                timestamp: now_iso(),
            },
        );
    }
    if let Some(add) = &patch.add_evidence {
        for e in add {
            if !evidence.contains(e) {
                evidence.push(e.clone());
            }
        }
    }

    let summary = patch.summary.clone().unwrap_or(current.summary.clone());

    let mut blocked = current.blocked;
    let mut blocked_reason = current.blocked_reason.clone();
    if let Some(new_blocked) = patch.blocked {
        if new_blocked && !current.blocked {
            let reason = patch
                .blocked_reason
                .clone()
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| {
                    GraphError::BlockedRequiresReason(format!(
                        "node {id}: blocking requires a non-empty reason"
                    ))
                })?;
            blocked = true;
            blocked_reason = Some(reason);
        } else if !new_blocked {
            blocked = false;
            blocked_reason = None;
        } else if let Some(reason) = &patch.blocked_reason {
            if reason.trim().is_empty() {
                return Err(GraphError::BlockedRequiresReason(format!(
                    "node {id}: blocked_reason cannot be cleared while blocked"
                )));
            }
            blocked_reason = Some(reason.clone());
        }
    } else if let Some(reason) = &patch.blocked_reason {
        if current.blocked {
            blocked_reason = Some(reason.clone());
        }
    }

    let resolved = patch.resolved.unwrap_or(current.resolved);
    let becoming_resolved = resolved && !current.resolved;

    if resolved && evidence.is_empty() {
        return Err(GraphError::ResolveRequiresEvidence(format!(
            "node {id}: resolving requires at least one evidence record"
        )));
    }

    if becoming_resolved {
        let root = root_of(conn, &current)?;
        if root.is_strict() {
            let has_strong_evidence = evidence
                .iter()
                .any(|e| e.kind == "git" || e.kind == "test");
            if !has_strong_evidence || context_links.is_empty() {
                return Err(GraphError::ResolveRequiresEvidence(format!(
                    "node {id}: strict mode requires git/test evidence and a context link"
                )));
            }
        }
    }

    let plan = patch.plan.clone().or(current.plan.clone());
    let now = now_iso();
    let new_rev = current.rev + 1;

    conn.execute(
        "UPDATE nodes SET summary = ?1, resolved = ?2, blocked = ?3, blocked_reason = ?4, \
         properties = ?5, context_links = ?6, evidence = ?7, plan = ?8, rev = ?9, updated_at = ?10 \
         WHERE id = ?11",
        rusqlite::params![
            summary,
            resolved as i64,
            blocked as i64,
            blocked_reason,
            properties.to_string(),
            serde_json::to_string(&context_links).unwrap(),
            serde_json::to_string(&evidence).unwrap(),
            plan.as_ref().map(|p| serde_json::to_string(p).unwrap()),
            new_rev,
            now,
        ],
    )?;

    let changes = json!({
        "resolved": resolved,
        "blocked": blocked,
        "rev": new_rev,
    });
    let action = if becoming_resolved { "resolved" } else { "updated" };
    event::append(conn, Some(id), agent, action, changes)?;

    let updated = get_or_throw(conn, id)?;
    let mut auto_resolved = Vec::new();
    if becoming_resolved {
        auto_resolved = cascade_auto_resolve(conn, &updated, agent)?;
    }

    Ok((updated, auto_resolved))
}

fn root_of(conn: &Connection, node: &Node) -> Result<Node, GraphError> {
    project_root(conn, &node.project)?
        .ok_or_else(|| GraphError::ProjectNotFound(node.project.clone()))
}

/// Walk up from `node`'s parent, auto-resolving each ancestor whose children
/// are all resolved and whose `depends_on` targets are all resolved.
/// Iterative, bounded by tree depth.
fn cascade_auto_resolve(
    conn: &Connection,
    node: &Node,
    agent: &str,
) -> Result<Vec<Node>, GraphError> {
    let mut resolved_chain = Vec::new();
    let mut current_parent = node.parent.clone();

    while let Some(parent_id) = current_parent {
        let parent = get_or_throw(conn, &parent_id)?;
        if parent.resolved {
            break;
        }
        if has_unresolved_children(conn, &parent_id)? {
            break;
        }
        if !crate::graph::edge::depends_on_satisfied(conn, &parent_id)? {
            break;
        }

        let mut evidence = parent.evidence.clone();
        evidence.push(Evidence {
            kind: "note".to_string(),
            reference: "auto-resolved: all children complete".to_string(),
            agent: agent.to_string(),
            timestamp: now_iso(),
        });
        let new_rev = parent.rev + 1;
        let now = now_iso();
        conn.execute(
            "UPDATE nodes SET resolved = 1, evidence = ?1, rev = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![serde_json::to_string(&evidence).unwrap(), new_rev, now, parent_id],
        )?;
        event::append(
            conn,
            Some(&parent_id),
            agent,
            "resolved",
            json!({"auto_resolved": true, "rev": new_rev}),
        )?;

        let updated_parent = get_or_throw(conn, &parent_id)?;
        current_parent = updated_parent.parent.clone();
        resolved_chain.push(updated_parent);
    }

    Ok(resolved_chain)
}
