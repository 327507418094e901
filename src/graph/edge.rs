//! Edge repository: typed relations, cycle detection, actionability.

use crate::core::error::GraphError;
use crate::core::time::{new_edge_id, now_iso};
use crate::graph::{event, node};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub agent: String,
    pub timestamp: String,
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        kind: row.get(3)?,
        agent: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

const SELECT_EDGE: &str = "SELECT id, from_node, to_node, type, agent, timestamp FROM edges";

pub fn edges_from(conn: &Connection, node_id: &str) -> Result<Vec<Edge>, GraphError> {
    let sql = format!("{SELECT_EDGE} WHERE from_node = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([node_id], row_to_edge)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(GraphError::from)
}

pub fn edges_to(conn: &Connection, node_id: &str) -> Result<Vec<Edge>, GraphError> {
    let sql = format!("{SELECT_EDGE} WHERE to_node = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([node_id], row_to_edge)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(GraphError::from)
}

fn edge_exists(
    conn: &Connection,
    from: &str,
    to: &str,
    kind: &str,
) -> Result<bool, GraphError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM edges WHERE from_node = ?1 AND to_node = ?2 AND type = ?3",
        rusqlite::params![from, to, kind],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// `true` if `to` can already reach `from` via `depends_on` edges — i.e.
/// adding `from -> to` would close a cycle.
fn reaches(conn: &Connection, start: &str, target: &str, kind: &str) -> Result<bool, GraphError> {
    let mut stack = vec![start.to_string()];
    let mut seen: rustc_hash::FxHashSet<String> = rustc_hash::FxHashSet::default();
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        if current == target {
            return Ok(true);
        }
        let mut stmt =
            conn.prepare("SELECT to_node FROM edges WHERE from_node = ?1 AND type = ?2")?;
        let next: Vec<String> = stmt
            .query_map(rusqlite::params![current, kind], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        stack.extend(next);
    }
    Ok(false)
}

pub fn add_edge(
    conn: &Connection,
    from: &str,
    to: &str,
    kind: &str,
    agent: &str,
) -> Result<Edge, GraphError> {
    if kind == "parent" {
        return Err(GraphError::Validation(
            "edge type 'parent' is reserved for tree ownership".to_string(),
        ));
    }

    let from_node = node::get_or_throw(conn, from)?;
    let to_node = node::get_or_throw(conn, to)?;
    if from_node.project != to_node.project {
        return Err(GraphError::CrossProjectEdge(format!(
            "edge {from} -> {to} crosses project boundary"
        )));
    }
    if edge_exists(conn, from, to, kind)? {
        return Err(GraphError::DuplicateEdge(format!(
            "edge {from} -> {to} ({kind}) already exists"
        )));
    }
    if kind == "depends_on" && reaches(conn, to, from, "depends_on")? {
        return Err(GraphError::CycleDetected(format!(
            "edge {from} -> {to} would close a depends_on cycle"
        )));
    }

    let id = new_edge_id();
    let now = now_iso();
    conn.execute(
        "INSERT INTO edges (id, from_node, to_node, type, agent, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, from, to, kind, agent, now],
    )?;
    event::append(
        conn,
        Some(from),
        agent,
        "edge_added",
        serde_json::json!({"to": to, "type": kind}),
    )?;

    Ok(Edge {
        id,
        from: from.to_string(),
        to: to.to_string(),
        kind: kind.to_string(),
        agent: agent.to_string(),
        timestamp: now,
    })
}

pub fn remove_edge(
    conn: &Connection,
    from: &str,
    to: &str,
    kind: &str,
    agent: &str,
) -> Result<(), GraphError> {
    let changed = conn.execute(
        "DELETE FROM edges WHERE from_node = ?1 AND to_node = ?2 AND type = ?3",
        rusqlite::params![from, to, kind],
    )?;
    if changed == 0 {
        return Err(GraphError::NotFound(format!(
            "edge {from} -> {to} ({kind}) does not exist"
        )));
    }
    event::append(
        conn,
        Some(from),
        agent,
        "edge_removed",
        serde_json::json!({"to": to, "type": kind}),
    )?;
    Ok(())
}

/// All `depends_on` targets of `node_id` are resolved (vacuously true if
/// there are none).
pub fn depends_on_satisfied(conn: &Connection, node_id: &str) -> Result<bool, GraphError> {
    let unresolved: i64 = conn.query_row(
        "SELECT COUNT(*) FROM edges e JOIN nodes n ON n.id = e.to_node \
         WHERE e.from_node = ?1 AND e.type = 'depends_on' AND n.resolved = 0",
        [node_id],
        |r| r.get(0),
    )?;
    Ok(unresolved == 0)
}

pub fn is_actionable(conn: &Connection, id: &str) -> Result<bool, GraphError> {
    let n = node::get_or_throw(conn, id)?;
    if n.resolved || n.blocked {
        return Ok(false);
    }
    if node::has_unresolved_children(conn, id)? {
        return Ok(false);
    }
    depends_on_satisfied(conn, id)
}

/// Direct children of each resolved id, and sources of `depends_on` edges
/// pointing at each resolved id, filtered down to the ones now actionable.
pub fn find_newly_actionable(
    conn: &Connection,
    resolved_ids: &[String],
) -> Result<Vec<String>, GraphError> {
    let mut candidates: rustc_hash::FxHashSet<String> = rustc_hash::FxHashSet::default();

    for id in resolved_ids {
        for child in node::children_of(conn, id)? {
            candidates.insert(child.id);
        }
        for edge in edges_to(conn, id)? {
            if edge.kind == "depends_on" {
                candidates.insert(edge.from);
            }
        }
    }

    let mut out = Vec::new();
    for candidate in candidates {
        if is_actionable(conn, &candidate)? {
            out.push(candidate);
        }
    }
    out.sort();
    Ok(out)
}
