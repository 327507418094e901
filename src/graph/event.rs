//! Append-only audit log.

use crate::core::error::GraphError;
use crate::core::time::{new_event_id, now_iso};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub node_id: Option<String>,
    pub agent: String,
    pub action: String,
    pub changes: Value,
    pub timestamp: String,
}

/// Append one event. Events are never updated or removed once written.
pub fn append(
    conn: &Connection,
    node_id: Option<&str>,
    agent: &str,
    action: &str,
    changes: Value,
) -> Result<Event, GraphError> {
    let event = Event {
        id: new_event_id(),
        node_id: node_id.map(|s| s.to_string()),
        agent: agent.to_string(),
        action: action.to_string(),
        changes,
        timestamp: now_iso(),
    };
    conn.execute(
        "INSERT INTO events (id, node_id, agent, action, changes, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            event.id,
            event.node_id,
            event.agent,
            event.action,
            event.changes.to_string(),
            event.timestamp,
        ],
    )?;
    Ok(event)
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let changes_raw: String = row.get(4)?;
    Ok(Event {
        id: row.get(0)?,
        node_id: row.get(1)?,
        agent: row.get(2)?,
        action: row.get(3)?,
        changes: serde_json::from_str(&changes_raw).unwrap_or(Value::Null),
        timestamp: row.get(5)?,
    })
}

/// Page through a node's history, most recent first. `cursor` is the id of
/// the last event seen on the previous page (exclusive).
pub fn history(
    conn: &Connection,
    node_id: &str,
    cursor: Option<&str>,
    limit: i64,
) -> Result<(Vec<Event>, Option<String>), GraphError> {
    // `timestamp` alone isn't unique: several events can land in the same
    // second, so the cursor compares `(timestamp, id)` as a pair to avoid
    // dropping same-second siblings of the anchor row across a page break.
    let anchor: Option<String> = match cursor {
        Some(id) => conn
            .query_row("SELECT timestamp FROM events WHERE id = ?1", [id], |r| {
                r.get(0)
            })
            .optional()?,
        None => None,
    };

    let mut stmt = match &anchor {
        Some(_) => conn.prepare(
            "SELECT id, node_id, agent, action, changes, timestamp FROM events \
             WHERE node_id = ?1 AND (timestamp < ?2 OR (timestamp = ?2 AND id < ?3)) \
             ORDER BY timestamp DESC, id DESC LIMIT ?4",
        )?,
        None => conn.prepare(
            "SELECT id, node_id, agent, action, changes, timestamp FROM events \
             WHERE node_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?,
    };

    let limit_fetch = limit + 1;
    let mut rows = match &anchor {
        Some(ts) => stmt.query(rusqlite::params![node_id, ts, cursor.unwrap(), limit_fetch])?,
        None => stmt.query(rusqlite::params![node_id, limit_fetch])?,
    };

    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(row_to_event(row)?);
    }

    let next_cursor = if events.len() as i64 > limit {
        events.truncate(limit as usize);
        events.last().map(|e| e.id.clone())
    } else {
        None
    };

    Ok((events, next_cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{db, schemas};
    use serde_json::json;
    use tempfile::tempdir;

    fn fresh_conn() -> Connection {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let conn = db::db_connect(&path).unwrap();
        for stmt in schemas::ALL_SCHEMA_STATEMENTS {
            conn.execute(stmt, []).unwrap();
        }
        std::mem::forget(dir);
        conn
    }

    #[test]
    fn append_and_history_round_trip() {
        let conn = fresh_conn();
        append(&conn, Some("n_1"), "agent-a", "created", json!({})).unwrap();
        append(&conn, Some("n_1"), "agent-a", "updated", json!({"summary": "x"})).unwrap();
        let (events, cursor) = history(&conn, "n_1", None, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "updated");
        assert!(cursor.is_none());
    }

    #[test]
    fn history_paginates() {
        let conn = fresh_conn();
        for i in 0..5 {
            append(&conn, Some("n_1"), "a", &format!("ev{i}"), json!({})).unwrap();
        }
        let (page1, cursor1) = history(&conn, "n_1", None, 2).unwrap();
        assert_eq!(page1.len(), 2);
        let cursor1 = cursor1.unwrap();
        let (page2, _) = history(&conn, "n_1", Some(&cursor1), 2).unwrap();
        assert_eq!(page2.len(), 2);
        assert_ne!(page1[1].id, page2[0].id);
    }
}
