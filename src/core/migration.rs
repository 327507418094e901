//! Idempotent schema migration.
//!
//! This crate has one schema generation: `apply` runs the full `CREATE
//! TABLE IF NOT EXISTS` set (harmless on an up-to-date database) and then
//! adds any columns introduced after the initial release via `PRAGMA
//! table_info` probes, so upgrading the binary in place never requires a
//! manual step.

use crate::core::error::GraphError;
use crate::core::time::now_iso;
use rusqlite::Connection;

/// Run all pending migrations. Safe to call on every startup.
pub fn apply(conn: &Connection) -> Result<(), GraphError> {
    add_column_if_missing(conn, "nodes", "depth", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "nodes", "rev", "INTEGER NOT NULL DEFAULT 1")?;
    backfill_depth(conn)?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, GraphError> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), GraphError> {
    if !column_exists(conn, table, column)? {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl);
        conn.execute(&sql, [])?;
    }
    Ok(())
}

/// Recompute `depth` for every node from its parent chain. Runs on every
/// startup; a no-op once all rows already carry the right value, since the
/// write is a plain `UPDATE ... WHERE depth != ?`.
fn backfill_depth(conn: &Connection) -> Result<(), GraphError> {
    let roots: Vec<String> = {
        let mut stmt = conn.prepare("SELECT id FROM nodes WHERE parent IS NULL")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    for root in roots {
        conn.execute(
            "UPDATE nodes SET depth = 0 WHERE id = ?1 AND depth != 0",
            [&root],
        )?;
        backfill_children(conn, &root, 0)?;
    }
    Ok(())
}

fn backfill_children(conn: &Connection, parent: &str, parent_depth: i64) -> Result<(), GraphError> {
    let children: Vec<String> = {
        let mut stmt = conn.prepare("SELECT id FROM nodes WHERE parent = ?1")?;
        let rows = stmt.query_map([parent], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    let depth = parent_depth + 1;
    for child in children {
        conn.execute(
            "UPDATE nodes SET depth = ?1 WHERE id = ?2 AND depth != ?1",
            rusqlite::params![depth, child],
        )?;
        backfill_children(conn, &child, depth)?;
    }
    Ok(())
}

/// Stamp a freshly created database with its creation time, used by `init`
/// to report when a graph was first set up.
pub fn stamp_creation(conn: &Connection) -> Result<(), GraphError> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM knowledge_log WHERE key = '__graph_created__'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)?;
    if exists {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO knowledge_log (id, project, key, action, agent, timestamp) VALUES (?1, '__system__', '__graph_created__', 'init', 'system', ?2)",
        rusqlite::params![crate::core::time::new_event_id(), now_iso()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use crate::core::schemas;
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
    fn apply_is_idempotent() {
        let conn = fresh_conn();
        apply(&conn).unwrap();
        apply(&conn).unwrap();
    }

    #[test]
    fn backfill_depth_computes_tree_depth() {
        let conn = fresh_conn();
        let now = now_iso();
        conn.execute(
            "INSERT INTO nodes (id, project, parent, summary, depth, created_at, updated_at) VALUES ('n_root','p',NULL,'root', 5, ?1, ?1)",
            [&now],
        ).unwrap();
        conn.execute(
            "INSERT INTO nodes (id, project, parent, summary, depth, created_at, updated_at) VALUES ('n_child','p','n_root','child', 9, ?1, ?1)",
            [&now],
        ).unwrap();
        apply(&conn).unwrap();
        let root_depth: i64 = conn
            .query_row("SELECT depth FROM nodes WHERE id='n_root'", [], |r| r.get(0))
            .unwrap();
        let child_depth: i64 = conn
            .query_row("SELECT depth FROM nodes WHERE id='n_child'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(root_depth, 0);
        assert_eq!(child_depth, 1);
    }
}
