//! Store abstraction: the single connection handle shared by every caller.
//!
//! One process, one database file, one connection, guarded by a single
//! mutex. Every mutation goes through `Store::with_conn`, a single thin
//! waist in place of one broker per subsystem database.

use crate::core::{db, error::GraphError, migration, schemas};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct Store {
    pub path: PathBuf,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the graph database at `path`, apply the
    /// schema, and run any pending migrations.
    pub fn open(path: &Path) -> Result<Self, GraphError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = db::db_connect(path)?;
        for stmt in schemas::ALL_SCHEMA_STATEMENTS {
            conn.execute(stmt, [])?;
        }
        migration::apply(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection. All mutation engine
    /// calls go through here; a single mutex is sufficient since SQLite
    /// already serializes writers and the process owns one connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| GraphError::Engine("store mutex poisoned".to_string()))?;
        f(&conn)
    }

    pub fn checkpoint(&self) -> Result<(), GraphError> {
        self.with_conn(|conn| db::checkpoint(conn))
    }

    /// Run `f` inside one transaction. Every mutation handler (`plan`,
    /// `update`, `connect`, `restructure`) opens exactly one; a returned
    /// error rolls the whole batch back.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        self.with_conn(|conn| {
            conn.execute("BEGIN IMMEDIATE", [])?;
            match f(conn) {
                Ok(value) => {
                    conn.execute("COMMIT", [])?;
                    Ok(value)
                }
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_db_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        store.checkpoint().unwrap();
    }

    #[test]
    fn with_conn_runs_query() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store = Store::open(&path).unwrap();
        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
                    .map_err(GraphError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store = Store::open(&path).unwrap();
        let result: Result<(), GraphError> = store.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO knowledge_log (id, project, key, action, agent, timestamp) VALUES ('x','p','k','write','a','t')",
                [],
            )?;
            Err(GraphError::Engine("boom".to_string()))
        });
        assert!(result.is_err());
        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM knowledge_log", [], |row| row.get(0))
                    .map_err(GraphError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
