//! Low-level database connection primitives.

use crate::core::error::GraphError;
use rusqlite::Connection;
use std::path::Path;

/// Open a SQLite connection with the engine's standard configuration:
/// WAL journal mode, a 5s busy timeout, and foreign keys enforced.
///
/// This is the sole connection primitive; all mutation still goes through
/// `core::store::Store`, which serializes access behind a single mutex.
pub fn db_connect(db_path: &Path) -> Result<Connection, GraphError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Force a WAL checkpoint, truncating the WAL file back into the main
/// database. Invoked periodically by the RPC server's main loop.
pub fn checkpoint(conn: &Connection) -> Result<(), GraphError> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE);", [], |_| Ok(()))?;
    Ok(())
}
