//! Observability counters
//!
//! Monotonically incremented named counters. Increments are fire-and-forget
//! from the hot path: callers go through [`bump`], which swallows failures
//! after a warn log.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::Result;

/// Increment a counter by one, ignoring failure
pub fn bump(conn: &Connection, key: &str) {
    if let Err(e) = bump_by(conn, key, 1) {
        tracing::warn!(counter = key, "counter increment failed: {}", e);
    }
}

/// Increment a counter by `n`
pub fn bump_by(conn: &Connection, key: &str, n: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO observability_counters (key, value, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
             value = value + excluded.value,
             updated_at = excluded.updated_at",
        params![key, n, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Read a single counter (0 when absent)
pub fn get(conn: &Connection, key: &str) -> i64 {
    conn.query_row(
        "SELECT value FROM observability_counters WHERE key = ?",
        params![key],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// All counters, sorted by key
pub fn all(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt =
        conn.prepare("SELECT key, value FROM observability_counters ORDER BY key")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    #[test]
    fn test_bump_accumulates() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        bump(&conn, "memory.dedup_skipped");
        bump(&conn, "memory.dedup_skipped");
        bump_by(&conn, "memory.dedup_skipped.hash", 3).unwrap();

        assert_eq!(get(&conn, "memory.dedup_skipped"), 2);
        assert_eq!(get(&conn, "memory.dedup_skipped.hash"), 3);
        assert_eq!(get(&conn, "missing"), 0);
        assert_eq!(all(&conn).unwrap().len(), 2);
    }
}
