//! Thread outbox storage
//!
//! One row per (block, target peer) delivery still owed. Rows carry a
//! next-try timestamp and an attempt counter for exponential backoff.

use rusqlite::{Connection, params};

/// A pending direct delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRow {
    pub block_id: String,
    pub peer_id: String,
    pub next_try: i64,
    pub attempts: i64,
}

fn parse_outbox_row(row: &rusqlite::Row) -> rusqlite::Result<OutboxRow> {
    Ok(OutboxRow {
        block_id: row.get(0)?,
        peer_id: row.get(1)?,
        next_try: row.get(2)?,
        attempts: row.get(3)?,
    })
}

/// Enqueue a delivery. Re-enqueueing an existing pair is a no-op.
pub fn add_outbox_row(
    conn: &Connection,
    block_id: &str,
    peer_id: &str,
    next_try: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO thread_outbox (block_id, peer_id, next_try, attempts)
         VALUES (?1, ?2, ?3, 0)",
        params![block_id, peer_id, next_try],
    )?;
    Ok(())
}

/// Rows due at or before `now`, oldest first
pub fn list_due_outbox(conn: &Connection, now: i64) -> rusqlite::Result<Vec<OutboxRow>> {
    let mut stmt = conn.prepare(
        "SELECT block_id, peer_id, next_try, attempts FROM thread_outbox
         WHERE next_try <= ?1 ORDER BY next_try ASC",
    )?;
    let rows = stmt
        .query_map([now], parse_outbox_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All queued rows (diagnostics)
pub fn count_outbox(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM thread_outbox", [], |row| row.get(0))
}

/// Push a row's next attempt out and bump its counter
pub fn reschedule_outbox_row(
    conn: &Connection,
    block_id: &str,
    peer_id: &str,
    next_try: i64,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE thread_outbox SET next_try = ?1, attempts = attempts + 1
         WHERE block_id = ?2 AND peer_id = ?3",
        params![next_try, block_id, peer_id],
    )?;
    Ok(rows > 0)
}

/// Remove a completed or abandoned delivery
pub fn delete_outbox_row(conn: &Connection, block_id: &str, peer_id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM thread_outbox WHERE block_id = ?1 AND peer_id = ?2",
        params![block_id, peer_id],
    )?;
    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_memory_db;

    #[test]
    fn test_add_and_list_due() {
        let conn = start_memory_db().unwrap();
        add_outbox_row(&conn, "b1", "p1", 100).unwrap();
        add_outbox_row(&conn, "b1", "p2", 200).unwrap();

        let due = list_due_outbox(&conn, 150).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].peer_id, "p1");

        let due = list_due_outbox(&conn, 300).unwrap();
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn test_re_enqueue_is_noop() {
        let conn = start_memory_db().unwrap();
        add_outbox_row(&conn, "b1", "p1", 100).unwrap();
        add_outbox_row(&conn, "b1", "p1", 999).unwrap();

        let due = list_due_outbox(&conn, 100).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].next_try, 100);
    }

    #[test]
    fn test_reschedule_bumps_attempts() {
        let conn = start_memory_db().unwrap();
        add_outbox_row(&conn, "b1", "p1", 100).unwrap();

        assert!(reschedule_outbox_row(&conn, "b1", "p1", 500).unwrap());
        let rows = list_due_outbox(&conn, 500).unwrap();
        assert_eq!(rows[0].attempts, 1);
        assert_eq!(rows[0].next_try, 500);

        assert!(list_due_outbox(&conn, 400).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let conn = start_memory_db().unwrap();
        add_outbox_row(&conn, "b1", "p1", 100).unwrap();
        assert!(delete_outbox_row(&conn, "b1", "p1").unwrap());
        assert!(!delete_outbox_row(&conn, "b1", "p1").unwrap());
        assert_eq!(count_outbox(&conn).unwrap(), 0);
    }
}
