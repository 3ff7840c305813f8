//! Thread, thread-peer, and pending-message storage

use rusqlite::{Connection, OptionalExtension, params};

/// A thread record
///
/// `id` is the base58 peer id derived from the thread secret `sk`; `head`
/// is the multihash of the most recent local block, empty before JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRow {
    pub id: String,
    pub name: String,
    pub sk: Vec<u8>,
    pub head: String,
}

/// A peer observed in a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPeer {
    pub peer_id: String,
    pub thread_id: String,
    /// Whether this node has sent the peer a WELCOME
    pub welcomed: bool,
}

/// A received-but-not-yet-processed encrypted thread envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub id: String,
    pub peer_id: String,
    pub envelope: Vec<u8>,
    pub date: i64,
}

fn parse_thread_row(row: &rusqlite::Row) -> rusqlite::Result<ThreadRow> {
    Ok(ThreadRow {
        id: row.get(0)?,
        name: row.get(1)?,
        sk: row.get(2)?,
        head: row.get(3)?,
    })
}

// ============ Threads ============

/// Add a thread
pub fn add_thread(conn: &Connection, thread: &ThreadRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO threads (id, name, sk, head) VALUES (?1, ?2, ?3, ?4)",
        params![thread.id, thread.name, thread.sk, thread.head],
    )?;
    Ok(())
}

/// Get a thread by id
pub fn get_thread(conn: &Connection, id: &str) -> rusqlite::Result<Option<ThreadRow>> {
    conn.query_row(
        "SELECT id, name, sk, head FROM threads WHERE id = ?1",
        [id],
        parse_thread_row,
    )
    .optional()
}

/// Get a thread by its secret key bytes
pub fn get_thread_by_key(conn: &Connection, sk: &[u8]) -> rusqlite::Result<Option<ThreadRow>> {
    conn.query_row(
        "SELECT id, name, sk, head FROM threads WHERE sk = ?1",
        [sk],
        parse_thread_row,
    )
    .optional()
}

/// List all threads
pub fn list_threads(conn: &Connection) -> rusqlite::Result<Vec<ThreadRow>> {
    let mut stmt = conn.prepare("SELECT id, name, sk, head FROM threads ORDER BY name")?;
    let threads = stmt
        .query_map([], parse_thread_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(threads)
}

/// Count threads
pub fn count_threads(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))
}

/// Update a thread's head
pub fn update_thread_head(conn: &Connection, id: &str, head: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE threads SET head = ?1 WHERE id = ?2",
        params![head, id],
    )?;
    Ok(rows > 0)
}

/// Delete a thread record (callers also clear blocks and peers)
pub fn delete_thread(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM threads WHERE id = ?1", [id])?;
    Ok(rows > 0)
}

// ============ Thread peers ============

/// Add a peer to a thread.
///
/// INSERT OR IGNORE keeps the first-observed `welcomed` state; uniqueness is
/// (thread, peer).
pub fn add_thread_peer(conn: &Connection, peer: &ThreadPeer) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO thread_peers (peer_id, thread_id, welcomed)
         VALUES (?1, ?2, ?3)",
        params![peer.peer_id, peer.thread_id, peer.welcomed as i64],
    )?;
    Ok(())
}

fn parse_thread_peer_row(row: &rusqlite::Row) -> rusqlite::Result<ThreadPeer> {
    Ok(ThreadPeer {
        peer_id: row.get(0)?,
        thread_id: row.get(1)?,
        welcomed: row.get::<_, i64>(2)? != 0,
    })
}

/// List peers of a thread
pub fn list_thread_peers(conn: &Connection, thread_id: &str) -> rusqlite::Result<Vec<ThreadPeer>> {
    let mut stmt = conn.prepare(
        "SELECT peer_id, thread_id, welcomed FROM thread_peers WHERE thread_id = ?1",
    )?;
    let peers = stmt
        .query_map([thread_id], parse_thread_peer_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(peers)
}

/// List unwelcomed peers of a thread
pub fn list_unwelcomed_thread_peers(
    conn: &Connection,
    thread_id: &str,
) -> rusqlite::Result<Vec<ThreadPeer>> {
    let mut stmt = conn.prepare(
        "SELECT peer_id, thread_id, welcomed FROM thread_peers
         WHERE thread_id = ?1 AND welcomed = 0",
    )?;
    let peers = stmt
        .query_map([thread_id], parse_thread_peer_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(peers)
}

/// List every thread a peer participates in
pub fn list_threads_by_peer(conn: &Connection, peer_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT thread_id FROM thread_peers WHERE peer_id = ?1")?;
    let threads = stmt
        .query_map([peer_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(threads)
}

/// Mark every peer of a thread as welcomed
pub fn welcome_thread_peers(conn: &Connection, thread_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE thread_peers SET welcomed = 1 WHERE thread_id = ?1",
        [thread_id],
    )
}

/// Mark a single peer as welcomed
pub fn welcome_thread_peer(
    conn: &Connection,
    thread_id: &str,
    peer_id: &str,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE thread_peers SET welcomed = 1 WHERE thread_id = ?1 AND peer_id = ?2",
        params![thread_id, peer_id],
    )?;
    Ok(rows > 0)
}

/// Count distinct peers, or total membership rows
pub fn count_thread_peers(conn: &Connection, distinct: bool) -> rusqlite::Result<i64> {
    let query = if distinct {
        "SELECT COUNT(DISTINCT peer_id) FROM thread_peers"
    } else {
        "SELECT COUNT(*) FROM thread_peers"
    };
    conn.query_row(query, [], |row| row.get(0))
}

/// Remove a peer from a thread
pub fn delete_thread_peer(
    conn: &Connection,
    thread_id: &str,
    peer_id: &str,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM thread_peers WHERE thread_id = ?1 AND peer_id = ?2",
        params![thread_id, peer_id],
    )?;
    Ok(rows > 0)
}

/// Remove every peer of a thread
pub fn delete_thread_peers_by_thread(conn: &Connection, thread_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM thread_peers WHERE thread_id = ?1", [thread_id])
}

// ============ Pending thread messages ============

/// Queue an inbound envelope for processing
pub fn add_thread_message(conn: &Connection, msg: &ThreadMessage) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO thread_messages (id, peer_id, envelope, date)
         VALUES (?1, ?2, ?3, ?4)",
        params![msg.id, msg.peer_id, msg.envelope, msg.date],
    )?;
    Ok(())
}

/// List queued envelopes, oldest first
pub fn list_thread_messages(
    conn: &Connection,
    offset: i64,
    limit: i64,
) -> rusqlite::Result<Vec<ThreadMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, peer_id, envelope, date FROM thread_messages
         ORDER BY date ASC LIMIT ?1 OFFSET ?2",
    )?;
    let msgs = stmt
        .query_map(params![limit, offset], |row| {
            Ok(ThreadMessage {
                id: row.get(0)?,
                peer_id: row.get(1)?,
                envelope: row.get(2)?,
                date: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(msgs)
}

/// Drop a processed envelope
pub fn delete_thread_message(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM thread_messages WHERE id = ?1", [id])?;
    Ok(rows > 0)
}
