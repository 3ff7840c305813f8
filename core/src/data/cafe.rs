//! Cafe client-side storage
//!
//! Sessions with cafes this node uses, the outbound request queue, and
//! notices of inbound envelopes waiting at a cafe.

use rusqlite::{Connection, OptionalExtension, params};

/// An authorised session with a cafe
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CafeSession {
    pub cafe_id: String,
    pub access: String,
    pub refresh: String,
    pub expiry: i64,
    pub http_addr: String,
    pub swarm_addrs: Vec<String>,
}

/// Cafe request type discriminants (stable, stored in the database)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CafeRequestType {
    /// Pin an object at the cafe
    Store = 0,
    /// Persist an encrypted thread snapshot at the cafe
    StoreThread = 1,
    /// Drop an envelope into a peer's inbox at the cafe
    PeerInbox = 2,
}

impl CafeRequestType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(CafeRequestType::Store),
            1 => Some(CafeRequestType::StoreThread),
            2 => Some(CafeRequestType::PeerInbox),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CafeRequestType::Store => "STORE",
            CafeRequestType::StoreThread => "STORE_THREAD",
            CafeRequestType::PeerInbox => "INBOX",
        }
    }
}

/// A queued request against a cafe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CafeRequest {
    pub id: String,
    /// Recipient peer (INBOX) or this node (STORE/STORE_THREAD)
    pub peer_id: String,
    /// Object or thread the request concerns
    pub target_id: String,
    pub cafe_id: String,
    pub request_type: CafeRequestType,
    pub date: i64,
    pub attempts: i64,
}

/// Notice of an envelope waiting at a cafe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CafeMessage {
    pub id: String,
    pub peer_id: String,
    pub date: i64,
    pub attempts: i64,
}

// ============ Sessions ============

/// Insert or refresh a session
pub fn add_or_update_cafe_session(conn: &Connection, session: &CafeSession) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cafe_sessions
         (cafe_id, access, refresh, expiry, http_addr, swarm_addrs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session.cafe_id,
            session.access,
            session.refresh,
            session.expiry,
            session.http_addr,
            serde_json::to_string(&session.swarm_addrs).unwrap_or_else(|_| "[]".to_string()),
        ],
    )?;
    Ok(())
}

fn parse_session_row(row: &rusqlite::Row) -> rusqlite::Result<CafeSession> {
    let swarm_json: String = row.get(5)?;
    Ok(CafeSession {
        cafe_id: row.get(0)?,
        access: row.get(1)?,
        refresh: row.get(2)?,
        expiry: row.get(3)?,
        http_addr: row.get(4)?,
        swarm_addrs: serde_json::from_str(&swarm_json).unwrap_or_default(),
    })
}

/// Get a session by cafe id
pub fn get_cafe_session(conn: &Connection, cafe_id: &str) -> rusqlite::Result<Option<CafeSession>> {
    conn.query_row(
        "SELECT cafe_id, access, refresh, expiry, http_addr, swarm_addrs
         FROM cafe_sessions WHERE cafe_id = ?1",
        [cafe_id],
        parse_session_row,
    )
    .optional()
}

/// List all sessions
pub fn list_cafe_sessions(conn: &Connection) -> rusqlite::Result<Vec<CafeSession>> {
    let mut stmt = conn.prepare(
        "SELECT cafe_id, access, refresh, expiry, http_addr, swarm_addrs
         FROM cafe_sessions ORDER BY cafe_id",
    )?;
    let sessions = stmt
        .query_map([], parse_session_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sessions)
}

/// Delete a session
pub fn delete_cafe_session(conn: &Connection, cafe_id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM cafe_sessions WHERE cafe_id = ?1", [cafe_id])?;
    Ok(rows > 0)
}

// ============ Requests ============

/// Queue a request
pub fn add_cafe_request(conn: &Connection, req: &CafeRequest) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cafe_requests (id, peer_id, target_id, cafe_id, type, date, attempts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            req.id,
            req.peer_id,
            req.target_id,
            req.cafe_id,
            req.request_type as i64,
            req.date,
            req.attempts,
        ],
    )?;
    Ok(())
}

fn parse_request_row(row: &rusqlite::Row) -> rusqlite::Result<CafeRequest> {
    let type_raw: i64 = row.get(4)?;
    let request_type = CafeRequestType::from_i64(type_raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(4, "type".to_string(), rusqlite::types::Type::Integer)
    })?;
    Ok(CafeRequest {
        id: row.get(0)?,
        peer_id: row.get(1)?,
        target_id: row.get(2)?,
        cafe_id: row.get(3)?,
        request_type,
        date: row.get(5)?,
        attempts: row.get(6)?,
    })
}

/// List queued requests, oldest first
pub fn list_cafe_requests(
    conn: &Connection,
    offset: i64,
    limit: i64,
) -> rusqlite::Result<Vec<CafeRequest>> {
    let mut stmt = conn.prepare(
        "SELECT id, peer_id, target_id, cafe_id, type, date, attempts
         FROM cafe_requests ORDER BY date ASC LIMIT ?1 OFFSET ?2",
    )?;
    let reqs = stmt
        .query_map(params![limit, offset], parse_request_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(reqs)
}

/// Bump a request's attempt counter
pub fn add_cafe_request_attempt(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE cafe_requests SET attempts = attempts + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(rows > 0)
}

/// Delete a completed or terminal request
pub fn delete_cafe_request(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM cafe_requests WHERE id = ?1", [id])?;
    Ok(rows > 0)
}

/// Delete every queued request against a cafe (deauthorisation)
pub fn delete_cafe_requests_by_cafe(conn: &Connection, cafe_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM cafe_requests WHERE cafe_id = ?1", [cafe_id])
}

// ============ Messages ============

/// Record an inbound envelope notice
pub fn add_cafe_message(conn: &Connection, msg: &CafeMessage) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO cafe_messages (id, peer_id, date, attempts)
         VALUES (?1, ?2, ?3, ?4)",
        params![msg.id, msg.peer_id, msg.date, msg.attempts],
    )?;
    Ok(())
}

/// List notices, oldest first
pub fn list_cafe_messages(
    conn: &Connection,
    offset: i64,
    limit: i64,
) -> rusqlite::Result<Vec<CafeMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, peer_id, date, attempts FROM cafe_messages
         ORDER BY date ASC LIMIT ?1 OFFSET ?2",
    )?;
    let msgs = stmt
        .query_map(params![limit, offset], |row| {
            Ok(CafeMessage {
                id: row.get(0)?,
                peer_id: row.get(1)?,
                date: row.get(2)?,
                attempts: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(msgs)
}

/// Bump a notice's attempt counter
pub fn add_cafe_message_attempt(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE cafe_messages SET attempts = attempts + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(rows > 0)
}

/// Delete a processed notice
pub fn delete_cafe_message(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM cafe_messages WHERE id = ?1", [id])?;
    Ok(rows > 0)
}
