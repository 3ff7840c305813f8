//! Notification storage

use rusqlite::{Connection, OptionalExtension, params};

/// Notification type discriminants (stable, stored in the database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NotificationType {
    ReceivedInvite = 0,
    AccountPeerAdded = 1,
    PeerJoined = 2,
    PeerLeft = 3,
    FileAdded = 4,
    TextAdded = 5,
    CommentAdded = 6,
    LikeAdded = 7,
}

impl NotificationType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(NotificationType::ReceivedInvite),
            1 => Some(NotificationType::AccountPeerAdded),
            2 => Some(NotificationType::PeerJoined),
            3 => Some(NotificationType::PeerLeft),
            4 => Some(NotificationType::FileAdded),
            5 => Some(NotificationType::TextAdded),
            6 => Some(NotificationType::CommentAdded),
            7 => Some(NotificationType::LikeAdded),
            _ => None,
        }
    }
}

/// A notification emitted for a thread event
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    pub id: String,
    pub date: i64,
    /// Peer that caused the event
    pub actor_id: String,
    /// Thread name (or device name)
    pub subject: String,
    /// Thread id (or device id)
    pub subject_id: String,
    pub block_id: String,
    pub data_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub body: String,
    pub read: bool,
}

fn parse_notification_row(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    let type_raw: i64 = row.get(7)?;
    let notification_type = NotificationType::from_i64(type_raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(7, "type".to_string(), rusqlite::types::Type::Integer)
    })?;
    Ok(Notification {
        id: row.get(0)?,
        date: row.get(1)?,
        actor_id: row.get(2)?,
        subject: row.get(3)?,
        subject_id: row.get(4)?,
        block_id: row.get(5)?,
        data_id: row.get(6)?,
        notification_type,
        body: row.get(8)?,
        read: row.get::<_, i64>(9)? != 0,
    })
}

const COLUMNS: &str = "id, date, actor_id, subject, subject_id, block_id, data_id, type, body, read";

/// Add a notification
pub fn add_notification(conn: &Connection, n: &Notification) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            COLUMNS
        ),
        params![
            n.id,
            n.date,
            n.actor_id,
            n.subject,
            n.subject_id,
            n.block_id,
            n.data_id,
            n.notification_type as i64,
            n.body,
            n.read as i64,
        ],
    )?;
    Ok(())
}

/// Get a notification
pub fn get_notification(conn: &Connection, id: &str) -> rusqlite::Result<Option<Notification>> {
    conn.query_row(
        &format!("SELECT {} FROM notifications WHERE id = ?1", COLUMNS),
        [id],
        parse_notification_row,
    )
    .optional()
}

/// Mark a notification as read
pub fn read_notification(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("UPDATE notifications SET read = 1 WHERE id = ?1", [id])?;
    Ok(rows > 0)
}

/// Mark all notifications as read
pub fn read_all_notifications(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("UPDATE notifications SET read = 1 WHERE read = 0", [])
}

/// List notifications, newest first
pub fn list_notifications(
    conn: &Connection,
    offset: i64,
    limit: i64,
) -> rusqlite::Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications ORDER BY date DESC LIMIT ?1 OFFSET ?2",
        COLUMNS
    ))?;
    let items = stmt
        .query_map(params![limit, offset], parse_notification_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Count unread notifications
pub fn count_unread_notifications(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE read = 0",
        [],
        |row| row.get(0),
    )
}

/// Delete a notification
pub fn delete_notification(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
    Ok(rows > 0)
}

/// Delete all notifications from an actor
pub fn delete_notifications_by_actor(conn: &Connection, actor_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM notifications WHERE actor_id = ?1", [actor_id])
}

/// Delete all notifications about a subject (thread removal)
pub fn delete_notifications_by_subject(
    conn: &Connection,
    subject_id: &str,
) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM notifications WHERE subject_id = ?1", [subject_id])
}

/// Delete all notifications referencing a block
pub fn delete_notifications_by_block(conn: &Connection, block_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM notifications WHERE block_id = ?1", [block_id])
}
