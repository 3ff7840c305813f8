//! Contact storage
//!
//! A contact pairs a peer id with its account address, announced username,
//! and the set of cafe inboxes authorised to hold messages for it.

use rusqlite::{Connection, OptionalExtension, params};

use super::current_timestamp;

/// A known peer
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Contact {
    /// Base58 peer id
    pub peer_id: String,
    /// Account address of the peer
    pub address: String,
    /// Announced display name
    pub username: String,
    /// Cafe peer ids authorised to hold messages for this contact
    pub inboxes: Vec<String>,
    /// When the contact was first added (unix seconds)
    pub added: i64,
}

fn parse_contact_row(row: &rusqlite::Row) -> rusqlite::Result<Contact> {
    let inboxes_json: String = row.get(3)?;
    let inboxes = serde_json::from_str(&inboxes_json).unwrap_or_default();
    Ok(Contact {
        peer_id: row.get(0)?,
        address: row.get(1)?,
        username: row.get(2)?,
        inboxes,
        added: row.get(4)?,
    })
}

fn inboxes_json(contact: &Contact) -> String {
    serde_json::to_string(&contact.inboxes).unwrap_or_else(|_| "[]".to_string())
}

/// Add a new contact. Fails with a constraint error if the peer id exists.
pub fn add_contact(conn: &Connection, contact: &Contact) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO contacts (peer_id, address, username, inboxes, added)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            contact.peer_id,
            contact.address,
            contact.username,
            inboxes_json(contact),
            contact.added,
        ],
    )?;
    Ok(())
}

/// Insert or update a contact, preserving the original `added` date.
pub fn add_or_update_contact(conn: &Connection, contact: &Contact) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO contacts (peer_id, address, username, inboxes, added)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(peer_id) DO UPDATE SET
             address = excluded.address,
             username = excluded.username,
             inboxes = excluded.inboxes",
        params![
            contact.peer_id,
            contact.address,
            contact.username,
            inboxes_json(contact),
            contact.added,
        ],
    )?;
    Ok(())
}

/// Get a contact by peer id
pub fn get_contact(conn: &Connection, peer_id: &str) -> rusqlite::Result<Option<Contact>> {
    conn.query_row(
        "SELECT peer_id, address, username, inboxes, added FROM contacts WHERE peer_id = ?1",
        [peer_id],
        parse_contact_row,
    )
    .optional()
}

/// List all contacts, most recent first
pub fn list_contacts(conn: &Connection) -> rusqlite::Result<Vec<Contact>> {
    let mut stmt = conn.prepare(
        "SELECT peer_id, address, username, inboxes, added FROM contacts ORDER BY added DESC",
    )?;
    let contacts = stmt
        .query_map([], parse_contact_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contacts)
}

/// List contacts sharing an account address (account peers / devices)
pub fn list_contacts_by_address(conn: &Connection, address: &str) -> rusqlite::Result<Vec<Contact>> {
    let mut stmt = conn.prepare(
        "SELECT peer_id, address, username, inboxes, added FROM contacts
         WHERE address = ?1 ORDER BY added DESC",
    )?;
    let contacts = stmt
        .query_map([address], parse_contact_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contacts)
}

/// Count contacts
pub fn count_contacts(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
}

/// Delete a contact
pub fn delete_contact(conn: &Connection, peer_id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM contacts WHERE peer_id = ?1", [peer_id])?;
    Ok(rows > 0)
}

/// The authorised inboxes for a peer, empty if unknown
pub fn contact_inboxes(conn: &Connection, peer_id: &str) -> rusqlite::Result<Vec<String>> {
    Ok(get_contact(conn, peer_id)?
        .map(|c| c.inboxes)
        .unwrap_or_default())
}

impl Contact {
    /// A fresh contact with the current timestamp
    pub fn new(peer_id: &str, address: &str, username: &str, inboxes: Vec<String>) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            address: address.to_string(),
            username: username.to_string(),
            inboxes,
            added: current_timestamp(),
        }
    }
}
