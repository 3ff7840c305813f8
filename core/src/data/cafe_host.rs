//! Cafe host-side storage
//!
//! Mirror tables for a node operating as a cafe: registered clients, their
//! encrypted thread snapshots, and messages queued for offline delivery.
//! The cafe HTTP surface itself lives outside this crate; these tables are
//! its persistence contract.

use rusqlite::{Connection, OptionalExtension, params};

/// A client registered with this cafe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CafeClient {
    pub id: String,
    pub address: String,
    pub created: i64,
    pub last_seen: i64,
}

/// A client's encrypted thread snapshot
///
/// All fields are ciphertext under the client's keys; the cafe can store but
/// never read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CafeClientThread {
    pub id: String,
    pub client_id: String,
    pub sk_cipher: Vec<u8>,
    pub head_cipher: Vec<u8>,
    pub name_cipher: Vec<u8>,
}

/// A message held for an offline client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CafeClientMessage {
    pub id: String,
    pub peer_id: String,
    pub client_id: String,
    pub date: i64,
}

// ============ Clients ============

/// Register a client
pub fn add_cafe_client(conn: &Connection, client: &CafeClient) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cafe_clients (id, address, created, last_seen)
         VALUES (?1, ?2, ?3, ?4)",
        params![client.id, client.address, client.created, client.last_seen],
    )?;
    Ok(())
}

fn parse_client_row(row: &rusqlite::Row) -> rusqlite::Result<CafeClient> {
    Ok(CafeClient {
        id: row.get(0)?,
        address: row.get(1)?,
        created: row.get(2)?,
        last_seen: row.get(3)?,
    })
}

/// Get a client
pub fn get_cafe_client(conn: &Connection, id: &str) -> rusqlite::Result<Option<CafeClient>> {
    conn.query_row(
        "SELECT id, address, created, last_seen FROM cafe_clients WHERE id = ?1",
        [id],
        parse_client_row,
    )
    .optional()
}

/// List all clients
pub fn list_cafe_clients(conn: &Connection) -> rusqlite::Result<Vec<CafeClient>> {
    let mut stmt = conn.prepare(
        "SELECT id, address, created, last_seen FROM cafe_clients ORDER BY created",
    )?;
    let clients = stmt
        .query_map([], parse_client_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(clients)
}

/// Count clients
pub fn count_cafe_clients(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM cafe_clients", [], |row| row.get(0))
}

/// Touch a client's last-seen timestamp
pub fn update_cafe_client_last_seen(
    conn: &Connection,
    id: &str,
    date: i64,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE cafe_clients SET last_seen = ?1 WHERE id = ?2",
        params![date, id],
    )?;
    Ok(rows > 0)
}

/// Remove a client (cascades to threads and messages)
pub fn delete_cafe_client(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM cafe_clients WHERE id = ?1", [id])?;
    Ok(rows > 0)
}

// ============ Client threads ============

/// Store or refresh a client's thread snapshot
pub fn add_or_update_cafe_client_thread(
    conn: &Connection,
    thread: &CafeClientThread,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cafe_client_threads
         (id, client_id, sk_cipher, head_cipher, name_cipher)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            thread.id,
            thread.client_id,
            thread.sk_cipher,
            thread.head_cipher,
            thread.name_cipher,
        ],
    )?;
    Ok(())
}

/// List a client's thread snapshots
pub fn list_cafe_client_threads(
    conn: &Connection,
    client_id: &str,
) -> rusqlite::Result<Vec<CafeClientThread>> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, sk_cipher, head_cipher, name_cipher
         FROM cafe_client_threads WHERE client_id = ?1 ORDER BY id",
    )?;
    let threads = stmt
        .query_map([client_id], |row| {
            Ok(CafeClientThread {
                id: row.get(0)?,
                client_id: row.get(1)?,
                sk_cipher: row.get(2)?,
                head_cipher: row.get(3)?,
                name_cipher: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(threads)
}

/// Delete one snapshot
pub fn delete_cafe_client_thread(
    conn: &Connection,
    id: &str,
    client_id: &str,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM cafe_client_threads WHERE id = ?1 AND client_id = ?2",
        params![id, client_id],
    )?;
    Ok(rows > 0)
}

/// Delete every snapshot of a client
pub fn delete_cafe_client_threads_by_client(
    conn: &Connection,
    client_id: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM cafe_client_threads WHERE client_id = ?1",
        [client_id],
    )
}

// ============ Client messages ============

/// Queue a message for an offline client
pub fn add_or_update_cafe_client_message(
    conn: &Connection,
    msg: &CafeClientMessage,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cafe_client_messages (id, peer_id, client_id, date)
         VALUES (?1, ?2, ?3, ?4)",
        params![msg.id, msg.peer_id, msg.client_id, msg.date],
    )?;
    Ok(())
}

/// List queued messages for a client, oldest first
pub fn list_cafe_client_messages(
    conn: &Connection,
    client_id: &str,
    limit: i64,
) -> rusqlite::Result<Vec<CafeClientMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, peer_id, client_id, date FROM cafe_client_messages
         WHERE client_id = ?1 ORDER BY date ASC LIMIT ?2",
    )?;
    let msgs = stmt
        .query_map(params![client_id, limit], |row| {
            Ok(CafeClientMessage {
                id: row.get(0)?,
                peer_id: row.get(1)?,
                client_id: row.get(2)?,
                date: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(msgs)
}

/// Count queued messages for a client
pub fn count_cafe_client_messages(conn: &Connection, client_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM cafe_client_messages WHERE client_id = ?1",
        [client_id],
        |row| row.get(0),
    )
}

/// Delete one queued message
pub fn delete_cafe_client_message(
    conn: &Connection,
    id: &str,
    client_id: &str,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM cafe_client_messages WHERE id = ?1 AND client_id = ?2",
        params![id, client_id],
    )?;
    Ok(rows > 0)
}

/// Delete up to `limit` oldest queued messages for a client (acknowledged
/// batch), or all of them when `limit` is negative
pub fn delete_cafe_client_messages_by_client(
    conn: &Connection,
    client_id: &str,
    limit: i64,
) -> rusqlite::Result<usize> {
    if limit < 0 {
        return conn.execute(
            "DELETE FROM cafe_client_messages WHERE client_id = ?1",
            [client_id],
        );
    }
    conn.execute(
        "DELETE FROM cafe_client_messages WHERE id IN (
             SELECT id FROM cafe_client_messages
             WHERE client_id = ?1 ORDER BY date ASC LIMIT ?2
         ) AND client_id = ?1",
        params![client_id, limit],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_memory_db;

    fn test_client(id: &str) -> CafeClient {
        CafeClient {
            id: id.to_string(),
            address: format!("addr-{}", id),
            created: 1700000000,
            last_seen: 1700000000,
        }
    }

    #[test]
    fn test_client_round_trip() {
        let conn = start_memory_db().unwrap();
        add_cafe_client(&conn, &test_client("c1")).unwrap();
        assert_eq!(get_cafe_client(&conn, "c1").unwrap().unwrap(), test_client("c1"));
        assert_eq!(count_cafe_clients(&conn).unwrap(), 1);

        assert!(update_cafe_client_last_seen(&conn, "c1", 1800000000).unwrap());
        assert_eq!(
            get_cafe_client(&conn, "c1").unwrap().unwrap().last_seen,
            1800000000
        );
    }

    #[test]
    fn test_client_threads() {
        let conn = start_memory_db().unwrap();
        add_cafe_client(&conn, &test_client("c1")).unwrap();

        let thread = CafeClientThread {
            id: "t1".to_string(),
            client_id: "c1".to_string(),
            sk_cipher: vec![1, 2],
            head_cipher: vec![3, 4],
            name_cipher: vec![5, 6],
        };
        add_or_update_cafe_client_thread(&conn, &thread).unwrap();

        // Update in place
        let mut updated = thread.clone();
        updated.head_cipher = vec![9, 9];
        add_or_update_cafe_client_thread(&conn, &updated).unwrap();

        let listed = list_cafe_client_threads(&conn, "c1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].head_cipher, vec![9, 9]);

        assert!(delete_cafe_client_thread(&conn, "t1", "c1").unwrap());
        assert_eq!(delete_cafe_client_threads_by_client(&conn, "c1").unwrap(), 0);
    }

    #[test]
    fn test_client_messages_batch_delete() {
        let conn = start_memory_db().unwrap();
        add_cafe_client(&conn, &test_client("c1")).unwrap();

        for i in 0..5 {
            add_or_update_cafe_client_message(
                &conn,
                &CafeClientMessage {
                    id: format!("m{}", i),
                    peer_id: "sender".to_string(),
                    client_id: "c1".to_string(),
                    date: 100 + i,
                },
            )
            .unwrap();
        }
        assert_eq!(count_cafe_client_messages(&conn, "c1").unwrap(), 5);

        // Oldest two acknowledged
        assert_eq!(
            delete_cafe_client_messages_by_client(&conn, "c1", 2).unwrap(),
            2
        );
        let remaining = list_cafe_client_messages(&conn, "c1", 10).unwrap();
        assert_eq!(remaining[0].id, "m2");

        // Remove all
        assert_eq!(
            delete_cafe_client_messages_by_client(&conn, "c1", -1).unwrap(),
            3
        );
    }

    #[test]
    fn test_delete_client_cascades() {
        let conn = start_memory_db().unwrap();
        add_cafe_client(&conn, &test_client("c1")).unwrap();
        add_or_update_cafe_client_message(
            &conn,
            &CafeClientMessage {
                id: "m1".to_string(),
                peer_id: "p".to_string(),
                client_id: "c1".to_string(),
                date: 1,
            },
        )
        .unwrap();

        assert!(delete_cafe_client(&conn, "c1").unwrap());
        assert_eq!(count_cafe_client_messages(&conn, "c1").unwrap(), 0);
    }
}
