//! Database schema definitions for the Weft datastore
//!
//! All ids are base58 strings; dates are unix seconds.

use rusqlite::Connection;

/// Current major schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Creates all required database tables
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    create_config_table(conn)?;
    create_contact_table(conn)?;
    create_thread_tables(conn)?;
    create_block_tables(conn)?;
    create_file_tables(conn)?;
    create_notification_table(conn)?;
    create_outbox_table(conn)?;
    create_cafe_tables(conn)?;
    create_cafe_host_tables(conn)?;
    Ok(())
}

/// Run database migrations for existing databases
///
/// This should be called after tables exist to add new columns, indexes, etc.
/// Each migration checks if it's already been applied before making changes.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    // Migration 1: add attempts column to cafe_requests (v0.2)
    let has_attempts: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('cafe_requests') WHERE name = 'attempts'",
        [],
        |row| row.get(0),
    )?;
    if !has_attempts {
        conn.execute(
            "ALTER TABLE cafe_requests ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }

    // Migration 2: add address column to contacts (v0.3)
    let has_address: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('contacts') WHERE name = 'address'",
        [],
        |row| row.get(0),
    )?;
    if !has_address {
        conn.execute(
            "ALTER TABLE contacts ADD COLUMN address TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }

    Ok(())
}

/// Run schema-breaking migrations up to [`SCHEMA_VERSION`].
///
/// Never invoked automatically; the repo owner opts in explicitly since a
/// major migration may rewrite tables.
pub fn run_major_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    // Future schema-breaking steps run here, one version at a time
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    }
    Ok(())
}

/// Config table: single-row account record plus free-form settings
///
/// The account secret is stored raw; at-rest protection is the repo owner's
/// concern (the datastore lives inside the repo directory).
pub fn create_config_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY NOT NULL,
            value BLOB NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Contacts table: known peers with their authorised cafe inboxes
///
/// `inboxes` is a JSON array of cafe peer ids.
pub fn create_contact_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contacts (
            peer_id TEXT PRIMARY KEY NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            username TEXT NOT NULL DEFAULT '',
            inboxes TEXT NOT NULL DEFAULT '[]',
            added INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contacts_address ON contacts(address)",
        [],
    )?;
    Ok(())
}

/// Thread tables: threads, their peers, and received-but-unprocessed envelopes
///
/// `threads.head` is the empty string before the local JOIN block exists.
/// `thread_peers.welcomed` records whether this node has sent the peer a
/// WELCOME yet.
pub fn create_thread_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            sk BLOB NOT NULL,
            head TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS thread_peers (
            peer_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            welcomed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (thread_id, peer_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS thread_messages (
            id TEXT PRIMARY KEY NOT NULL,
            peer_id TEXT NOT NULL,
            envelope BLOB NOT NULL,
            date INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_thread_peers_peer ON thread_peers(peer_id)",
        [],
    )?;
    Ok(())
}

/// Block tables: the local index of a thread's DAG
///
/// Parents live in a junction table so head evaluation can run as a single
/// NOT EXISTS query. The empty-parent marker is simply the absence of rows.
pub fn create_block_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY NOT NULL,
            thread_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            type INTEGER NOT NULL,
            date INTEGER NOT NULL,
            data_id TEXT NOT NULL DEFAULT '',
            data_key TEXT NOT NULL DEFAULT '',
            data_caption TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS block_parents (
            block_id TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            PRIMARY KEY (block_id, parent_id),
            FOREIGN KEY (block_id) REFERENCES blocks(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_blocks_thread ON blocks(thread_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_block_parents_parent ON block_parents(parent_id)",
        [],
    )?;
    Ok(())
}

/// File tables: the content-addressed file index and block targets
///
/// `(mill, checksum)` is the primary dedup key; `(mill, source, opts)` is the
/// source dedup key. `key` is the base58 AES key, empty when plaintext.
pub fn create_file_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS files (
            hash TEXT PRIMARY KEY NOT NULL,
            mill TEXT NOT NULL,
            checksum TEXT NOT NULL,
            source TEXT NOT NULL,
            opts TEXT NOT NULL DEFAULT '',
            media TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL,
            added INTEGER NOT NULL,
            meta TEXT NOT NULL DEFAULT '',
            key TEXT NOT NULL DEFAULT '',
            UNIQUE (mill, checksum)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS file_targets (
            hash TEXT NOT NULL,
            target TEXT NOT NULL,
            PRIMARY KEY (hash, target),
            FOREIGN KEY (hash) REFERENCES files(hash) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_files_source ON files(mill, source, opts)",
        [],
    )?;
    Ok(())
}

/// Notifications table
pub fn create_notification_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY NOT NULL,
            date INTEGER NOT NULL,
            actor_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            block_id TEXT NOT NULL DEFAULT '',
            data_id TEXT NOT NULL DEFAULT '',
            type INTEGER NOT NULL,
            body TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_date ON notifications(date DESC)",
        [],
    )?;
    Ok(())
}

/// Thread outbox table: pending per-peer block deliveries
pub fn create_outbox_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS thread_outbox (
            block_id TEXT NOT NULL,
            peer_id TEXT NOT NULL,
            next_try INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (block_id, peer_id)
        )",
        [],
    )?;
    Ok(())
}

/// Cafe client-side tables: sessions with cafes, queued requests, and
/// inbound message notices
pub fn create_cafe_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cafe_sessions (
            cafe_id TEXT PRIMARY KEY NOT NULL,
            access TEXT NOT NULL,
            refresh TEXT NOT NULL,
            expiry INTEGER NOT NULL,
            http_addr TEXT NOT NULL,
            swarm_addrs TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cafe_requests (
            id TEXT PRIMARY KEY NOT NULL,
            peer_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            cafe_id TEXT NOT NULL,
            type INTEGER NOT NULL,
            date INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cafe_messages (
            id TEXT PRIMARY KEY NOT NULL,
            peer_id TEXT NOT NULL,
            date INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cafe_requests_cafe ON cafe_requests(cafe_id, date)",
        [],
    )?;
    Ok(())
}

/// Cafe host-side tables: per-client sessions, thread snapshots, and queued
/// messages held for offline clients
pub fn create_cafe_host_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cafe_clients (
            id TEXT PRIMARY KEY NOT NULL,
            address TEXT NOT NULL,
            created INTEGER NOT NULL,
            last_seen INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cafe_client_threads (
            id TEXT NOT NULL,
            client_id TEXT NOT NULL,
            sk_cipher BLOB NOT NULL,
            head_cipher BLOB NOT NULL,
            name_cipher BLOB NOT NULL,
            PRIMARY KEY (id, client_id),
            FOREIGN KEY (client_id) REFERENCES cafe_clients(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cafe_client_messages (
            id TEXT NOT NULL,
            peer_id TEXT NOT NULL,
            client_id TEXT NOT NULL,
            date INTEGER NOT NULL,
            PRIMARY KEY (id, client_id),
            FOREIGN KEY (client_id) REFERENCES cafe_clients(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cafe_client_messages_client
         ON cafe_client_messages(client_id, date)",
        [],
    )?;
    Ok(())
}
