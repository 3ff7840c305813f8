//! Data layer for the Weft datastore
//!
//! Provides storage and retrieval for:
//! - Account configuration and profile
//! - Contacts and their cafe inboxes
//! - Threads, thread peers, and pending thread messages
//! - The block index (thread DAGs)
//! - The file index and block targets
//! - Notifications
//! - The thread outbox and cafe request/message queues
//! - Cafe host-side client tables
//!
//! One module per entity; free functions over a shared `rusqlite::Connection`
//! held behind a single serial lock by the node supervisor.

pub mod blocks;
pub mod cafe;
pub mod cafe_host;
pub mod config;
pub mod contacts;
pub mod files;
pub mod notifications;
pub mod outbox;
pub mod schema;
pub mod start;
pub mod threads;

// Re-export commonly used items
pub use blocks::{
    add_block, block_exists, block_ignored, count_blocks, delete_blocks_by_thread, get_block,
    list_blocks, thread_heads, Block, BlockType,
};
pub use cafe::{
    add_cafe_message, add_cafe_message_attempt, add_cafe_request, add_cafe_request_attempt,
    add_or_update_cafe_session, delete_cafe_message, delete_cafe_request,
    delete_cafe_requests_by_cafe, delete_cafe_session, get_cafe_session, list_cafe_messages,
    list_cafe_requests, list_cafe_sessions, CafeMessage, CafeRequest, CafeRequestType, CafeSession,
};
pub use cafe_host::{
    add_cafe_client, add_or_update_cafe_client_message, add_or_update_cafe_client_thread,
    count_cafe_client_messages, count_cafe_clients, delete_cafe_client,
    delete_cafe_client_message, delete_cafe_client_messages_by_client, delete_cafe_client_thread,
    delete_cafe_client_threads_by_client, get_cafe_client, list_cafe_client_messages,
    list_cafe_client_threads, list_cafe_clients, update_cafe_client_last_seen, CafeClient,
    CafeClientMessage, CafeClientThread,
};
pub use config::{configure_account, get_account, get_created, get_username, set_username};
pub use contacts::{
    add_contact, add_or_update_contact, contact_inboxes, count_contacts, delete_contact,
    get_contact, list_contacts, list_contacts_by_address, Contact,
};
pub use files::{
    add_file, add_file_target, count_files, delete_file, get_file, get_file_by_primary,
    get_file_by_source, remove_file_target, File,
};
pub use notifications::{
    add_notification, count_unread_notifications, delete_notification,
    delete_notifications_by_actor, delete_notifications_by_block, delete_notifications_by_subject,
    get_notification, list_notifications, read_all_notifications, read_notification, Notification,
    NotificationType,
};
pub use outbox::{
    add_outbox_row, count_outbox, delete_outbox_row, list_due_outbox, reschedule_outbox_row,
    OutboxRow,
};
pub use schema::{create_all_tables, run_migrations};
pub use start::{
    datastore_dir, lock_path, remove_lock, remove_stale_lock, start_db, start_memory_db, StartError,
};
pub use threads::{
    add_thread, add_thread_message, add_thread_peer, count_thread_peers, count_threads,
    delete_thread, delete_thread_message, delete_thread_peer, delete_thread_peers_by_thread,
    get_thread, get_thread_by_key, list_thread_messages, list_thread_peers, list_threads,
    list_threads_by_peer, list_unwelcomed_thread_peers, update_thread_head, welcome_thread_peer,
    welcome_thread_peers, ThreadMessage, ThreadPeer, ThreadRow,
};

/// Current unix time in seconds
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Whether a database error is a unique-constraint conflict.
///
/// Callers on dedup paths use this to fetch-and-return the existing row
/// instead of propagating.
pub fn is_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_monotonic_enough() {
        let a = current_timestamp();
        let b = current_timestamp();
        assert!(b >= a);
        assert!(a > 1_600_000_000); // sanity: after Sep 2020
    }

    #[test]
    fn test_is_conflict_detects_unique_violation() {
        let conn = start_memory_db().unwrap();
        conn.execute(
            "INSERT INTO threads (id, name, sk) VALUES ('t', 'n', x'00')",
            [],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO threads (id, name, sk) VALUES ('t', 'n', x'00')",
                [],
            )
            .unwrap_err();
        assert!(is_conflict(&err));
    }

    #[test]
    fn test_is_conflict_ignores_other_errors() {
        let conn = start_memory_db().unwrap();
        let err = conn.execute("SELECT * FROM no_such_table", []).unwrap_err();
        assert!(!is_conflict(&err));
    }
}
