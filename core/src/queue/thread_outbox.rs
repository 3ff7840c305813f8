//! Thread outbox
//!
//! Durable queue of pending per-peer block deliveries. The flush tick drains
//! due rows: attempt a direct publish on the peer's topic; on failure convert
//! the row to one cafe-inbox request per authorised inbox of the target and
//! delete it. Targets with no known inboxes retry with exponential backoff
//! until the attempt cap, then are logged and dropped.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::data::{self, CafeRequest, CafeRequestType, OutboxRow};
use crate::node::NodeConfig;
use crate::object::{multihash, ObjectStore};
use crate::thread::WireEnvelope;

use super::backoff_secs;

/// Drains pending thread-block deliveries
pub struct ThreadsOutbox {
    db: Arc<Mutex<Connection>>,
    object: Arc<dyn ObjectStore>,
    config: Arc<NodeConfig>,
}

impl ThreadsOutbox {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        object: Arc<dyn ObjectStore>,
        config: Arc<NodeConfig>,
    ) -> Self {
        Self { db, object, config }
    }

    /// Drain every row whose next try is due
    pub async fn flush(&self) {
        let now = data::current_timestamp();
        let due = {
            let db = self.db.lock().await;
            match data::list_due_outbox(&db, now) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "outbox listing failed");
                    return;
                }
            }
        };

        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "flushing thread outbox");

        for row in due {
            if let Err(e) = self.flush_row(&row, now).await {
                warn!(
                    block = %row.block_id,
                    peer = %row.peer_id,
                    error = %e,
                    "outbox row flush failed"
                );
            }
        }
    }

    async fn flush_row(&self, row: &OutboxRow, now: i64) -> Result<(), rusqlite::Error> {
        // Rebuild the wire envelope from the stored ciphertext
        let thread_id = {
            let db = self.db.lock().await;
            match data::get_block(&db, &row.block_id)? {
                Some(block) => block.thread_id,
                None => {
                    // Thread was removed; nothing left to deliver
                    data::delete_outbox_row(&db, &row.block_id, &row.peer_id)?;
                    return Ok(());
                }
            }
        };
        let sealed = match self.object.data_at_path(&row.block_id) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(block = %row.block_id, error = %e, "sealed block missing, dropping row");
                let db = self.db.lock().await;
                data::delete_outbox_row(&db, &row.block_id, &row.peer_id)?;
                return Ok(());
            }
        };
        debug_assert_eq!(multihash(&sealed), row.block_id);

        let wire = WireEnvelope {
            thread_id,
            ciphertext: sealed,
        }
        .encode();

        match self.object.publish(&row.peer_id, &wire) {
            Ok(()) => {
                debug!(block = %row.block_id, peer = %row.peer_id, "outbox row delivered");
                let db = self.db.lock().await;
                data::delete_outbox_row(&db, &row.block_id, &row.peer_id)?;
                Ok(())
            }
            Err(e) => {
                debug!(
                    block = %row.block_id,
                    peer = %row.peer_id,
                    error = %e,
                    "direct delivery failed"
                );
                self.fall_back(row, now).await
            }
        }
    }

    /// Convert an undeliverable row to cafe-inbox requests, or reschedule
    async fn fall_back(&self, row: &OutboxRow, now: i64) -> Result<(), rusqlite::Error> {
        let db = self.db.lock().await;
        let inboxes = data::contact_inboxes(&db, &row.peer_id)?;

        if !inboxes.is_empty() {
            for cafe_id in &inboxes {
                let req = CafeRequest {
                    id: multihash(
                        format!("{}:{}:{}", cafe_id, row.block_id, row.peer_id).as_bytes(),
                    ),
                    peer_id: row.peer_id.clone(),
                    target_id: row.block_id.clone(),
                    cafe_id: cafe_id.clone(),
                    request_type: CafeRequestType::PeerInbox,
                    date: now,
                    attempts: 0,
                };
                match data::add_cafe_request(&db, &req) {
                    Ok(()) => {}
                    Err(e) if data::is_conflict(&e) => {}
                    Err(e) => return Err(e),
                }
            }
            debug!(
                block = %row.block_id,
                peer = %row.peer_id,
                inboxes = inboxes.len(),
                "converted outbox row to cafe inbox requests"
            );
            data::delete_outbox_row(&db, &row.block_id, &row.peer_id)?;
            return Ok(());
        }

        if row.attempts + 1 >= self.config.max_delivery_attempts {
            warn!(
                block = %row.block_id,
                peer = %row.peer_id,
                attempts = row.attempts + 1,
                "delivery attempts exhausted, dropping"
            );
            data::delete_outbox_row(&db, &row.block_id, &row.peer_id)?;
            return Ok(());
        }

        let next = now
            + backoff_secs(
                self.config.delivery_backoff_secs,
                self.config.delivery_backoff_cap_secs,
                row.attempts,
            );
        data::reschedule_outbox_row(&db, &row.block_id, &row.peer_id, next)?;
        Ok(())
    }
}
