//! Cafe inbox
//!
//! On each flush, polls every authorised cafe for pending envelopes. Each
//! envelope either decrypts under a known thread key and enters the engine's
//! inbound path, or is dropped as noise. Successfully handled (or noise)
//! envelopes are acknowledged so the cafe deletes them; transient failures
//! leave them queued for the next poll.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::data::{self, ThreadMessage};
use crate::node::NodeError;
use crate::object::multihash;
use crate::thread::{ThreadRegistry, WireEnvelope};

use super::{CafeEnvelope, CafeTransport};

/// Polls cafes and feeds the thread engine
pub struct CafeInbox {
    db: Arc<Mutex<Connection>>,
    transport: Arc<dyn CafeTransport>,
    threads: ThreadRegistry,
}

impl CafeInbox {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        transport: Arc<dyn CafeTransport>,
        threads: ThreadRegistry,
    ) -> Self {
        Self {
            db,
            transport,
            threads,
        }
    }

    /// Poll every session and process what is waiting
    pub async fn check_messages(&self) {
        let sessions = {
            let db = self.db.lock().await;
            match data::list_cafe_sessions(&db) {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!(error = %e, "cafe session listing failed");
                    return;
                }
            }
        };

        for session in sessions {
            let envelopes = match self.transport.check_messages(&session) {
                Ok(envelopes) => envelopes,
                Err(e) => {
                    warn!(cafe = %session.cafe_id, error = %e, "cafe inbox poll failed");
                    continue;
                }
            };
            if envelopes.is_empty() {
                continue;
            }
            debug!(cafe = %session.cafe_id, count = envelopes.len(), "cafe inbox has mail");

            let mut done = Vec::new();
            for envelope in &envelopes {
                if self.process(envelope).await {
                    done.push(envelope.id.clone());
                }
            }

            if !done.is_empty() {
                if let Err(e) = self.transport.delete_messages(&session, &done) {
                    warn!(cafe = %session.cafe_id, error = %e, "cafe inbox ack failed");
                }
            }
        }
    }

    /// Handle one envelope. Returns whether to acknowledge it.
    async fn process(&self, envelope: &CafeEnvelope) -> bool {
        // Record the notice so interrupted processing resumes next flush
        let notice = ThreadMessage {
            id: multihash(&envelope.envelope),
            peer_id: envelope.from.clone(),
            envelope: envelope.envelope.clone(),
            date: data::current_timestamp(),
        };
        {
            let db = self.db.lock().await;
            match data::add_thread_message(&db, &notice) {
                Ok(()) => {}
                Err(e) if data::is_conflict(&e) => {}
                Err(e) => {
                    warn!(error = %e, "thread message insert failed");
                    return false;
                }
            }
        }

        let wire = match WireEnvelope::decode(&envelope.envelope) {
            Ok(wire) => wire,
            Err(e) => {
                // Undecodable payloads are noise, but decode errors must
                // surface, not vanish
                warn!(from = %envelope.from, error = %e, "undecodable cafe envelope dropped");
                self.forget(&notice.id).await;
                return true;
            }
        };

        let thread = {
            let threads = self.threads.read().await;
            threads.get(&wire.thread_id).cloned()
        };
        let Some(thread) = thread else {
            debug!(thread = %wire.thread_id, "envelope for unknown thread dropped");
            self.forget(&notice.id).await;
            return true;
        };

        match thread.handle_envelope(&wire.ciphertext).await {
            Ok(_) => {
                self.forget(&notice.id).await;
                true
            }
            Err(NodeError::InvalidThreadBlock(reason)) => {
                // Malformed input is not an error to the user
                debug!(thread = %wire.thread_id, reason = %reason, "invalid block dropped");
                self.forget(&notice.id).await;
                true
            }
            Err(e) => {
                warn!(thread = %wire.thread_id, error = %e, "inbound processing failed, will retry");
                false
            }
        }
    }

    async fn forget(&self, message_id: &str) {
        let db = self.db.lock().await;
        let _ = data::delete_thread_message(&db, message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_memory_db;
    use crate::node::{NodeChannels, NodeConfig};
    use crate::object::MemoryStore;
    use crate::security::keypair_from_secret;
    use crate::testing::{test_account, MemoryCafe};
    use crate::thread::{BlockHeader, BlockPayload, Thread, ThreadBlock, ThreadContext};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tokio::sync::RwLock;

    struct Fixture {
        inbox: CafeInbox,
        db: Arc<Mutex<Connection>>,
        cafe: Arc<MemoryCafe>,
        threads: ThreadRegistry,
        ctx: ThreadContext,
    }

    async fn fixture() -> Fixture {
        let account = Arc::new(test_account(1));
        let db = Arc::new(Mutex::new(start_memory_db().unwrap()));
        let object = MemoryStore::standalone(&account.peer_id());
        let cafe = Arc::new(MemoryCafe::new("cafe1"));
        let threads: ThreadRegistry = Arc::new(RwLock::new(HashMap::new()));

        let session = cafe
            .register("cafe1", &account.peer_id(), account.address())
            .unwrap();
        {
            let db = db.lock().await;
            data::add_or_update_cafe_session(&db, &session).unwrap();
        }

        let ctx = ThreadContext {
            db: db.clone(),
            object,
            account,
            config: Arc::new(NodeConfig::for_testing(PathBuf::from("/tmp/weft-test"))),
            channels: NodeChannels::default(),
        };
        let inbox = CafeInbox::new(db.clone(), cafe.clone(), threads.clone());
        Fixture {
            inbox,
            db,
            cafe,
            threads,
            ctx,
        }
    }

    /// Register a thread both in the datastore and the live registry
    async fn add_thread(fx: &Fixture, sk: &[u8; 32], name: &str) -> Arc<Thread> {
        let (_, id) = keypair_from_secret(sk);
        let row = data::ThreadRow {
            id: id.clone(),
            name: name.to_string(),
            sk: sk.to_vec(),
            head: String::new(),
        };
        {
            let db = fx.db.lock().await;
            data::add_thread(&db, &row).unwrap();
        }
        let thread = Arc::new(Thread::new(&row, fx.ctx.clone()));
        fx.threads.write().await.insert(id, thread.clone());
        thread
    }

    /// A sealed JOIN from another member of the thread
    fn sealed_join(sk: &[u8; 32], author_fill: u8) -> (Vec<u8>, String) {
        let author = test_account(author_fill);
        let key = crate::security::thread_block_key(sk);
        let header = BlockHeader {
            author: author.peer_id(),
            address: author.address().to_string(),
            parents: Vec::new(),
            date: data::current_timestamp(),
        };
        let payload = BlockPayload::Join {
            username: "bob".to_string(),
            inboxes: Vec::new(),
        };
        let signature = author.sign(&ThreadBlock::signing_bytes(&header, &payload));
        let block = ThreadBlock {
            header,
            payload,
            signature,
        };
        let sealed = block.seal(&key).unwrap();
        let hash = multihash(&sealed);
        (sealed, hash)
    }

    #[tokio::test]
    async fn test_envelope_processed_and_acked() {
        let fx = fixture().await;
        let sk = [7u8; 32];
        let thread = add_thread(&fx, &sk, "alpha").await;

        let (sealed, hash) = sealed_join(&sk, 2);
        let wire = WireEnvelope {
            thread_id: thread.id.clone(),
            ciphertext: sealed,
        }
        .encode();
        fx.cafe
            .deliver("cafe1", &fx.ctx.account.peer_id(), "bob-peer", &wire)
            .unwrap();

        fx.inbox.check_messages().await;

        // Block indexed, inbox acked, no pending thread message left behind
        {
            let db = fx.db.lock().await;
            assert!(data::block_exists(&db, &hash).unwrap());
            assert!(data::list_thread_messages(&db, 0, 10).unwrap().is_empty());
        }
        assert_eq!(fx.cafe.inbox_len(&fx.ctx.account.peer_id()), 0);
    }

    #[tokio::test]
    async fn test_processing_is_idempotent() {
        let fx = fixture().await;
        let sk = [7u8; 32];
        let thread = add_thread(&fx, &sk, "alpha").await;

        let (sealed, _) = sealed_join(&sk, 2);
        let wire = WireEnvelope {
            thread_id: thread.id.clone(),
            ciphertext: sealed,
        }
        .encode();
        // The same envelope queued twice
        for _ in 0..2 {
            fx.cafe
                .deliver("cafe1", &fx.ctx.account.peer_id(), "bob-peer", &wire)
                .unwrap();
        }

        fx.inbox.check_messages().await;
        fx.inbox.check_messages().await;

        let db = fx.db.lock().await;
        assert_eq!(data::count_blocks(&db, &thread.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_noise_is_dropped_and_acked() {
        let fx = fixture().await;
        fx.cafe
            .deliver("cafe1", &fx.ctx.account.peer_id(), "who", &[0xFF, 0x01])
            .unwrap();

        fx.inbox.check_messages().await;
        assert_eq!(fx.cafe.inbox_len(&fx.ctx.account.peer_id()), 0);
    }

    #[tokio::test]
    async fn test_unknown_thread_dropped() {
        let fx = fixture().await;
        let wire = WireEnvelope {
            thread_id: "unknown-thread".to_string(),
            ciphertext: vec![1, 2, 3],
        }
        .encode();
        fx.cafe
            .deliver("cafe1", &fx.ctx.account.peer_id(), "who", &wire)
            .unwrap();

        fx.inbox.check_messages().await;
        assert_eq!(fx.cafe.inbox_len(&fx.ctx.account.peer_id()), 0);
    }

    #[tokio::test]
    async fn test_forged_envelope_dropped_silently() {
        let fx = fixture().await;
        let sk = [7u8; 32];
        let thread = add_thread(&fx, &sk, "alpha").await;

        // Sealed under the wrong thread key: decryption noise
        let (sealed, hash) = sealed_join(&[8u8; 32], 2);
        let wire = WireEnvelope {
            thread_id: thread.id.clone(),
            ciphertext: sealed,
        }
        .encode();
        fx.cafe
            .deliver("cafe1", &fx.ctx.account.peer_id(), "bob-peer", &wire)
            .unwrap();

        fx.inbox.check_messages().await;

        let db = fx.db.lock().await;
        assert!(!data::block_exists(&db, &hash).unwrap());
        assert_eq!(fx.cafe.inbox_len(&fx.ctx.account.peer_id()), 0);
    }
}
