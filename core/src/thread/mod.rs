//! Thread engine
//!
//! A thread is an append-only DAG of signed, encrypted blocks shared with a
//! set of peers. This module owns block construction and commit; inbound
//! validation and replay live in `incoming`, head merging in `merge`, and
//! the invite flow in `invite`.

pub mod envelope;
pub mod incoming;
pub mod invite;
pub mod merge;

pub use envelope::{BlockHeader, BlockPayload, ThreadBlock, WireEnvelope};

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::data::{self, Block, ThreadPeer, ThreadRow};
use crate::files::Keys;
use crate::node::{NodeChannels, NodeConfig, NodeError, ThreadUpdate};
use crate::object::{ObjectNode, ObjectStore};
use crate::security::{thread_block_key, Account};

/// Live threads, shared between the supervisor and the cafe inbox
pub type ThreadRegistry = Arc<RwLock<HashMap<String, Arc<Thread>>>>;

/// Shared handles a thread needs from the node supervisor.
///
/// Plain `Arc`s flowing one way (supervisor owns threads, threads hold
/// handles to shared infrastructure) - no reference cycles to defeat
/// cleanup.
#[derive(Clone)]
pub struct ThreadContext {
    pub db: Arc<Mutex<Connection>>,
    pub object: Arc<dyn ObjectStore>,
    pub account: Arc<Account>,
    pub config: Arc<NodeConfig>,
    pub channels: NodeChannels,
}

/// Result of committing a block
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub hash: String,
    pub block: ThreadBlock,
}

/// A loaded thread
pub struct Thread {
    pub id: String,
    pub name: String,
    sk: Vec<u8>,
    /// Derived block-envelope key
    key: [u8; 32],
    ctx: ThreadContext,
    /// Serialises commits and inbound processing for this thread
    mux: Mutex<()>,
}

impl Thread {
    /// Load a thread from its stored row
    pub fn new(row: &ThreadRow, ctx: ThreadContext) -> Self {
        Self {
            id: row.id.clone(),
            name: row.name.clone(),
            sk: row.sk.clone(),
            key: thread_block_key(&row.sk),
            ctx,
            mux: Mutex::new(()),
        }
    }

    /// The thread secret
    pub(crate) fn secret(&self) -> &[u8] {
        &self.sk
    }

    /// The derived block key
    pub(crate) fn block_key(&self) -> [u8; 32] {
        self.key
    }

    pub(crate) fn context(&self) -> &ThreadContext {
        &self.ctx
    }

    /// Current peers of this thread
    pub async fn peers(&self) -> Result<Vec<ThreadPeer>, NodeError> {
        let db = self.ctx.db.lock().await;
        Ok(data::list_thread_peers(&db, &self.id)?)
    }

    /// Current head (empty before JOIN)
    pub async fn head(&self) -> Result<String, NodeError> {
        let db = self.ctx.db.lock().await;
        let row = data::get_thread(&db, &self.id)?
            .ok_or_else(|| NodeError::NotFound(format!("thread {}", self.id)))?;
        Ok(row.head)
    }

    // ============ Authoring operations ============

    /// Initial JOIN by the thread creator
    pub async fn join_initial(&self) -> Result<String, NodeError> {
        let payload = self.build_join().await?;
        Ok(self.commit(payload).await?.hash)
    }

    /// JOIN after accepting an invite
    pub async fn join(&self) -> Result<String, NodeError> {
        let payload = self.build_join().await?;
        Ok(self.commit(payload).await?.hash)
    }

    /// Announce this node's contact card to the thread
    pub async fn announce(&self) -> Result<String, NodeError> {
        let (username, inboxes) = {
            let db = self.ctx.db.lock().await;
            (
                data::get_username(&db)?.unwrap_or_default(),
                cafe_inbox_ids(&db)?,
            )
        };
        let payload = BlockPayload::Announce { username, inboxes };
        Ok(self.commit(payload).await?.hash)
    }

    /// LEAVE; the caller removes local state afterwards
    pub async fn leave(&self) -> Result<String, NodeError> {
        Ok(self.commit(BlockPayload::Leave).await?.hash)
    }

    /// Add a text message
    pub async fn add_text(&self, body: &str) -> Result<String, NodeError> {
        let payload = BlockPayload::Text {
            body: body.to_string(),
        };
        Ok(self.commit(payload).await?.hash)
    }

    /// Comment on an existing block
    pub async fn add_comment(&self, target: &str, body: &str) -> Result<String, NodeError> {
        self.require_block(target).await?;
        let payload = BlockPayload::Comment {
            target: target.to_string(),
            body: body.to_string(),
        };
        Ok(self.commit(payload).await?.hash)
    }

    /// Like an existing block
    pub async fn add_like(&self, target: &str) -> Result<String, NodeError> {
        self.require_block(target).await?;
        let payload = BlockPayload::Like {
            target: target.to_string(),
        };
        Ok(self.commit(payload).await?.hash)
    }

    /// Tombstone a block locally for every member
    pub async fn add_ignore(&self, target: &str) -> Result<String, NodeError> {
        self.require_block(target).await?;
        let payload = BlockPayload::Ignore {
            target: target.to_string(),
        };
        Ok(self.commit(payload).await?.hash)
    }

    /// Report a block
    pub async fn add_flag(&self, target: &str) -> Result<String, NodeError> {
        self.require_block(target).await?;
        let payload = BlockPayload::Flag {
            target: target.to_string(),
        };
        Ok(self.commit(payload).await?.hash)
    }

    /// Share a file DAG into the thread
    pub async fn add_files(
        &self,
        node: &ObjectNode,
        keys: Keys,
        caption: &str,
    ) -> Result<String, NodeError> {
        let payload = BlockPayload::File {
            target: node.id.clone(),
            keys,
            caption: caption.to_string(),
        };
        let res = self.commit(payload).await?;

        // Reference-count the shared files against this block
        let db = self.ctx.db.lock().await;
        for link in &node.links {
            if let Ok(pair) = self.ctx.object.node_at_link(link) {
                if let Some(d) = self.ctx.object.resolve_link(&pair, crate::files::DATA_LINK) {
                    if data::get_file(&db, &d.id)?.is_some() {
                        data::add_file_target(&db, &d.id, &res.hash)?;
                    }
                }
            }
        }
        Ok(res.hash)
    }

    // ============ Commit ============

    /// Build, sign, encrypt, store, index, and fan out a block
    pub(crate) async fn commit(&self, payload: BlockPayload) -> Result<CommitResult, NodeError> {
        let _guard = self.mux.lock().await;
        self.commit_locked(payload).await
    }

    /// Commit while the per-thread mutex is already held
    pub(crate) async fn commit_locked(
        &self,
        payload: BlockPayload,
    ) -> Result<CommitResult, NodeError> {
        let (parents, head_date) = {
            let db = self.ctx.db.lock().await;
            let row = data::get_thread(&db, &self.id)?
                .ok_or_else(|| NodeError::NotFound(format!("thread {}", self.id)))?;
            if row.head.is_empty() {
                (Vec::new(), 0)
            } else {
                let head_date = data::get_block(&db, &row.head)?.map(|b| b.date).unwrap_or(0);
                (vec![row.head], head_date)
            }
        };

        // Monotonic wall-clock: never behind the head we extend
        let date = std::cmp::max(data::current_timestamp(), head_date + 1);
        let header = BlockHeader {
            author: self.ctx.account.peer_id(),
            address: self.ctx.account.address().to_string(),
            parents,
            date,
        };
        let signature = self
            .ctx
            .account
            .sign(&ThreadBlock::signing_bytes(&header, &payload));
        let block = ThreadBlock {
            header,
            payload,
            signature,
        };

        let sealed = block.seal(&self.key)?;
        let hash = self.ctx.object.add_bytes(&sealed, true)?;

        {
            let mut db = self.ctx.db.lock().await;
            index_block(&mut db, &hash, &self.id, &block)?;
            self.advance_head(&db, &hash)?;
        }

        debug!(
            thread = %self.id,
            block = %hash,
            block_type = %block.payload.block_type(),
            "committed block"
        );

        self.emit_thread_update(&hash).await;
        self.post(&hash, &sealed).await?;
        Ok(CommitResult { hash, block })
    }

    /// Record the new head and queue cafe backups for it
    pub(crate) fn advance_head(&self, db: &Connection, hash: &str) -> Result<(), NodeError> {
        data::update_thread_head(db, &self.id, hash)?;

        for session in data::list_cafe_sessions(db)? {
            let now = data::current_timestamp();
            let store = data::CafeRequest {
                id: request_id(&session.cafe_id, hash, "store"),
                peer_id: self.ctx.account.peer_id(),
                target_id: hash.to_string(),
                cafe_id: session.cafe_id.clone(),
                request_type: data::CafeRequestType::Store,
                date: now,
                attempts: 0,
            };
            let snapshot = data::CafeRequest {
                id: request_id(&session.cafe_id, &self.id, "thread"),
                peer_id: self.ctx.account.peer_id(),
                target_id: self.id.clone(),
                cafe_id: session.cafe_id,
                request_type: data::CafeRequestType::StoreThread,
                date: now,
                attempts: 0,
            };
            for req in [store, snapshot] {
                if let Err(e) = data::add_cafe_request(db, &req) {
                    if !data::is_conflict(&e) {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Fan out a committed envelope to every other thread peer.
    ///
    /// Fire-and-forget: a peer that cannot be reached right now gets an
    /// outbox row and the queues take over.
    pub(crate) async fn post(&self, hash: &str, sealed: &[u8]) -> Result<(), NodeError> {
        let wire = WireEnvelope {
            thread_id: self.id.clone(),
            ciphertext: sealed.to_vec(),
        }
        .encode();

        let self_id = self.ctx.account.peer_id();
        let peers = {
            let db = self.ctx.db.lock().await;
            data::list_thread_peers(&db, &self.id)?
        };

        for peer in peers.iter().filter(|p| p.peer_id != self_id) {
            match self.ctx.object.publish(&peer.peer_id, &wire) {
                Ok(()) => {
                    debug!(thread = %self.id, peer = %peer.peer_id, block = %hash, "posted block");
                }
                Err(e) => {
                    debug!(
                        thread = %self.id,
                        peer = %peer.peer_id,
                        block = %hash,
                        error = %e,
                        "direct post failed, queueing"
                    );
                    let db = self.ctx.db.lock().await;
                    data::add_outbox_row(&db, hash, &peer.peer_id, data::current_timestamp())?;
                }
            }
        }
        Ok(())
    }

    /// Send our current head directly to one peer (no fan-out)
    pub(crate) async fn welcome(&self, peer_id: &str) -> Result<(), NodeError> {
        let head = self.head().await?;
        if head.is_empty() {
            return Ok(());
        }
        let sealed = self.ctx.object.data_at_path(&head)?;
        let wire = WireEnvelope {
            thread_id: self.id.clone(),
            ciphertext: sealed,
        }
        .encode();
        if let Err(e) = self.ctx.object.publish(peer_id, &wire) {
            warn!(thread = %self.id, peer = %peer_id, error = %e, "welcome not delivered");
            let db = self.ctx.db.lock().await;
            data::add_outbox_row(&db, &head, peer_id, data::current_timestamp())?;
        }
        Ok(())
    }

    pub(crate) async fn emit_thread_update(&self, hash: &str) {
        let block = {
            let db = self.ctx.db.lock().await;
            data::get_block(&db, hash).ok().flatten()
        };
        if let Some(block) = block {
            self.ctx.channels.thread_updates.send(ThreadUpdate {
                block,
                thread_id: self.id.clone(),
                thread_name: self.name.clone(),
            });
        }
    }

    async fn build_join(&self) -> Result<BlockPayload, NodeError> {
        let db = self.ctx.db.lock().await;
        Ok(BlockPayload::Join {
            username: data::get_username(&db)?.unwrap_or_default(),
            inboxes: cafe_inbox_ids(&db)?,
        })
    }

    async fn require_block(&self, id: &str) -> Result<(), NodeError> {
        let db = self.ctx.db.lock().await;
        match data::get_block(&db, id)? {
            Some(b) if b.thread_id == self.id => Ok(()),
            Some(_) => Err(NodeError::InvalidInput(format!(
                "block {} belongs to another thread",
                id
            ))),
            None => Err(NodeError::NotFound(format!("block {}", id))),
        }
    }
}

/// Cafe ids of every active session (announced as our inboxes)
pub(crate) fn cafe_inbox_ids(db: &Connection) -> rusqlite::Result<Vec<String>> {
    Ok(data::list_cafe_sessions(db)?
        .into_iter()
        .map(|s| s.cafe_id)
        .collect())
}

/// Deterministic cafe-request id, one per (cafe, target, kind)
fn request_id(cafe_id: &str, target: &str, kind: &str) -> String {
    crate::object::multihash(format!("{}:{}:{}", cafe_id, target, kind).as_bytes())
}

/// Index a validated block into the local store
pub(crate) fn index_block(
    conn: &mut Connection,
    hash: &str,
    thread_id: &str,
    block: &ThreadBlock,
) -> Result<(), NodeError> {
    let (data_id, data_key, data_caption) = match &block.payload {
        BlockPayload::Ignore { target } | BlockPayload::Flag { target } => {
            (target.clone(), String::new(), String::new())
        }
        BlockPayload::File {
            target,
            keys: _,
            caption,
        } => (target.clone(), String::new(), caption.clone()),
        BlockPayload::Text { body } => (String::new(), String::new(), body.clone()),
        BlockPayload::Comment { target, body } => {
            (target.clone(), String::new(), body.clone())
        }
        BlockPayload::Like { target } => (target.clone(), String::new(), String::new()),
        _ => (String::new(), String::new(), String::new()),
    };

    let row = Block {
        id: hash.to_string(),
        thread_id: thread_id.to_string(),
        author_id: block.header.author.clone(),
        block_type: block.payload.block_type(),
        date: block.header.date,
        parents: block.header.parents.clone(),
        data_id,
        data_key,
        data_caption,
    };
    match data::add_block(conn, &row) {
        Ok(()) => Ok(()),
        // Concurrent index of the same hash is fine: blocks are immutable
        Err(e) if data::is_conflict(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("sk", &"[REDACTED]")
            .finish()
    }
}
