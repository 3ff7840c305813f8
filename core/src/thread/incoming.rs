//! Inbound block processing
//!
//! Each received envelope is decrypted, signature-checked, deduped, replayed
//! against any missing ancestors (bounded), applied, and indexed; head
//! evaluation runs once at the end. Processing is serial per thread - the
//! per-thread mutex is taken for the whole pass.
//!
//! Malformed input is not an error to the user: validation failures map to
//! `InvalidThreadBlock`, which callers drop (logged at debug).

use tracing::{debug, warn};

use crate::data::{self, Notification, NotificationType};
use crate::files;
use crate::node::NodeError;
use crate::object::multihash;

use super::envelope::{BlockPayload, ThreadBlock};
use super::{index_block, merge, Thread};

/// A validated block ready to apply, parents first
pub(crate) struct ResolvedBlock {
    pub(crate) hash: String,
    pub(crate) block: ThreadBlock,
}

impl Thread {
    /// Process one inbound envelope (the sealed block ciphertext).
    ///
    /// Returns the block hash, or `None` if the block was already indexed.
    /// Idempotent: reprocessing a seen envelope changes nothing.
    pub async fn handle_envelope(&self, ciphertext: &[u8]) -> Result<Option<String>, NodeError> {
        let _guard = self.mux.lock().await;

        let hash = multihash(ciphertext);
        {
            let db = self.ctx.db.lock().await;
            if data::block_exists(&db, &hash)? {
                debug!(thread = %self.id, block = %hash, "duplicate envelope dropped");
                return Ok(None);
            }
        }

        let block = ThreadBlock::unseal(ciphertext, &self.key)?;
        block.verify()?;
        self.check_header(&block).await?;

        let chain = self.resolve_ancestors(&hash, &block).await?;
        for resolved in chain {
            self.apply_block(&resolved.hash, &resolved.block).await?;
        }
        self.apply_block(&hash, &block).await?;

        merge::evaluate_heads(self).await?;
        Ok(Some(hash))
    }

    /// Reject skewed clocks and ignored authors
    async fn check_header(&self, block: &ThreadBlock) -> Result<(), NodeError> {
        if matches!(block.payload, BlockPayload::Merge) {
            return Ok(());
        }

        let skew = (data::current_timestamp() - block.header.date).abs();
        if skew > self.ctx.config.max_block_skew_secs {
            return Err(NodeError::InvalidThreadBlock(format!(
                "block date skew {}s exceeds bound",
                skew
            )));
        }

        let db = self.ctx.db.lock().await;
        if data::block_ignored(&db, &self.id, &block.header.author)? {
            return Err(NodeError::InvalidThreadBlock(format!(
                "author {} is ignored",
                block.header.author
            )));
        }
        Ok(())
    }

    /// Walk unindexed parents through the object store, depth first, bounded
    /// by the ancestor budget. Returns recovered ancestors in apply order
    /// (parents before children).
    ///
    /// An ancestor that cannot be fetched or fails validation stays in the
    /// pending frontier: its descendants still index, and a later envelope
    /// may recover it.
    pub(crate) async fn resolve_ancestors(
        &self,
        child_hash: &str,
        child: &ThreadBlock,
    ) -> Result<Vec<ResolvedBlock>, NodeError> {
        let mut budget = self.ctx.config.ancestor_fetch_budget;
        let mut visiting = vec![child_hash.to_string()];
        let mut out = Vec::new();
        self.resolve_parents(child, &mut budget, &mut visiting, &mut out)
            .await?;
        Ok(out)
    }

    async fn resolve_parents(
        &self,
        block: &ThreadBlock,
        budget: &mut usize,
        visiting: &mut Vec<String>,
        out: &mut Vec<ResolvedBlock>,
    ) -> Result<(), NodeError> {
        for parent in &block.header.parents {
            if parent.is_empty() || visiting.iter().any(|v| v == parent) {
                continue;
            }
            {
                let db = self.ctx.db.lock().await;
                if data::block_exists(&db, parent)? {
                    continue;
                }
            }
            if out.iter().any(|r| &r.hash == parent) {
                continue;
            }
            if *budget == 0 {
                warn!(thread = %self.id, parent = %parent, "ancestor budget exhausted");
                return Ok(());
            }
            *budget -= 1;

            let sealed = match self.ctx.object.data_at_path(parent) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(thread = %self.id, parent = %parent, error = %e, "ancestor unavailable");
                    continue;
                }
            };
            if multihash(&sealed) != *parent {
                warn!(thread = %self.id, parent = %parent, "ancestor bytes do not match hash");
                continue;
            }
            let ancestor = match ThreadBlock::unseal(&sealed, &self.key)
                .and_then(|b| b.verify().map(|_| b))
            {
                Ok(b) => b,
                Err(e) => {
                    debug!(thread = %self.id, parent = %parent, error = %e, "invalid ancestor dropped");
                    continue;
                }
            };

            visiting.push(parent.clone());
            Box::pin(self.resolve_parents(&ancestor, budget, visiting, out)).await?;
            visiting.pop();

            out.push(ResolvedBlock {
                hash: parent.clone(),
                block: ancestor,
            });
        }
        Ok(())
    }

    /// Apply a validated block's effect and index it
    pub(crate) async fn apply_block(
        &self,
        hash: &str,
        block: &ThreadBlock,
    ) -> Result<(), NodeError> {
        let author = block.header.author.clone();
        let self_id = self.ctx.account.peer_id();

        match &block.payload {
            BlockPayload::Invite { .. } => {
                // Invites travel sealed to their recipient, never broadcast
                return Err(NodeError::InvalidThreadBlock(
                    "invite block on broadcast channel".to_string(),
                ));
            }

            BlockPayload::Join { username, inboxes } => {
                let unwelcomed = {
                    let mut db = self.ctx.db.lock().await;
                    data::add_thread_peer(
                        &db,
                        &data::ThreadPeer {
                            peer_id: author.clone(),
                            thread_id: self.id.clone(),
                            welcomed: author == self_id,
                        },
                    )?;
                    data::add_or_update_contact(
                        &db,
                        &data::Contact::new(&author, &block.header.address, username, inboxes.clone()),
                    )?;
                    index_block(&mut db, hash, &self.id, block)?;
                    data::list_unwelcomed_thread_peers(&db, &self.id)?
                        .iter()
                        .any(|p| p.peer_id == author)
                };

                if author != self_id {
                    if unwelcomed {
                        self.welcome(&author).await?;
                        let db = self.ctx.db.lock().await;
                        data::welcome_thread_peer(&db, &self.id, &author)?;
                    }
                    self.notify(hash, &author, NotificationType::PeerJoined, "joined")
                        .await?;
                }
            }

            BlockPayload::Leave => {
                {
                    let mut db = self.ctx.db.lock().await;
                    index_block(&mut db, hash, &self.id, block)?;
                    data::delete_thread_peer(&db, &self.id, &author)?;
                }
                if author != self_id {
                    self.notify(hash, &author, NotificationType::PeerLeft, "left")
                        .await?;
                }
            }

            BlockPayload::Announce { username, inboxes } => {
                let mut db = self.ctx.db.lock().await;
                data::add_or_update_contact(
                    &db,
                    &data::Contact::new(&author, &block.header.address, username, inboxes.clone()),
                )?;
                index_block(&mut db, hash, &self.id, block)?;
            }

            BlockPayload::Merge => {
                // Purely structural
                let mut db = self.ctx.db.lock().await;
                index_block(&mut db, hash, &self.id, block)?;
            }

            BlockPayload::Ignore { target } => {
                let mut db = self.ctx.db.lock().await;
                index_block(&mut db, hash, &self.id, block)?;
                // Tombstoned content disappears from notification feeds too
                data::delete_notifications_by_block(&db, target)?;
            }

            BlockPayload::Flag { .. } => {
                // Recorded for review; no automatic action
                let mut db = self.ctx.db.lock().await;
                index_block(&mut db, hash, &self.id, block)?;
            }

            BlockPayload::File { target, .. } => {
                self.validate_file_target(target)?;
                {
                    let mut db = self.ctx.db.lock().await;
                    index_block(&mut db, hash, &self.id, block)?;
                    self.record_file_targets(&db, target, hash)?;
                }
                if author != self_id {
                    self.notify(hash, &author, NotificationType::FileAdded, "added a file")
                        .await?;
                }
            }

            BlockPayload::Text { .. } => {
                {
                    let mut db = self.ctx.db.lock().await;
                    index_block(&mut db, hash, &self.id, block)?;
                }
                if author != self_id {
                    self.notify(hash, &author, NotificationType::TextAdded, "added a message")
                        .await?;
                }
            }

            BlockPayload::Comment { .. } => {
                {
                    let mut db = self.ctx.db.lock().await;
                    index_block(&mut db, hash, &self.id, block)?;
                }
                if author != self_id {
                    self.notify(hash, &author, NotificationType::CommentAdded, "commented")
                        .await?;
                }
            }

            BlockPayload::Like { .. } => {
                {
                    let mut db = self.ctx.db.lock().await;
                    index_block(&mut db, hash, &self.id, block)?;
                }
                if author != self_id {
                    self.notify(hash, &author, NotificationType::LikeAdded, "liked")
                        .await?;
                }
            }
        }

        self.emit_thread_update(hash).await;
        Ok(())
    }

    /// Shape-check a FILE target against the engine's two-level layout
    fn validate_file_target(&self, target: &str) -> Result<(), NodeError> {
        let links = self.ctx.object.links_at_path(target)?;
        for link in &links {
            let child = self.ctx.object.node_at_link(link)?;
            if files::looks_like_file_node(&child) {
                continue;
            }
            for inner in &child.links {
                let pair = self.ctx.object.node_at_link(inner)?;
                if !files::looks_like_file_node(&pair) {
                    return Err(NodeError::InvalidThreadBlock(format!(
                        "malformed file node under target {}",
                        target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reference-count locally known files against a FILE block
    fn record_file_targets(
        &self,
        db: &rusqlite::Connection,
        target: &str,
        block_hash: &str,
    ) -> Result<(), NodeError> {
        let links = self.ctx.object.links_at_path(target)?;
        for link in &links {
            let child = self.ctx.object.node_at_link(link)?;
            let pairs = if files::looks_like_file_node(&child) {
                vec![child]
            } else {
                child
                    .links
                    .iter()
                    .filter_map(|l| self.ctx.object.node_at_link(l).ok())
                    .collect()
            };
            for pair in pairs {
                if let Some(d) = self.ctx.object.resolve_link(&pair, files::DATA_LINK) {
                    if data::get_file(db, &d.id)?.is_some() {
                        data::add_file_target(db, &d.id, block_hash)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Persist and broadcast a notification for an applied block
    async fn notify(
        &self,
        block_hash: &str,
        actor: &str,
        notification_type: NotificationType,
        body: &str,
    ) -> Result<(), NodeError> {
        let notification = Notification {
            id: multihash(format!("{}:notify", block_hash).as_bytes()),
            date: data::current_timestamp(),
            actor_id: actor.to_string(),
            subject: self.name.clone(),
            subject_id: self.id.clone(),
            block_id: block_hash.to_string(),
            data_id: String::new(),
            notification_type,
            body: body.to_string(),
            read: false,
        };

        {
            let db = self.ctx.db.lock().await;
            match data::add_notification(&db, &notification) {
                Ok(()) => {}
                // Replay of a seen block must not duplicate its notification
                Err(e) if data::is_conflict(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        self.ctx.channels.notifications.send(notification);
        Ok(())
    }
}
