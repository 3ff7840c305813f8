//! Thread invites
//!
//! An invite carries the thread's name and secret inside a signed INVITE
//! block, sealed so only the invitee can open it:
//!
//! - *external*: sealed to the invitee's public key; they open it with
//!   their account key
//! - *internal*: encrypted with a fresh AES key handed over out-of-band
//!
//! The sealed bytes go into the object store; the returned multihash is the
//! invite id. Invites never travel the broadcast channel.

use tracing::debug;

use crate::data;
use crate::node::NodeError;
use crate::security::{self, encrypt_aes, open_sealed, seal, Account};

use super::envelope::{BlockHeader, BlockPayload, ThreadBlock};
use super::Thread;

impl Thread {
    /// Create an invite sealed to an invitee's public key
    pub async fn create_external_invite(
        &self,
        invitee_public: &[u8; 32],
    ) -> Result<String, NodeError> {
        let block = self.build_invite_block().await?;
        let sealed = seal(invitee_public, &block.encode())?;
        let id = self.ctx.object.add_bytes(&sealed, true)?;
        debug!(thread = %self.id, invite = %id, "created external invite");
        Ok(id)
    }

    /// Create an invite under a fresh AES key, returned for out-of-band
    /// delivery
    pub async fn create_internal_invite(&self) -> Result<(String, Vec<u8>), NodeError> {
        let block = self.build_invite_block().await?;
        let key = security::generate_aes_key();
        let sealed = encrypt_aes(&block.encode(), &key)?;
        let id = self.ctx.object.add_bytes(&sealed, true)?;
        debug!(thread = %self.id, invite = %id, "created internal invite");
        Ok((id, key.to_vec()))
    }

    /// The signed INVITE block: thread credentials plus our current heads,
    /// so the invitee can replay our view of the DAG
    async fn build_invite_block(&self) -> Result<ThreadBlock, NodeError> {
        let parents = {
            let db = self.ctx.db.lock().await;
            let row = data::get_thread(&db, &self.id)?
                .ok_or_else(|| NodeError::NotFound(format!("thread {}", self.id)))?;
            if row.head.is_empty() {
                Vec::new()
            } else {
                vec![row.head]
            }
        };

        let header = BlockHeader {
            author: self.ctx.account.peer_id(),
            address: self.ctx.account.address().to_string(),
            parents,
            date: data::current_timestamp(),
        };
        let payload = BlockPayload::Invite {
            name: self.name.clone(),
            sk: self.secret().to_vec(),
        };
        let signature = self
            .ctx
            .account
            .sign(&ThreadBlock::signing_bytes(&header, &payload));
        Ok(ThreadBlock {
            header,
            payload,
            signature,
        })
    }
}

/// Open a sealed invite envelope.
///
/// With `key` the envelope is treated as internal (AES); without it, as
/// external (sealed to our account). The block must decode, verify, and be
/// of type INVITE.
pub fn open_invite(
    account: &Account,
    envelope: &[u8],
    key: Option<&[u8]>,
) -> Result<ThreadBlock, NodeError> {
    let plaintext = match key {
        Some(key) => crate::security::decrypt_aes(envelope, key)
            .map_err(|e| NodeError::InvalidThreadBlock(e.to_string()))?,
        None => open_sealed(&account.secret_key(), envelope)
            .map_err(|e| NodeError::InvalidThreadBlock(e.to_string()))?,
    };

    let block = ThreadBlock::decode(&plaintext)?;
    if !matches!(block.payload, BlockPayload::Invite { .. }) {
        return Err(NodeError::InvalidThreadBlock(
            "sealed envelope is not an invite".to_string(),
        ));
    }
    block.verify()?;
    Ok(block)
}
