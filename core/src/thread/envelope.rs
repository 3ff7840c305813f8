//! Thread block envelopes
//!
//! A block travels as `ThreadBlock { header, payload, signature }`,
//! postcard-serialised and then AES-256-CTR encrypted under the thread key.
//! The signature covers the serialised (header, payload) pair and verifies
//! under the author's peer id.
//!
//! MERGE blocks are the one exception: they are deterministic structural
//! joins that every member must construct byte-identically, so they carry no
//! signature and skip envelope encryption (a random IV would fork their
//! content address).

use serde::{Deserialize, Serialize};

use crate::data::BlockType;
use crate::files::Keys;
use crate::node::NodeError;
use crate::security::{decrypt_aes, encrypt_aes, verify_with_peer_id};

/// Envelope header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Author's peer id; empty on MERGE
    pub author: String,
    /// Author's account address; empty on MERGE
    pub address: String,
    /// Heads this block extends; empty on an initial JOIN
    pub parents: Vec<String>,
    /// Unix seconds
    pub date: i64,
}

/// Typed block payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockPayload {
    /// Structural join of concurrent heads
    Merge,
    /// Tombstone a block locally
    Ignore { target: String },
    /// Report a block; no automatic action
    Flag { target: String },
    /// Author joined the thread
    Join { username: String, inboxes: Vec<String> },
    /// Author's contact card changed
    Announce { username: String, inboxes: Vec<String> },
    /// Author left the thread
    Leave,
    /// A shared file DAG
    File {
        target: String,
        keys: Keys,
        caption: String,
    },
    Text { body: String },
    Comment { target: String, body: String },
    Like { target: String },
    /// Thread credentials for an invitee; sealed, never broadcast
    Invite { name: String, sk: Vec<u8> },
}

impl BlockPayload {
    /// The block type this payload indexes as
    pub fn block_type(&self) -> BlockType {
        match self {
            BlockPayload::Merge => BlockType::Merge,
            BlockPayload::Ignore { .. } => BlockType::Ignore,
            BlockPayload::Flag { .. } => BlockType::Flag,
            BlockPayload::Join { .. } => BlockType::Join,
            BlockPayload::Announce { .. } => BlockType::Announce,
            BlockPayload::Leave => BlockType::Leave,
            BlockPayload::File { .. } => BlockType::File,
            BlockPayload::Text { .. } => BlockType::Text,
            BlockPayload::Comment { .. } => BlockType::Comment,
            BlockPayload::Like { .. } => BlockType::Like,
            BlockPayload::Invite { .. } => BlockType::Invite,
        }
    }
}

/// A signed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadBlock {
    pub header: BlockHeader,
    pub payload: BlockPayload,
    /// Ed25519 signature over the serialised (header, payload); empty on MERGE
    pub signature: Vec<u8>,
}

impl ThreadBlock {
    /// The bytes the signature covers
    pub fn signing_bytes(header: &BlockHeader, payload: &BlockPayload) -> Vec<u8> {
        postcard::to_allocvec(&(header, payload)).unwrap_or_default()
    }

    /// Serialise the block
    pub fn encode(&self) -> Vec<u8> {
        postcard::to_allocvec(self).unwrap_or_default()
    }

    /// Deserialise a block
    pub fn decode(bytes: &[u8]) -> Result<Self, NodeError> {
        postcard::from_bytes(bytes)
            .map_err(|e| NodeError::InvalidThreadBlock(format!("undecodable block: {}", e)))
    }

    /// Serialise and encrypt under the thread key.
    ///
    /// MERGE blocks serialise without encryption so their content address is
    /// identical on every member.
    pub fn seal(&self, thread_key: &[u8; 32]) -> Result<Vec<u8>, NodeError> {
        let plain = self.encode();
        if matches!(self.payload, BlockPayload::Merge) {
            return Ok(plain);
        }
        Ok(encrypt_aes(&plain, thread_key)?)
    }

    /// Decrypt and deserialise an envelope.
    ///
    /// Falls back to a plaintext decode for MERGE blocks; any other block
    /// type arriving unencrypted is invalid.
    pub fn unseal(data: &[u8], thread_key: &[u8; 32]) -> Result<Self, NodeError> {
        if let Ok(plain) = decrypt_aes(data, thread_key) {
            if let Ok(block) = Self::decode(&plain) {
                return Ok(block);
            }
        }
        let block = Self::decode(data)?;
        if matches!(block.payload, BlockPayload::Merge) {
            Ok(block)
        } else {
            Err(NodeError::InvalidThreadBlock(
                "unencrypted non-merge block".to_string(),
            ))
        }
    }

    /// Verify the signature against the header author.
    ///
    /// MERGE blocks are unsigned; anything else with an empty signature is
    /// rejected.
    pub fn verify(&self) -> Result<(), NodeError> {
        if matches!(self.payload, BlockPayload::Merge) {
            return Ok(());
        }
        let message = Self::signing_bytes(&self.header, &self.payload);
        verify_with_peer_id(&self.header.author, &message, &self.signature)
            .map_err(|e| NodeError::InvalidThreadBlock(e.to_string()))
    }
}

/// Transport wrapper: names the thread so the receiver can pick the key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub thread_id: String,
    /// Sealed `ThreadBlock` bytes; their multihash is the block id
    pub ciphertext: Vec<u8>,
}

impl WireEnvelope {
    pub fn encode(&self) -> Vec<u8> {
        postcard::to_allocvec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NodeError> {
        postcard::from_bytes(bytes)
            .map_err(|e| NodeError::InvalidThreadBlock(format!("undecodable envelope: {}", e)))
    }
}
