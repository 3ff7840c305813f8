//! Weft Core
//!
//! Core engine for Weft - a peer-to-peer, content-addressed personal data node.
//!
//! This is the foundation crate that provides:
//! - An Ed25519 account identity derived from a wallet seed
//! - Threads: append-only, DAG-structured logs shared with a set of peers
//! - A content-addressed file pipeline with deterministic transforms ("mills")
//! - Offline delivery queues backed by trusted relay peers ("cafes")
//!
//! # Module Structure
//!
//! - `node/`: Public interface (Node supervisor, config, errors, update events)
//! - `thread/`: Block DAG engine (envelopes, commit, inbound, merge, invites)
//! - `files/`: File pipeline (mills, dedup, encrypted file DAGs)
//! - `queue/`: Offline message queues (thread outbox, cafe outbox/inbox)
//! - `tasks/`: Background automation (periodic queue flush)
//! - `object/`: Content-addressed object store adapter
//! - `data/`: SQLite persistence
//! - `security/`: Cryptography (account keys, block encryption, sealed boxes)
//! - `testing/`: Test utilities
//!
//! # Quick Start
//!
//! ```ignore
//! use weft_core::{Node, NodeConfig};
//! use weft_core::security::Account;
//!
//! let account = Account::from_seed(&seed)?;
//! Node::init_repo(&config, &account)?;
//!
//! let node = Node::open(config)?;
//! node.start().await?;
//!
//! let thread = node.add_thread("alpha", None, true).await?;
//! thread.add_text("hello").await?;
//! ```

// Public interface
pub mod node;

// Engine modules
pub mod files;
pub mod queue;
pub mod thread;

// Internal modules
pub(crate) mod tasks;

// Infrastructure modules (pub for flexibility)
pub mod data;
pub mod object;
pub mod security;
pub mod testing;

// Re-export main API types for convenience
pub use node::{
    Node,
    NodeConfig,
    NodeError,
    NodeState,
    Update,
    UpdateType,
    ThreadUpdate,
};
pub use thread::{BlockPayload, ThreadBlock};
