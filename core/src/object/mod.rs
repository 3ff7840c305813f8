//! Content-addressed object store adapter
//!
//! The engine talks to the DAG network through this trait: add bytes, build
//! directory nodes, pin, resolve paths, and publish/subscribe topic channels.
//! Everything is keyed by multihash (base58 SHA-256 here). The embedded
//! network node that implements this in production lives outside the crate;
//! [`memory::MemoryStore`] implements it for tests and offline use.

pub mod memory;

pub use memory::{MemoryBus, MemoryStore};

use sha2::{Digest, Sha256};

/// Compute the multihash content id for a payload
pub fn multihash(data: &[u8]) -> String {
    bs58::encode(Sha256::digest(data)).into_string()
}

/// Object store error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// No object stored under the id or path
    NotFound(String),
    /// Path does not parse or traverses a non-directory
    InvalidPath(String),
    /// The store has no network (offline node)
    Offline,
    /// The destination topic has no listener
    Unreachable(String),
    /// Underlying storage failure
    Io(String),
}

impl std::fmt::Display for ObjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectError::NotFound(id) => write!(f, "object not found: {}", id),
            ObjectError::InvalidPath(path) => write!(f, "invalid object path: {}", path),
            ObjectError::Offline => write!(f, "object store is offline"),
            ObjectError::Unreachable(topic) => write!(f, "no listener on topic: {}", topic),
            ObjectError::Io(e) => write!(f, "object store io error: {}", e),
        }
    }
}

impl std::error::Error for ObjectError {}

/// A named link inside a directory node
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    pub name: String,
    /// Multihash of the linked object
    pub id: String,
    pub size: u64,
}

/// A resolved directory node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNode {
    /// Multihash of the node's canonical encoding
    pub id: String,
    pub links: Vec<Link>,
}

/// An unfinalized directory under construction
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub links: Vec<Link>,
}

impl Directory {
    /// Canonical encoding: links sorted by name, postcard-serialised.
    ///
    /// Hashing this encoding makes directory ids independent of insertion
    /// order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut sorted = self.links.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        postcard::to_allocvec(&sorted).unwrap_or_default()
    }
}

/// Capability set the engine requires from the object-store network.
///
/// All calls are synchronous from the engine's perspective; network errors
/// propagate as [`ObjectError`].
pub trait ObjectStore: Send + Sync {
    /// This node's peer id on the network
    fn local_id(&self) -> String;

    /// Add a blob, returning its multihash
    fn add_bytes(&self, data: &[u8], pin: bool) -> Result<String, ObjectError>;

    /// Start a new directory
    fn new_directory(&self) -> Directory {
        Directory::default()
    }

    /// Add a blob and link it into a directory. Returns the blob's multihash.
    fn add_bytes_to_dir(
        &self,
        dir: &mut Directory,
        name: &str,
        data: &[u8],
    ) -> Result<String, ObjectError> {
        let id = self.add_bytes(data, false)?;
        dir.links.push(Link {
            name: name.to_string(),
            id,
            size: data.len() as u64,
        });
        Ok(dir.links.last().expect("just pushed").id.clone())
    }

    /// Link an existing object into a directory
    fn add_link_to_dir(
        &self,
        dir: &mut Directory,
        name: &str,
        child: &str,
    ) -> Result<(), ObjectError>;

    /// Store the directory node, returning it with its multihash
    fn finalize_dir(&self, dir: Directory, pin: bool) -> Result<ObjectNode, ObjectError>;

    /// Pin an object; `recursive` follows directory links
    fn pin(&self, id: &str, recursive: bool) -> Result<(), ObjectError>;

    /// Unpin whatever a path resolves to
    fn unpin_path(&self, path: &str) -> Result<(), ObjectError>;

    /// Raw bytes behind a path (`<hash>` or `<hash>/<name>/...`)
    fn data_at_path(&self, path: &str) -> Result<Vec<u8>, ObjectError>;

    /// Links of the directory node behind a path
    fn links_at_path(&self, path: &str) -> Result<Vec<Link>, ObjectError>;

    /// Resolve a link to its directory node
    fn node_at_link(&self, link: &Link) -> Result<ObjectNode, ObjectError>;

    /// Find a named link on a node
    fn resolve_link(&self, node: &ObjectNode, name: &str) -> Option<Link> {
        node.links.iter().find(|l| l.name == name).cloned()
    }

    /// Publish bytes on a topic channel
    fn publish(&self, topic: &str, data: &[u8]) -> Result<(), ObjectError>;

    /// Subscribe to a topic channel
    fn subscribe(&self, topic: &str) -> tokio::sync::mpsc::Receiver<Vec<u8>>;
}
