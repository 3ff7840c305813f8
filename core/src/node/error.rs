//! Node errors

use crate::object::ObjectError;
use crate::security::{AccountError, CryptoError, SealError};

/// Errors surfaced by the node and its engines
#[derive(Debug)]
pub enum NodeError {
    /// Referenced entity (file, block, thread, notification) is absent
    NotFound(String),
    /// Unique-constraint violation on insert
    Conflict(String),
    /// Malformed seed, unparseable envelope, bad media type
    InvalidInput(String),
    /// Decryption failure, signature mismatch, or type mismatch on validation
    InvalidThreadBlock(String),
    /// Operation requires online state but the node is not online
    Offline,
    /// Node is stopped
    Stopped,
    /// Node is already started
    Started,
    /// Network or object-store I/O error; queues retry these
    Transient(String),
    /// Datastore error
    Store(String),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::NotFound(what) => write!(f, "not found: {}", what),
            NodeError::Conflict(what) => write!(f, "conflict: {}", what),
            NodeError::InvalidInput(what) => write!(f, "invalid input: {}", what),
            NodeError::InvalidThreadBlock(what) => write!(f, "invalid thread block: {}", what),
            NodeError::Offline => write!(f, "node is offline"),
            NodeError::Stopped => write!(f, "node is stopped"),
            NodeError::Started => write!(f, "node is started"),
            NodeError::Transient(what) => write!(f, "transient error: {}", what),
            NodeError::Store(what) => write!(f, "datastore error: {}", what),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<rusqlite::Error> for NodeError {
    fn from(e: rusqlite::Error) -> Self {
        if crate::data::is_conflict(&e) {
            NodeError::Conflict(e.to_string())
        } else {
            NodeError::Store(e.to_string())
        }
    }
}

impl From<ObjectError> for NodeError {
    fn from(e: ObjectError) -> Self {
        match e {
            ObjectError::NotFound(id) => NodeError::NotFound(id),
            ObjectError::InvalidPath(path) => NodeError::InvalidInput(path),
            ObjectError::Offline => NodeError::Offline,
            ObjectError::Unreachable(topic) => NodeError::Transient(format!("unreachable: {}", topic)),
            ObjectError::Io(e) => NodeError::Transient(e),
        }
    }
}

impl From<CryptoError> for NodeError {
    fn from(e: CryptoError) -> Self {
        NodeError::InvalidInput(e.to_string())
    }
}

impl From<SealError> for NodeError {
    fn from(e: SealError) -> Self {
        NodeError::InvalidThreadBlock(e.to_string())
    }
}

impl From<AccountError> for NodeError {
    fn from(e: AccountError) -> Self {
        NodeError::InvalidInput(e.to_string())
    }
}

impl From<postcard::Error> for NodeError {
    fn from(e: postcard::Error) -> Self {
        NodeError::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(NodeError::Offline.to_string(), "node is offline");
        assert_eq!(NodeError::Stopped.to_string(), "node is stopped");
        assert_eq!(
            NodeError::NotFound("block b1".to_string()).to_string(),
            "not found: block b1"
        );
    }

    #[test]
    fn test_conflict_mapping() {
        let conn = crate::data::start_memory_db().unwrap();
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
        assert!(matches!(NodeError::from(err), NodeError::Conflict(_)));
    }

    #[test]
    fn test_object_error_mapping() {
        assert!(matches!(
            NodeError::from(ObjectError::Offline),
            NodeError::Offline
        ));
        assert!(matches!(
            NodeError::from(ObjectError::NotFound("x".into())),
            NodeError::NotFound(_)
        ));
        assert!(matches!(
            NodeError::from(ObjectError::Unreachable("t".into())),
            NodeError::Transient(_)
        ));
    }
}
