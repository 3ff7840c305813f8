//! Offline message queues
//!
//! - `thread_outbox` (per-peer direct deliveries with cafe fallback)
//! - `cafe_outbox` (requests against cafes: pin, snapshot, inbox drop-off)
//! - `cafe_inbox` (periodic poll of authorised cafes for pending envelopes)
//!
//! All three are drained by the supervisor's periodic flush tick and retry
//! with exponential backoff.

pub mod cafe_inbox;
pub mod cafe_outbox;
pub mod thread_outbox;

pub use cafe_inbox::CafeInbox;
pub use cafe_outbox::CafeOutbox;
pub use thread_outbox::ThreadsOutbox;

use crate::data::CafeSession;

/// An envelope fetched from a cafe inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CafeEnvelope {
    /// The cafe's message id, used to acknowledge deletion
    pub id: String,
    /// Sender peer id as recorded by the cafe
    pub from: String,
    /// The wire envelope bytes
    pub envelope: Vec<u8>,
}

/// Cafe transport error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CafeError {
    /// HTTP-level response; 4xx is terminal, the rest retriable
    Http(u16, String),
    /// The cafe could not be reached
    Unreachable(String),
    /// No session exists for the cafe
    NoSession(String),
}

impl CafeError {
    /// Terminal failures delete the request instead of retrying it
    pub fn is_terminal(&self) -> bool {
        matches!(self, CafeError::Http(status, _) if (400..500).contains(status))
    }
}

impl std::fmt::Display for CafeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CafeError::Http(status, body) => write!(f, "cafe returned {}: {}", status, body),
            CafeError::Unreachable(cafe) => write!(f, "cafe unreachable: {}", cafe),
            CafeError::NoSession(cafe) => write!(f, "no session with cafe: {}", cafe),
        }
    }
}

impl std::error::Error for CafeError {}

/// Client interface to a cafe's service API.
///
/// The HTTP client that implements this in production lives outside the
/// crate; `testing::MemoryCafe` implements it for tests.
pub trait CafeTransport: Send + Sync {
    /// Register this node with a cafe, opening a session
    fn register(&self, cafe_id: &str, peer_id: &str, address: &str)
        -> Result<CafeSession, CafeError>;

    /// Ask the cafe to pin an object
    fn store(&self, session: &CafeSession, id: &str, data: &[u8]) -> Result<(), CafeError>;

    /// Persist an encrypted thread snapshot at the cafe
    fn store_thread(
        &self,
        session: &CafeSession,
        thread_id: &str,
        snapshot: &[u8],
    ) -> Result<(), CafeError>;

    /// Drop an envelope into a recipient's inbox at their cafe.
    ///
    /// Needs no session: cafes accept mail for their clients from anyone.
    fn deliver(
        &self,
        cafe_id: &str,
        recipient: &str,
        from: &str,
        envelope: &[u8],
    ) -> Result<(), CafeError>;

    /// Fetch envelopes waiting in our inbox
    fn check_messages(&self, session: &CafeSession) -> Result<Vec<CafeEnvelope>, CafeError>;

    /// Acknowledge processed envelopes so the cafe drops them
    fn delete_messages(&self, session: &CafeSession, ids: &[String]) -> Result<(), CafeError>;
}

/// Exponential backoff with a cap: `base * 2^attempts`, clamped
pub(crate) fn backoff_secs(base: i64, cap: i64, attempts: i64) -> i64 {
    let shift = attempts.clamp(0, 30) as u32;
    base.saturating_mul(1i64 << shift).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_secs(60, 3600, 0), 60);
        assert_eq!(backoff_secs(60, 3600, 1), 120);
        assert_eq!(backoff_secs(60, 3600, 4), 960);
        assert_eq!(backoff_secs(60, 3600, 10), 3600);
        assert_eq!(backoff_secs(60, 3600, 62), 3600); // shift clamp, no overflow
    }

    #[test]
    fn test_terminal_errors() {
        assert!(CafeError::Http(404, String::new()).is_terminal());
        assert!(CafeError::Http(422, String::new()).is_terminal());
        assert!(!CafeError::Http(500, String::new()).is_terminal());
        assert!(!CafeError::Unreachable("c".into()).is_terminal());
        assert!(!CafeError::NoSession("c".into()).is_terminal());
    }
}
