//! In-memory cafe transport
//!
//! Simulates a single cafe: pins objects, stores thread snapshots, queues
//! inbox envelopes per recipient. Failures can be injected to exercise
//! retry and terminal-error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::data::{current_timestamp, CafeSession};
use crate::queue::{CafeEnvelope, CafeError, CafeTransport};

/// Session lifetime handed out by the memory cafe
const SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// A simulated cafe
pub struct MemoryCafe {
    id: String,
    pinned: Mutex<HashMap<String, Vec<u8>>>,
    snapshots: Mutex<HashMap<(String, String), Vec<u8>>>,
    inboxes: Mutex<HashMap<String, Vec<CafeEnvelope>>>,
    next_message: AtomicU64,
    /// When set, every call fails with a clone of this error
    inject_failure: Mutex<Option<CafeError>>,
}

impl MemoryCafe {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            pinned: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            inboxes: Mutex::new(HashMap::new()),
            next_message: AtomicU64::new(0),
            inject_failure: Mutex::new(None),
        }
    }

    /// The cafe's peer id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Make every subsequent call fail with `error` (None restores service)
    pub fn fail_with(&self, error: Option<CafeError>) {
        *self.inject_failure.lock().expect("failure lock") = error;
    }

    /// Whether the cafe pinned an object (test inspection)
    pub fn has_pinned(&self, id: &str) -> bool {
        self.pinned.lock().expect("pinned lock").contains_key(id)
    }

    /// Whether the cafe holds a thread snapshot for a client
    pub fn has_snapshot(&self, client: &str, thread_id: &str) -> bool {
        self.snapshots
            .lock()
            .expect("snapshots lock")
            .contains_key(&(client.to_string(), thread_id.to_string()))
    }

    /// Number of envelopes waiting for a recipient
    pub fn inbox_len(&self, recipient: &str) -> usize {
        self.inboxes
            .lock()
            .expect("inboxes lock")
            .get(recipient)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    fn check_failure(&self) -> Result<(), CafeError> {
        match &*self.inject_failure.lock().expect("failure lock") {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn check_session(&self, session: &CafeSession) -> Result<(), CafeError> {
        if session.cafe_id != self.id {
            return Err(CafeError::NoSession(session.cafe_id.clone()));
        }
        Ok(())
    }
}

impl CafeTransport for MemoryCafe {
    fn register(
        &self,
        cafe_id: &str,
        peer_id: &str,
        _address: &str,
    ) -> Result<CafeSession, CafeError> {
        self.check_failure()?;
        if cafe_id != self.id {
            return Err(CafeError::Unreachable(cafe_id.to_string()));
        }
        Ok(CafeSession {
            cafe_id: self.id.clone(),
            access: format!("access-{}", peer_id),
            refresh: format!("refresh-{}", peer_id),
            expiry: current_timestamp() + SESSION_TTL_SECS,
            http_addr: format!("memory://{}", self.id),
            swarm_addrs: Vec::new(),
        })
    }

    fn store(&self, session: &CafeSession, id: &str, data: &[u8]) -> Result<(), CafeError> {
        self.check_failure()?;
        self.check_session(session)?;
        self.pinned
            .lock()
            .expect("pinned lock")
            .insert(id.to_string(), data.to_vec());
        Ok(())
    }

    fn store_thread(
        &self,
        session: &CafeSession,
        thread_id: &str,
        snapshot: &[u8],
    ) -> Result<(), CafeError> {
        self.check_failure()?;
        self.check_session(session)?;
        let client = session
            .access
            .strip_prefix("access-")
            .unwrap_or(&session.access)
            .to_string();
        self.snapshots
            .lock()
            .expect("snapshots lock")
            .insert((client, thread_id.to_string()), snapshot.to_vec());
        Ok(())
    }

    fn deliver(
        &self,
        cafe_id: &str,
        recipient: &str,
        from: &str,
        envelope: &[u8],
    ) -> Result<(), CafeError> {
        self.check_failure()?;
        if cafe_id != self.id {
            return Err(CafeError::Unreachable(cafe_id.to_string()));
        }
        let id = format!(
            "{}-msg-{}",
            self.id,
            self.next_message.fetch_add(1, Ordering::Relaxed)
        );
        self.inboxes
            .lock()
            .expect("inboxes lock")
            .entry(recipient.to_string())
            .or_default()
            .push(CafeEnvelope {
                id,
                from: from.to_string(),
                envelope: envelope.to_vec(),
            });
        Ok(())
    }

    fn check_messages(&self, session: &CafeSession) -> Result<Vec<CafeEnvelope>, CafeError> {
        self.check_failure()?;
        self.check_session(session)?;
        let client = session
            .access
            .strip_prefix("access-")
            .unwrap_or(&session.access);
        Ok(self
            .inboxes
            .lock()
            .expect("inboxes lock")
            .get(client)
            .cloned()
            .unwrap_or_default())
    }

    fn delete_messages(&self, session: &CafeSession, ids: &[String]) -> Result<(), CafeError> {
        self.check_failure()?;
        self.check_session(session)?;
        let client = session
            .access
            .strip_prefix("access-")
            .unwrap_or(&session.access)
            .to_string();
        if let Some(inbox) = self.inboxes.lock().expect("inboxes lock").get_mut(&client) {
            inbox.retain(|e| !ids.contains(&e.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_store() {
        let cafe = MemoryCafe::new("cafe1");
        let session = cafe.register("cafe1", "peer1", "addr1").unwrap();
        assert_eq!(session.cafe_id, "cafe1");

        cafe.store(&session, "obj1", b"bytes").unwrap();
        assert!(cafe.has_pinned("obj1"));
    }

    #[test]
    fn test_register_wrong_cafe() {
        let cafe = MemoryCafe::new("cafe1");
        assert!(matches!(
            cafe.register("other", "peer1", "addr1"),
            Err(CafeError::Unreachable(_))
        ));
    }

    #[test]
    fn test_snapshot() {
        let cafe = MemoryCafe::new("cafe1");
        let session = cafe.register("cafe1", "peer1", "addr1").unwrap();
        cafe.store_thread(&session, "t1", b"snapshot").unwrap();
        assert!(cafe.has_snapshot("peer1", "t1"));
    }

    #[test]
    fn test_inbox_flow() {
        let cafe = MemoryCafe::new("cafe1");
        cafe.deliver("cafe1", "bob", "alice", b"env1").unwrap();
        cafe.deliver("cafe1", "bob", "alice", b"env2").unwrap();
        assert_eq!(cafe.inbox_len("bob"), 2);

        let session = cafe.register("cafe1", "bob", "addr").unwrap();
        let msgs = cafe.check_messages(&session).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].from, "alice");

        cafe.delete_messages(&session, &[msgs[0].id.clone()]).unwrap();
        assert_eq!(cafe.inbox_len("bob"), 1);
    }

    #[test]
    fn test_injected_failure() {
        let cafe = MemoryCafe::new("cafe1");
        let session = cafe.register("cafe1", "peer1", "addr").unwrap();

        cafe.fail_with(Some(CafeError::Http(503, "down".into())));
        assert!(cafe.store(&session, "o", b"x").is_err());

        cafe.fail_with(None);
        cafe.store(&session, "o", b"x").unwrap();
    }
}
