//! Node update events
//!
//! Three broadcast streams leave the node: node-level updates (thread
//! added/removed), per-block thread updates, and notifications. Channels are
//! bounded at a small capacity and drop the oldest item on overflow - a slow
//! subscriber lags, it never blocks the engine.

use tokio::sync::broadcast;

use crate::data::{Block, Notification};

/// Broadcast channel capacity; overflow drops the oldest item
pub const CHANNEL_CAPACITY: usize = 10;

/// A node-level update
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Update {
    /// Subject id (thread id, peer id)
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub update_type: UpdateType,
}

/// Kind of node-level update
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpdateType {
    ThreadAdded,
    ThreadRemoved,
    AccountPeerAdded,
    AccountPeerRemoved,
}

/// A per-block thread update, streamed to subscribers as JSON
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ThreadUpdate {
    pub block: Block,
    pub thread_id: String,
    pub thread_name: String,
}

/// A bounded drop-oldest broadcast sender
///
/// Sends never block and never fail: with no subscribers the event is simply
/// dropped, and a full channel discards its oldest item.
#[derive(Clone)]
pub struct Broadcaster<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Emit an event
    pub fn send(&self, event: T) {
        let _ = self.tx.send(event);
    }

    /// Subscribe; receivers that fall behind observe a Lagged gap
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The node's broadcast set
#[derive(Clone, Default)]
pub struct NodeChannels {
    pub updates: Broadcaster<Update>,
    pub thread_updates: Broadcaster<ThreadUpdate>,
    pub notifications: Broadcaster<Notification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_update(i: usize) -> Update {
        Update {
            id: format!("t{}", i),
            name: "alpha".to_string(),
            update_type: UpdateType::ThreadAdded,
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let b: Broadcaster<Update> = Broadcaster::new();
        let mut rx = b.subscribe();
        b.send(test_update(1));
        assert_eq!(rx.recv().await.unwrap().id, "t1");
    }

    #[test]
    fn test_send_without_subscribers_is_fine() {
        let b: Broadcaster<Update> = Broadcaster::new();
        b.send(test_update(1));
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let b: Broadcaster<Update> = Broadcaster::new();
        let mut rx = b.subscribe();

        for i in 0..(CHANNEL_CAPACITY + 5) {
            b.send(test_update(i));
        }

        // The receiver lagged: oldest items are gone, the stream resumes
        // at the first retained event
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n as usize, 5),
            other => panic!("expected lag, got {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap().id, "t5");
    }

    #[test]
    fn test_update_serialises_with_type_tag() {
        let json = serde_json::to_string(&test_update(1)).unwrap();
        assert!(json.contains("\"type\":\"ThreadAdded\""));
    }
}
