//! Periodic queue flush
//!
//! One long-lived worker drains all three queues on a timer: the thread
//! outbox, the cafe outbox, and the cafe inbox poll. The period comes from
//! the node config (1 min on mobile, 10 min otherwise).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;

use crate::queue::{CafeInbox, CafeOutbox, ThreadsOutbox};

/// Run the flush loop until `running` flips false.
///
/// Flushes once immediately so a fresh start drains whatever the previous
/// run left queued.
pub async fn run_flush_task(
    threads_outbox: Arc<ThreadsOutbox>,
    cafe_outbox: Arc<CafeOutbox>,
    cafe_inbox: Arc<CafeInbox>,
    running: Arc<RwLock<bool>>,
    period: Duration,
) {
    info!(period_secs = period.as_secs(), "queue flush task started");

    let mut timer = tokio::time::interval(period);
    loop {
        timer.tick().await;
        if !*running.read().await {
            break;
        }

        threads_outbox.flush().await;
        cafe_outbox.flush().await;
        cafe_inbox.check_messages().await;
    }

    info!("queue flush task stopped");
}
