//! Head evaluation and merging
//!
//! After a block is indexed, the thread's heads are the blocks nothing else
//! extends. One head advances the thread pointer; several concurrent heads
//! are joined by a MERGE block whose parents are the heads sorted on raw
//! hash bytes.
//!
//! A MERGE is deterministic: empty author, empty signature, date equal to
//! the newest parent, plaintext envelope. Every member that observes the
//! same fork constructs a byte-identical MERGE, so it needs no fan-out -
//! both sides already have it under the same content address.

use tracing::debug;

use crate::data;
use crate::node::NodeError;

use super::envelope::{BlockHeader, BlockPayload, ThreadBlock};
use super::{index_block, Thread};

/// Re-evaluate heads; assumes the per-thread mutex is held.
pub(crate) async fn evaluate_heads(thread: &Thread) -> Result<(), NodeError> {
    loop {
        let heads = {
            let db = thread.context().db.lock().await;
            data::thread_heads(&db, &thread.id)?
        };

        match heads.len() {
            0 => return Ok(()),
            1 => {
                let db = thread.context().db.lock().await;
                let current = data::get_thread(&db, &thread.id)?
                    .map(|t| t.head)
                    .unwrap_or_default();
                if current != heads[0] {
                    thread.advance_head(&db, &heads[0])?;
                }
                return Ok(());
            }
            n => {
                debug!(thread = %thread.id, heads = n, "merging concurrent heads");
                merge_heads(thread, heads).await?;
                // Loop: the merge becomes the single head (or joins a fork
                // that appeared meanwhile)
            }
        }
    }
}

/// Commit a deterministic MERGE over the given heads
async fn merge_heads(thread: &Thread, heads: Vec<String>) -> Result<(), NodeError> {
    let date = {
        let db = thread.context().db.lock().await;
        let mut max_date = 0;
        for head in &heads {
            if let Some(block) = data::get_block(&db, head)? {
                max_date = std::cmp::max(max_date, block.date);
            }
        }
        max_date
    };

    let block = ThreadBlock {
        header: BlockHeader {
            author: String::new(),
            address: String::new(),
            parents: heads,
            date,
        },
        payload: BlockPayload::Merge,
        signature: Vec::new(),
    };

    let sealed = block.seal(&thread.block_key())?;
    let hash = thread.context().object.add_bytes(&sealed, true)?;

    {
        let mut db = thread.context().db.lock().await;
        index_block(&mut db, &hash, &thread.id, &block)?;
        thread.advance_head(&db, &hash)?;
    }

    debug!(thread = %thread.id, block = %hash, "merge committed");
    thread.emit_thread_update(&hash).await;
    Ok(())
}
