//! DM Queue (component G): store-and-forward direct messages addressed by
//! a human short-name, flushed on next sighting of the resolved node.

use crate::canon::resolve_short_name;
use crate::store::Storage;
use crate::transport::{Destination, NodeEntry, NodeKey, Transport};

/// Cap on undelivered rows drained per sighting; bounds burst sends against
/// the duty cycle.
const FLUSH_BATCH: i64 = 3;

/// Resolves `short` against the transport's live node directory and queues
/// `text` for delivery. Returns the NodeId queued to and the DMOut row id,
/// or an error line to reply to the sender.
pub fn enqueue(storage: &Storage, nodes: &[(NodeKey, NodeEntry)], short: &str, text: &str, now: i64) -> Result<(String, i64), String> {
    let Some(to_id) = resolve_short_name(nodes, short) else {
        return Err(format!("no node with short '{short}'"));
    };
    let id = storage
        .insert_dm(&to_id, text, now)
        .map_err(|e| format!("queue error: {e}"))?;
    Ok((to_id, id))
}

/// Drains up to [`FLUSH_BATCH`] undelivered rows addressed to `sender` and
/// sends each as `[DM] <body>`, marking it delivered. Called on every
/// canonicalized sighting of `sender`, before any other dispatch logic.
pub fn flush(storage: &Storage, transport: &dyn Transport, sender: &str, now: i64) {
    let pending = match storage.undelivered_dms(sender, FLUSH_BATCH) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("dm flush lookup failed for {sender}: {e}");
            return;
        }
    };
    for dm in pending {
        transport.send(&Destination::Node(sender.to_string()), &format!("[DM] {}", dm.body));
        if let Err(e) = storage.mark_dm_delivered(dm.id, now) {
            tracing::error!("failed to mark dm {} delivered: {e}", dm.id);
        }
    }
}
