//! Helper functions shared across queue submodules.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::decode_item_record;
use crate::item_key::{QueueId, QueueItemKey, Sequence};
use crate::keys::parse_queue_item_key;
use crate::queue::{QueueError, QueueItem};

/// Get current epoch time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Build a [`QueueItem`] from a stored value under a known key.
pub(crate) fn item_from_record(key: QueueItemKey, raw: &[u8]) -> Result<QueueItem, QueueError> {
    let record = decode_item_record(raw)?;
    Ok(QueueItem {
        key,
        payload: record.payload,
        enqueued_at_ms: record.enqueued_at_ms,
    })
}

/// Rebuild the item key from a raw store key found by a scan of `queue_id`'s items.
pub(crate) fn item_key_from_store(
    queue_id: &QueueId,
    store_key: &[u8],
) -> Result<QueueItemKey, QueueError> {
    let parsed = parse_queue_item_key(store_key)
        .filter(|p| p.queue_id == queue_id.as_str())
        .ok_or_else(|| QueueError::MalformedItemKey(queue_id.to_string()))?;
    let sequence = Sequence::from_stored(parsed.sequence)?;
    Ok(QueueItemKey::from_parts(queue_id.clone(), sequence))
}
