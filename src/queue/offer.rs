//! Enqueue.

use tracing::debug;

use crate::codec::encode_item_record;
use crate::item_key::QueueItemKey;
use crate::queue::helpers::now_epoch_ms;
use crate::queue::{GridQueue, ItemRecord, QueueError};

impl GridQueue {
    /// Append `payload` to the tail of the queue.
    ///
    /// The sequence is issued, the item written and the header updated in one
    /// partition transaction, so a sequence is never visible without its item.
    /// Returns `None` when a bounded queue is full.
    pub async fn offer(&self, payload: &[u8]) -> Result<Option<QueueItemKey>, QueueError> {
        let record = ItemRecord {
            payload: payload.to_vec(),
            enqueued_at_ms: now_epoch_ms(),
        };
        let value = encode_item_record(&record)?;
        let value = &value;

        let key = self
            .allocator
            .run_with_timeout(&self.queue_id, "offer", self.opts.timeout, |attempt| async move {
                let txn = self.begin().await?;
                let mut header = self.load_header(&txn).await?;
                if header.is_full() {
                    return Ok(None);
                }
                let sequence = self.allocator.issue(&mut header)?;
                let key = QueueItemKey::from_parts(self.queue_id.clone(), sequence);
                header.check_key(&key)?;
                header.record_insert();

                txn.put(&key, value)?;
                self.store_header(&txn, &header)?;
                txn.commit().await?;
                if attempt > 0 {
                    debug!(queue = %self.queue_id, attempt, "offer committed after retry");
                }
                Ok(Some(key))
            })
            .await?;

        match &key {
            Some(key) => debug!(
                queue = %self.queue_id,
                sequence = %key.sequence(),
                bytes = payload.len(),
                "offered item"
            ),
            None => debug!(queue = %self.queue_id, "offer rejected, queue full"),
        }
        Ok(key)
    }
}
