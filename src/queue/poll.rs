//! Dequeue and peek.

use tracing::{debug, warn};

use crate::cache::CacheTxn;
use crate::header::QueueHeader;
use crate::keys::{queue_item_key, queue_items_prefix};
use crate::queue::helpers::{item_from_record, item_key_from_store};
use crate::queue::{GridQueue, QueueError, QueueItem};

impl GridQueue {
    /// Remove and return the item with the smallest live sequence.
    ///
    /// Sequences reserved without an item and items removed out of order are
    /// skipped. Returns `None` when the queue is empty.
    pub async fn poll(&self) -> Result<Option<QueueItem>, QueueError> {
        let item = self
            .retry_conflicts("poll", |_| async move {
                let txn = self.begin().await?;
                let mut header = self.load_header(&txn).await?;
                let Some(item) = self.first_live(&txn, &header).await? else {
                    if header.len > 0 {
                        warn!(
                            queue = %self.queue_id,
                            len = header.len,
                            head = header.head,
                            tail = header.tail,
                            "header counts live items but none are stored, resetting"
                        );
                        header.record_clear();
                        self.store_header(&txn, &header)?;
                        txn.commit().await?;
                    }
                    return Ok(None);
                };
                txn.delete(&item.key)?;
                header.record_poll(item.key.sequence());
                self.store_header(&txn, &header)?;
                txn.commit().await?;
                Ok(Some(item))
            })
            .await?;

        if let Some(item) = &item {
            debug!(queue = %self.queue_id, sequence = %item.key.sequence(), "polled item");
        }
        Ok(item)
    }

    /// Return the item [`poll`](Self::poll) would remove, leaving it in place.
    pub async fn peek(&self) -> Result<Option<QueueItem>, QueueError> {
        self.retry_conflicts("peek", |_| async move {
            let txn = self.begin().await?;
            let header = self.load_header(&txn).await?;
            self.first_live(&txn, &header).await
        })
        .await
    }

    /// Smallest live item at or above `header.head` in `txn`'s snapshot.
    async fn first_live(
        &self,
        txn: &CacheTxn,
        header: &QueueHeader,
    ) -> Result<Option<QueueItem>, QueueError> {
        if header.len == 0 {
            return Ok(None);
        }
        let prefix = queue_items_prefix(self.queue_id.as_str());
        let start = queue_item_key(self.queue_id.as_str(), header.head);
        let found = txn.scan_prefix_from(&prefix, start, Some(1)).await?;

        match found.into_iter().next() {
            Some((store_key, raw)) => {
                let key = item_key_from_store(&self.queue_id, &store_key)?;
                Ok(Some(item_from_record(key, &raw)?))
            }
            None => Ok(None),
        }
    }
}
