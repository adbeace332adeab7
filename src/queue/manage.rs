//! Item lookup, iteration, clear and queue removal.

use tracing::{debug, info};

use crate::cache::CacheTxn;
use crate::header::QueueHeader;
use crate::item_key::QueueItemKey;
use crate::keys::{queue_item_key, queue_items_prefix};
use crate::queue::helpers::{item_from_record, item_key_from_store};
use crate::queue::{GridQueue, QueueError, QueueItem};

impl GridQueue {
    /// Fetch one item by key without removing it.
    ///
    /// A key of another queue fails with a routing mismatch, a sequence this
    /// queue never issued with `InvalidSequence`, and an issued but no longer
    /// stored item with [`QueueError::AlreadyConsumed`].
    pub async fn get(&self, key: &QueueItemKey) -> Result<QueueItem, QueueError> {
        key.verify_affinity(&self.affinity)?;
        self.retry_conflicts("get", |_| async move {
            let txn = self.begin().await?;
            let header = self.load_header(&txn).await?;
            header.check_key(key)?;
            match txn.get(key).await? {
                Some(raw) => item_from_record(key.clone(), &raw),
                None => Err(QueueError::AlreadyConsumed(key.clone())),
            }
        })
        .await
    }

    /// Remove one item wherever it sits in the queue. Returns `false` if it
    /// was already consumed.
    pub async fn remove_item(&self, key: &QueueItemKey) -> Result<bool, QueueError> {
        key.verify_affinity(&self.affinity)?;
        let removed = self
            .retry_conflicts("remove_item", |_| async move {
                let txn = self.begin().await?;
                let mut header = self.load_header(&txn).await?;
                header.check_key(key)?;
                if txn.get(key).await?.is_none() {
                    return Ok(false);
                }
                txn.delete(key)?;
                header.record_remove(key.sequence());
                self.store_header(&txn, &header)?;
                txn.commit().await?;
                Ok(true)
            })
            .await?;
        debug!(queue = %self.queue_id, sequence = %key.sequence(), removed, "remove item");
        Ok(removed)
    }

    /// Snapshot of every live item in FIFO order.
    pub async fn items(&self) -> Result<Vec<QueueItem>, QueueError> {
        self.retry_conflicts("items", |_| async move {
            let txn = self.begin().await?;
            let header = self.load_header(&txn).await?;
            let mut items = Vec::with_capacity(header.len as usize);
            for (store_key, raw) in self.live_entries(&txn, &header).await? {
                let key = item_key_from_store(&self.queue_id, &store_key)?;
                items.push(item_from_record(key, &raw)?);
            }
            Ok(items)
        })
        .await
    }

    /// Drop every item but keep the queue. Sequences issued so far are never
    /// reused. Returns the number of items dropped.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let cleared = self
            .retry_conflicts("clear", |_| async move {
                let txn = self.begin().await?;
                let mut header = self.load_header(&txn).await?;
                let cleared = self.delete_items(&txn, &header).await?;
                header.record_clear();
                self.store_header(&txn, &header)?;
                txn.commit().await?;
                Ok(cleared)
            })
            .await?;
        info!(queue = %self.queue_id, cleared, "cleared queue");
        Ok(cleared)
    }

    /// Delete all of the queue's items and leave its header behind as a
    /// tombstone. Any later operation through any handle fails with
    /// [`QueueError::QueueRemoved`]. Re-creating the queue resumes after the
    /// last issued sequence, so keys of the removed queue stay dead.
    pub async fn remove(&self) -> Result<(), QueueError> {
        let (dropped, tail) = self
            .retry_conflicts("remove", |_| async move {
                let txn = self.begin().await?;
                let mut header = self.load_header(&txn).await?;
                let dropped = self.delete_items(&txn, &header).await?;
                header.mark_removed();
                self.store_header(&txn, &header)?;
                txn.commit().await?;
                Ok((dropped, header.tail))
            })
            .await?;
        info!(queue = %self.queue_id, dropped, tail, "removed queue");
        Ok(())
    }

    async fn live_entries(
        &self,
        txn: &CacheTxn,
        header: &QueueHeader,
    ) -> Result<Vec<(slatedb::bytes::Bytes, slatedb::bytes::Bytes)>, QueueError> {
        let prefix = queue_items_prefix(self.queue_id.as_str());
        let start = queue_item_key(self.queue_id.as_str(), header.head);
        Ok(txn.scan_prefix_from(&prefix, start, None).await?)
    }

    async fn delete_items(&self, txn: &CacheTxn, header: &QueueHeader) -> Result<usize, QueueError> {
        let entries = self.live_entries(txn, header).await?;
        for (store_key, _) in &entries {
            let key = item_key_from_store(&self.queue_id, store_key)?;
            txn.delete(&key)?;
        }
        Ok(entries.len())
    }
}
