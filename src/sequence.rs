//! Queue-scoped sequence allocation.
//!
//! The next sequence of a queue is the `tail` field of its header. Issuing a
//! sequence reads the header inside a partition transaction, bumps `tail` and
//! writes it back. Partition transactions hold the partition lock from
//! `begin` to commit, so two callers racing for the same queue always read
//! each other's `tail`. A transaction conflict from a writer outside the lock
//! is retried with backoff.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheTxn, PartitionedCache, with_deadline};
use crate::codec::{decode_queue_header, encode_queue_header};
use crate::header::QueueHeader;
use crate::item_key::{AffinityKey, QueueHeaderKey, QueueId, QueueKeyError, Sequence};
use crate::queue::QueueError;
use crate::retry::{BackoffPolicy, RetryError, retry_with_backoff};

pub struct SequenceAllocator {
    cache: Arc<PartitionedCache>,
    policy: BackoffPolicy,
}

impl SequenceAllocator {
    pub fn new(cache: Arc<PartitionedCache>, policy: BackoffPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn cache(&self) -> &Arc<PartitionedCache> {
        &self.cache
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Read a queue's header inside `txn`, checking that the transaction and
    /// the stored header route by the queue's token. A removed queue is
    /// reported as [`QueueError::QueueNotFound`].
    pub async fn load_header(
        &self,
        txn: &CacheTxn,
        queue_id: &QueueId,
    ) -> Result<QueueHeader, QueueError> {
        match self.load_stored_header(txn, queue_id).await? {
            Some(header) if !header.removed => Ok(header),
            _ => Err(QueueError::QueueNotFound(queue_id.to_string())),
        }
    }

    /// Like [`load_header`](Self::load_header) but returns whatever is stored,
    /// tombstones included.
    pub async fn load_stored_header(
        &self,
        txn: &CacheTxn,
        queue_id: &QueueId,
    ) -> Result<Option<QueueHeader>, QueueError> {
        let Some(raw) = txn.get(&QueueHeaderKey::new(queue_id)).await? else {
            return Ok(None);
        };
        let header = decode_queue_header(&raw)?;
        let expected = AffinityKey::for_queue(queue_id);
        if header.affinity() != expected {
            return Err(QueueKeyError::RoutingMismatch {
                queue_id: queue_id.to_string(),
                expected: expected.to_string(),
                got: header.affinity_key.clone(),
            }
            .into());
        }
        Ok(Some(header))
    }

    /// Issue the next sequence from an already loaded header.
    pub fn issue(&self, header: &mut QueueHeader) -> Result<Sequence, QueueError> {
        Ok(header.issue_next()?)
    }

    /// Load the header and issue one sequence inside a caller-owned
    /// transaction. Nothing is written; the caller stores the returned header
    /// alongside whatever else it commits.
    pub async fn reserve_in(
        &self,
        txn: &CacheTxn,
        queue_id: &QueueId,
    ) -> Result<(QueueHeader, Sequence), QueueError> {
        let mut header = self.load_header(txn, queue_id).await?;
        let sequence = self.issue(&mut header)?;
        Ok((header, sequence))
    }

    /// Reserve the next sequence of `queue_id` on its own.
    ///
    /// No item is written, so the sequence stays a gap unless the caller
    /// stores one under it.
    pub async fn allocate(&self, queue_id: &QueueId) -> Result<Sequence, QueueError> {
        let affinity = AffinityKey::for_queue(queue_id);
        let header_key = QueueHeaderKey::new(queue_id);
        let (affinity, header_key) = (&affinity, &header_key);
        let sequence = self
            .run(queue_id, "allocate", |_| async move {
                let txn = self.cache.begin(affinity).await?;
                let (header, sequence) = self.reserve_in(&txn, queue_id).await?;
                txn.put(header_key, &encode_queue_header(&header)?)?;
                txn.commit().await?;
                Ok(sequence)
            })
            .await?;
        debug!(queue = %queue_id, sequence = %sequence, "allocated sequence");
        Ok(sequence)
    }

    /// Drive one transactional attempt `op` through the backoff policy,
    /// bounded by the cache's operation timeout. Exhausting the attempt budget
    /// on conflicts yields [`QueueError::AllocationContention`].
    pub async fn run<T, F, Fut>(
        &self,
        queue_id: &QueueId,
        op_name: &'static str,
        op: F,
    ) -> Result<T, QueueError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        self.run_with_timeout(queue_id, op_name, self.cache.op_timeout(), op)
            .await
    }

    pub async fn run_with_timeout<T, F, Fut>(
        &self,
        queue_id: &QueueId,
        op_name: &'static str,
        timeout: std::time::Duration,
        op: F,
    ) -> Result<T, QueueError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        with_deadline(op_name, timeout, async {
            match retry_with_backoff(&self.policy, op_name, QueueError::is_conflict, op).await {
                Ok(v) => Ok(v),
                Err(RetryError::Fatal(e)) => Err(e),
                Err(RetryError::Exhausted { attempts, last }) => {
                    warn!(
                        queue = %queue_id,
                        op = op_name,
                        attempts,
                        error = %last,
                        "sequence allocation exhausted retry budget"
                    );
                    Err(QueueError::AllocationContention {
                        queue_id: queue_id.to_string(),
                        attempts,
                    })
                }
            }
        })
        .await
    }
}
