//! FIFO queues stored in the partitioned cache.
//!
//! A queue is one header entry plus one entry per live item, all routed by
//! the queue's affinity token to a single partition. Every mutation rewrites
//! the header inside the same partition transaction as the item change, and
//! partition transactions run one at a time, so writers of one queue never
//! interleave.
//!
//! - `offer`: enqueue
//! - `poll`: dequeue and peek
//! - `manage`: lookups, iteration, clear and removal

mod helpers;
mod manage;
mod offer;
mod poll;

pub use helpers::now_epoch_ms;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheError, CacheTxn, PartitionedCache, with_deadline};
use crate::codec::{CodecError, decode_queue_header, encode_queue_header};
use crate::header::QueueHeader;
use crate::item_key::{AffinityKey, QueueHeaderKey, QueueId, QueueItemKey, QueueKeyError};
use crate::retry::{BackoffPolicy, RetryError, retry_with_backoff};
use crate::routing::PartitionId;
use crate::sequence::SequenceAllocator;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Key(#[from] QueueKeyError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("sequence allocation for queue '{queue_id}' gave up after {attempts} contended attempts")]
    AllocationContention { queue_id: String, attempts: u32 },
    #[error("transaction conflict during {op}, exceeded {attempts} attempts")]
    TransactionConflict { op: &'static str, attempts: u32 },
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("queue '{0}' has been removed")]
    QueueRemoved(String),
    #[error("item {0} already consumed")]
    AlreadyConsumed(QueueItemKey),
    #[error("malformed item key stored for queue '{0}'")]
    MalformedItemKey(String),
}

impl QueueError {
    /// Whether another attempt of the same operation may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, QueueError::Cache(e) if e.is_conflict())
    }
}

/// Stored value of one queue item
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct ItemRecord {
    pub payload: Vec<u8>,
    pub enqueued_at_ms: i64,
}

/// An item read back from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub key: QueueItemKey,
    pub payload: Vec<u8>,
    pub enqueued_at_ms: i64,
}

/// Per-handle operation settings.
#[derive(Debug, Clone, Copy)]
pub struct OpOptions {
    /// Bound on each whole queue operation, retries included
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreateOutcome {
    Created,
    Revived,
    Attached,
}

/// Handle to one queue. Cheap to keep around; holds no lock or cached state
/// besides the queue's identity.
pub struct GridQueue {
    cache: Arc<PartitionedCache>,
    allocator: SequenceAllocator,
    queue_id: QueueId,
    header_key: QueueHeaderKey,
    affinity: AffinityKey,
    opts: OpOptions,
}

impl GridQueue {
    fn handle(cache: Arc<PartitionedCache>, policy: BackoffPolicy, queue_id: QueueId) -> Self {
        let opts = OpOptions {
            timeout: cache.op_timeout(),
        };
        Self {
            allocator: SequenceAllocator::new(Arc::clone(&cache), policy),
            cache,
            header_key: QueueHeaderKey::new(&queue_id),
            affinity: AffinityKey::for_queue(&queue_id),
            queue_id,
            opts,
        }
    }

    /// Create the queue if it does not exist yet, otherwise attach to it.
    /// An existing queue keeps its original capacity. A queue that was
    /// removed comes back empty, issuing sequences after the ones it had
    /// already handed out.
    pub async fn create(
        cache: Arc<PartitionedCache>,
        policy: BackoffPolicy,
        name: &str,
        capacity: u64,
    ) -> Result<Self, QueueError> {
        let queue = Self::handle(cache, policy, QueueId::new(name)?);
        let q = &queue;
        let (header, outcome) = queue
            .retry_conflicts("create", |_| async move {
                let txn = q.begin().await?;
                let stored = q.allocator.load_stored_header(&txn, &q.queue_id).await?;
                let (header, outcome) = match stored {
                    Some(header) if !header.removed => {
                        return Ok((header, CreateOutcome::Attached));
                    }
                    Some(mut tombstone) => {
                        tombstone.revive(capacity, now_epoch_ms());
                        (tombstone, CreateOutcome::Revived)
                    }
                    None => (
                        QueueHeader::new(&q.queue_id, capacity, now_epoch_ms()),
                        CreateOutcome::Created,
                    ),
                };
                q.store_header(&txn, &header)?;
                txn.commit().await?;
                Ok((header, outcome))
            })
            .await?;

        match outcome {
            CreateOutcome::Created | CreateOutcome::Revived => info!(
                queue = %queue.queue_id,
                capacity,
                partition = %queue.partition(),
                next_sequence = header.tail,
                revived = matches!(outcome, CreateOutcome::Revived),
                "created queue"
            ),
            CreateOutcome::Attached if header.capacity != capacity => warn!(
                queue = %queue.queue_id,
                existing = header.capacity,
                requested = capacity,
                "queue already exists with a different capacity, keeping existing"
            ),
            CreateOutcome::Attached => {}
        }
        Ok(queue)
    }

    /// Attach to an existing queue.
    pub async fn open(
        cache: Arc<PartitionedCache>,
        policy: BackoffPolicy,
        name: &str,
    ) -> Result<Self, QueueError> {
        let queue = Self::handle(cache, policy, QueueId::new(name)?);
        match queue.header().await {
            Ok(_) => Ok(queue),
            Err(QueueError::QueueRemoved(id)) => Err(QueueError::QueueNotFound(id)),
            Err(e) => Err(e),
        }
    }

    pub fn with_options(mut self, opts: OpOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn affinity_key(&self) -> &AffinityKey {
        &self.affinity
    }

    pub fn header_key(&self) -> &QueueHeaderKey {
        &self.header_key
    }

    pub fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    /// Partition holding this queue's header and items.
    pub fn partition(&self) -> PartitionId {
        self.cache.partition_for_affinity(&self.affinity)
    }

    /// Current header, read outside any transaction.
    pub async fn header(&self) -> Result<QueueHeader, QueueError> {
        let raw = self
            .cache
            .get(&self.header_key)
            .await?
            .ok_or_else(|| self.removed())?;
        let header = decode_queue_header(&raw)?;
        if header.removed {
            return Err(self.removed());
        }
        Ok(header)
    }

    pub async fn size(&self) -> Result<u64, QueueError> {
        Ok(self.header().await?.len)
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.size().await? == 0)
    }

    /// Maximum number of live items; 0 means unbounded.
    pub async fn capacity(&self) -> Result<u64, QueueError> {
        Ok(self.header().await?.capacity)
    }

    pub async fn is_bounded(&self) -> Result<bool, QueueError> {
        Ok(self.header().await?.is_bounded())
    }

    async fn begin(&self) -> Result<CacheTxn, QueueError> {
        Ok(self.cache.begin(&self.affinity).await?)
    }

    /// Load this queue's header inside `txn`.
    async fn load_header(&self, txn: &CacheTxn) -> Result<QueueHeader, QueueError> {
        match self.allocator.load_header(txn, &self.queue_id).await {
            Err(QueueError::QueueNotFound(_)) => Err(self.removed()),
            other => other,
        }
    }

    fn store_header(&self, txn: &CacheTxn, header: &QueueHeader) -> Result<(), QueueError> {
        txn.put(&self.header_key, &encode_queue_header(header)?)?;
        Ok(())
    }

    fn removed(&self) -> QueueError {
        QueueError::QueueRemoved(self.queue_id.to_string())
    }

    /// Retry a transactional attempt on conflicts, bounded by this handle's timeout.
    async fn retry_conflicts<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, QueueError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        with_deadline(op, self.opts.timeout, async {
            retry_with_backoff(self.allocator.policy(), op, QueueError::is_conflict, f)
                .await
                .map_err(|e| match e {
                    RetryError::Fatal(e) => e,
                    RetryError::Exhausted { attempts, .. } => {
                        QueueError::TransactionConflict { op, attempts }
                    }
                })
        })
        .await
    }
}
