//! The partitioned cache that queues are stored in.
//!
//! Each partition is an independent SlateDB instance. Entries are routed by
//! their affinity token, never by their store key, and multi-key atomic work is
//! only possible inside one partition through [`CacheTxn`].
//!
//! Transactions on one partition are serialized: [`PartitionedCache::begin`]
//! takes the partition's write lock and the returned [`CacheTxn`] holds it
//! until it is committed or dropped. Every read-modify-write of a queue header
//! therefore sees the previous commit. Conflict detection stays in place
//! underneath for writers that bypass the lock.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use slatedb::bytes::Bytes;
use slatedb::{Db, DbIterator, DbTransaction, ErrorKind as SlateErrorKind, IsolationLevel};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, trace};

use crate::codec::CodecError;
use crate::factory::{CloseAllError, PartitionFactory, close_all};
use crate::item_key::{AffinityKey, AffinityKeyed, QueueKeyError};
use crate::ring::Topology;
use crate::routing::{AffinityRouter, FnvAffinityRouter, PartitionId};
use crate::settings::{CacheConfig, ClusterConfig, PartitionConfig};
use crate::storage::{StorageError, resolve_partition_store};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Slate(#[from] slatedb::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Key(#[from] QueueKeyError),
    #[error("no entry for key in partition {partition}")]
    NotFound { partition: PartitionId },
    #[error(
        "key routed by '{got}' used in a transaction on partition {partition} owned by '{expected}'"
    )]
    RoutingMismatch {
        partition: PartitionId,
        expected: String,
        got: String,
    },
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
}

impl CacheError {
    /// Whether this error is a lost optimistic-concurrency race that may be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CacheError::Slate(e) if e.kind() == SlateErrorKind::Transaction)
    }
}

/// An entry address the cache can route. The store key locates the entry
/// within its partition; the affinity token picks the partition.
pub trait CacheKey: AffinityKeyed + Send + Sync {
    fn store_key(&self) -> Vec<u8>;
}

/// Bound `fut` by `timeout`. On expiry the future is dropped, so any
/// transaction it held is discarded uncommitted.
pub async fn with_deadline<T, E, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<CacheError>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout { op, timeout }.into()),
    }
}

/// One partition of the cache. Owns its SlateDB instance.
pub struct Partition {
    id: PartitionId,
    name: String,
    db: Arc<Db>,
    write_lock: Arc<Mutex<()>>,
}

impl Partition {
    pub async fn open(id: PartitionId, cfg: &PartitionConfig) -> Result<Self, CacheError> {
        let resolved = resolve_partition_store(cfg)?;

        let mut db_builder =
            slatedb::DbBuilder::new(resolved.root.as_str(), resolved.store);
        if let Some(flush_ms) = cfg.flush_interval_ms {
            let settings = slatedb::config::Settings {
                flush_interval: Some(Duration::from_millis(flush_ms)),
                ..Default::default()
            };
            db_builder = db_builder.with_settings(settings);
        }

        let db = db_builder.build().await?;
        debug!(partition = %id, path = %cfg.path, "opened partition");
        Ok(Self {
            id,
            name: cfg.name.clone(),
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub async fn close(&self) -> Result<(), CacheError> {
        self.db.close().await.map_err(CacheError::from)
    }

    /// Entries whose key starts with `prefix` and is `>= start`, in key order.
    pub async fn scan_prefix_from(
        &self,
        prefix: &[u8],
        start: Vec<u8>,
        limit: Option<usize>,
    ) -> Result<Vec<(Bytes, Bytes)>, CacheError> {
        let mut iter: DbIterator = self.db.scan::<Vec<u8>, _>(start..).await?;
        let mut out = Vec::new();
        while limit.is_none_or(|l| out.len() < l) {
            let Some(kv) = iter.next().await? else {
                break;
            };
            if !kv.key.starts_with(prefix) {
                break;
            }
            out.push((kv.key, kv.value));
        }
        Ok(out)
    }

    pub async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Bytes, Bytes)>, CacheError> {
        self.scan_prefix_from(prefix, prefix.to_vec(), limit).await
    }
}

/// A serializable transaction confined to the partition owning one affinity token.
///
/// Every key touched must carry that same token; anything else would belong
/// to a different partition and is rejected.
pub struct CacheTxn {
    partition: PartitionId,
    affinity: AffinityKey,
    db: Arc<Db>,
    txn: DbTransaction,
    _serial: OwnedMutexGuard<()>,
}

impl CacheTxn {
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn affinity(&self) -> &AffinityKey {
        &self.affinity
    }

    fn routed_key(&self, key: &dyn CacheKey) -> Result<Vec<u8>, CacheError> {
        if key.affinity_key() != &self.affinity {
            return Err(CacheError::RoutingMismatch {
                partition: self.partition,
                expected: self.affinity.to_string(),
                got: key.affinity_key().to_string(),
            });
        }
        Ok(key.store_key())
    }

    pub async fn get(&self, key: &dyn CacheKey) -> Result<Option<Bytes>, CacheError> {
        let k = self.routed_key(key)?;
        Ok(self.txn.get(&k).await?)
    }

    pub fn put(&self, key: &dyn CacheKey, value: &[u8]) -> Result<(), CacheError> {
        let k = self.routed_key(key)?;
        self.txn.put(&k, value)?;
        Ok(())
    }

    pub fn delete(&self, key: &dyn CacheKey) -> Result<(), CacheError> {
        let k = self.routed_key(key)?;
        self.txn.delete(&k)?;
        Ok(())
    }

    /// Entries whose key starts with `prefix` and is `>= start`, read from this
    /// transaction's snapshot. The prefix is not routed; callers must only
    /// pass key ranges belonging to this transaction's token.
    pub async fn scan_prefix_from(
        &self,
        prefix: &[u8],
        start: Vec<u8>,
        limit: Option<usize>,
    ) -> Result<Vec<(Bytes, Bytes)>, CacheError> {
        let mut iter: DbIterator = self.txn.scan::<Vec<u8>, _>(start..).await?;
        let mut out = Vec::new();
        while limit.is_none_or(|l| out.len() < l) {
            let Some(kv) = iter.next().await? else {
                break;
            };
            if !kv.key.starts_with(prefix) {
                break;
            }
            out.push((kv.key, kv.value));
        }
        Ok(out)
    }

    pub async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Bytes, Bytes)>, CacheError> {
        self.scan_prefix_from(prefix, prefix.to_vec(), limit).await
    }

    /// Commit and flush, then release the partition lock. A conflicting
    /// concurrent commit surfaces as an error for which
    /// [`CacheError::is_conflict`] is true.
    pub async fn commit(self) -> Result<(), CacheError> {
        let CacheTxn {
            db, txn, _serial, ..
        } = self;
        txn.commit().await?;
        db.flush().await?;
        Ok(())
    }
}

/// A fixed set of partitions plus the routing and ownership that place entries on them.
pub struct PartitionedCache {
    partitions: Vec<Partition>,
    router: FnvAffinityRouter,
    topology: RwLock<Topology>,
    op_timeout: Duration,
}

impl PartitionedCache {
    pub async fn open(cfg: &CacheConfig, cluster: &ClusterConfig) -> Result<Arc<Self>, CacheError> {
        let mut factory = PartitionFactory::new(cfg.clone());
        factory.open_all().await?;
        let partitions = factory.into_partitions();
        info!(
            partitions = partitions.len(),
            nodes = ?cluster.nodes,
            "opened partitioned cache"
        );
        Ok(Arc::new(Self {
            router: FnvAffinityRouter::new(partitions.len() as u32),
            partitions,
            topology: RwLock::new(Topology::new(&cluster.nodes, cluster.virtual_nodes)),
            op_timeout: cfg.op_timeout(),
        }))
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    pub fn partition_count(&self) -> u32 {
        self.router.partition_count()
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition_for_affinity(&self, affinity: &AffinityKey) -> PartitionId {
        self.router.partition_for(affinity)
    }

    pub fn partition_of(&self, key: &dyn AffinityKeyed) -> PartitionId {
        self.router.route(key)
    }

    pub fn partition(&self, id: PartitionId) -> &Partition {
        // The router only yields ids below partition_count
        &self.partitions[id.0 as usize]
    }

    fn partition_for_key(&self, key: &dyn AffinityKeyed) -> &Partition {
        self.partition(self.partition_of(key))
    }

    /// Node currently owning the partition `key` routes to.
    pub fn owner_of(&self, key: &dyn AffinityKeyed) -> Option<u64> {
        let partition = self.partition_of(key);
        self.topology().owner_of(partition.0)
    }

    pub fn topology(&self) -> Topology {
        self.topology
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Install a new node set. Partitions move between nodes as whole units;
    /// token-to-partition routing is unaffected. Returns the new topology version.
    pub fn rebalance(&self, nodes: &[u64]) -> u64 {
        let mut guard = self
            .topology
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = guard.with_nodes(nodes);
        let moved = (0..self.partition_count())
            .filter(|p| guard.owner_of(*p) != next.owner_of(*p))
            .count();
        info!(
            from_version = guard.version(),
            to_version = next.version(),
            nodes = ?next.nodes(),
            moved_partitions = moved,
            "rebalanced partitions"
        );
        let version = next.version();
        *guard = next;
        version
    }

    pub async fn put(&self, key: &dyn CacheKey, value: &[u8]) -> Result<(), CacheError> {
        let partition = self.partition_for_key(key);
        let k = key.store_key();
        with_deadline("put", self.op_timeout, async {
            partition.db.put(&k, value).await?;
            partition.db.flush().await?;
            Ok::<(), CacheError>(())
        })
        .await
    }

    pub async fn get(&self, key: &dyn CacheKey) -> Result<Option<Bytes>, CacheError> {
        let partition = self.partition_for_key(key);
        let k = key.store_key();
        with_deadline("get", self.op_timeout, async {
            Ok::<_, CacheError>(partition.db.get(&k).await?)
        })
        .await
    }

    /// Like [`get`](Self::get) but a missing entry is `NotFound`.
    pub async fn get_required(&self, key: &dyn CacheKey) -> Result<Bytes, CacheError> {
        let partition = self.partition_of(key);
        self.get(key)
            .await?
            .ok_or(CacheError::NotFound { partition })
    }

    /// Remove an entry, reporting whether it existed.
    pub async fn remove(&self, key: &dyn CacheKey) -> Result<bool, CacheError> {
        with_deadline("remove", self.op_timeout, async {
            let txn = self.begin(key.affinity_key()).await?;
            let existed = txn.get(key).await?.is_some();
            if existed {
                txn.delete(key)?;
                txn.commit().await?;
            }
            Ok::<bool, CacheError>(existed)
        })
        .await
    }

    /// Begin a serializable transaction on the partition owning `affinity`.
    ///
    /// Waits for any other open transaction on that partition to commit or be
    /// dropped. Never call this while holding a transaction on the same
    /// partition.
    pub async fn begin(&self, affinity: &AffinityKey) -> Result<CacheTxn, CacheError> {
        let partition = self.partition(self.partition_for_affinity(affinity));
        let serial = Arc::clone(&partition.write_lock).lock_owned().await;
        trace!(partition = %partition.id, affinity = %affinity, "acquired partition lock");
        let txn = partition
            .db
            .begin(IsolationLevel::SerializableSnapshot)
            .await?;
        Ok(CacheTxn {
            partition: partition.id,
            affinity: affinity.clone(),
            db: Arc::clone(&partition.db),
            txn,
            _serial: serial,
        })
    }

    /// Close every partition, reporting each one that failed.
    pub async fn close(&self) -> Result<(), CloseAllError> {
        close_all(&self.partitions).await
    }
}
