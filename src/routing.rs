//! Routing from affinity tokens to partitions.
//!
//! Entries are never routed by their own store key. A cache entry that belongs
//! to a queue is placed by `fnv1a32(affinity_token) % num_partitions`, which is
//! what keeps a queue's header and all of its items in one partition.

use std::fmt;

use crate::item_key::{AffinityKey, AffinityKeyed, QueueId};

/// FNV-1a 32-bit hash
#[inline]
pub fn fnv1a32(data: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 2166136261;
    const FNV_PRIME: u32 = 16777619;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Index of a partition within a [`PartitionedCache`](crate::cache::PartitionedCache).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps an affinity token to exactly one partition.
///
/// Implementations must be deterministic: the same token always maps to the
/// same partition for a fixed partition count.
pub trait AffinityRouter: Send + Sync {
    fn partition_count(&self) -> u32;

    fn partition_for(&self, affinity: &AffinityKey) -> PartitionId;

    fn route(&self, key: &dyn AffinityKeyed) -> PartitionId {
        self.partition_for(key.affinity_key())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FnvAffinityRouter {
    partitions: u32,
}

impl FnvAffinityRouter {
    /// A router over `partitions` partitions; zero is treated as one.
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }
}

impl AffinityRouter for FnvAffinityRouter {
    fn partition_count(&self) -> u32 {
        self.partitions
    }

    fn partition_for(&self, affinity: &AffinityKey) -> PartitionId {
        PartitionId(token_to_partition(affinity.as_str(), self.partitions))
    }
}

/// Compute which partition an affinity token routes to.
#[inline]
pub fn token_to_partition(token: &str, num_partitions: u32) -> u32 {
    fnv1a32(token.as_bytes()) % num_partitions.max(1)
}

/// Compute which partition holds a queue's header and items.
#[inline]
pub fn queue_to_partition(queue_id: &QueueId, num_partitions: u32) -> u32 {
    token_to_partition(AffinityKey::for_queue(queue_id).as_str(), num_partitions)
}

/// Whether two entries are colocated.
#[inline]
pub fn colocated(a: &dyn AffinityKeyed, b: &dyn AffinityKeyed, num_partitions: u32) -> bool {
    token_to_partition(a.affinity_key().as_str(), num_partitions)
        == token_to_partition(b.affinity_key().as_str(), num_partitions)
}
