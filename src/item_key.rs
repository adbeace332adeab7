//! Identity and routing tokens for queue items.
//!
//! A queue lives inside a partitioned cache as one header entry plus one entry
//! per item. Every one of those entries is routed by the same [`AffinityKey`],
//! which is derived from the queue id and never supplied by callers, so the
//! whole queue always lands on a single partition.
//!
//! The affinity token is the queue id verbatim. Changing this derivation moves
//! every existing queue to a different partition.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueKeyError {
    #[error("queue identity must not be empty")]
    InvalidIdentity,
    #[error("invalid sequence {sequence}: {reason}")]
    InvalidSequence { sequence: i64, reason: &'static str },
    #[error("stored sequence {sequence} exceeds i64::MAX")]
    SequenceOutOfRange { sequence: u64 },
    #[error("affinity mismatch for queue '{queue_id}': expected '{expected}', got '{got}'")]
    RoutingMismatch {
        queue_id: String,
        expected: String,
        got: String,
    },
}

/// Marker for values owned by the queue system rather than by user data.
pub trait CacheInternal {}

/// A cache entry that is routed by an affinity token instead of by its own hash.
pub trait AffinityKeyed: CacheInternal {
    fn affinity_key(&self) -> &AffinityKey;
}

/// Name of a queue instance. Never empty.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueId(String);

impl QueueId {
    pub fn new(id: impl Into<String>) -> Result<Self, QueueKeyError> {
        let id = id.into();
        if id.is_empty() {
            return Err(QueueKeyError::InvalidIdentity);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for QueueId {
    type Error = QueueKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueId> for String {
    fn from(id: QueueId) -> Self {
        id.0
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({})", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of an item within its queue.
///
/// Always within `0..=i64::MAX` so it converts losslessly to and from the
/// signed representation used at the API boundary.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Sequence(u64);

impl Sequence {
    pub const ZERO: Sequence = Sequence(0);
    pub const MAX: Sequence = Sequence(i64::MAX as u64);

    pub fn new(value: i64) -> Result<Self, QueueKeyError> {
        if value < 0 {
            return Err(QueueKeyError::InvalidSequence {
                sequence: value,
                reason: "must be non-negative",
            });
        }
        Ok(Self(value as u64))
    }

    /// Rebuild a sequence read back from storage.
    pub fn from_stored(value: u64) -> Result<Self, QueueKeyError> {
        if value > Self::MAX.0 {
            return Err(QueueKeyError::SequenceOutOfRange { sequence: value });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// The sequence after this one, or `None` once the space is exhausted.
    pub fn next(self) -> Option<Sequence> {
        if self >= Self::MAX {
            None
        } else {
            Some(Sequence(self.0 + 1))
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Routing token shared by a queue's header and all of its items.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AffinityKey(String);

impl AffinityKey {
    /// The one place the token is derived from a queue id.
    pub fn for_queue(queue_id: &QueueId) -> Self {
        Self(queue_id.as_str().to_string())
    }

    /// Wrap a token read back from a stored record without re-deriving it.
    pub(crate) fn from_stored(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AffinityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AffinityKey({})", self.0)
    }
}

impl fmt::Display for AffinityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a queue's header record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueHeaderKey {
    queue_id: QueueId,
    affinity_key: AffinityKey,
}

impl QueueHeaderKey {
    pub fn new(queue_id: &QueueId) -> Self {
        Self {
            queue_id: queue_id.clone(),
            affinity_key: AffinityKey::for_queue(queue_id),
        }
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }
}

impl CacheInternal for QueueHeaderKey {}

impl AffinityKeyed for QueueHeaderKey {
    fn affinity_key(&self) -> &AffinityKey {
        &self.affinity_key
    }
}

/// Identity and address of one item inside a queue.
///
/// Equality and hashing consider only `(queue_id, sequence)`. The affinity
/// token is routing metadata; it is derived from the queue id, so two keys
/// that compare equal always route identically.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "ItemKeyRepr", into = "ItemKeyRepr")]
pub struct QueueItemKey {
    queue_id: QueueId,
    sequence: Sequence,
    affinity_key: AffinityKey,
}

impl QueueItemKey {
    /// Build a key from raw input, rejecting an empty queue id or a negative sequence.
    pub fn new(queue_id: &str, sequence: i64) -> Result<Self, QueueKeyError> {
        let queue_id = QueueId::new(queue_id)?;
        let sequence = Sequence::new(sequence)?;
        Ok(Self::from_parts(queue_id, sequence))
    }

    pub fn from_parts(queue_id: QueueId, sequence: Sequence) -> Self {
        let affinity_key = AffinityKey::for_queue(&queue_id);
        Self {
            queue_id,
            sequence,
            affinity_key,
        }
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn header_key(&self) -> QueueHeaderKey {
        QueueHeaderKey::new(&self.queue_id)
    }

    /// Fail if this key would route differently from `expected`.
    pub fn verify_affinity(&self, expected: &AffinityKey) -> Result<(), QueueKeyError> {
        if &self.affinity_key != expected {
            return Err(QueueKeyError::RoutingMismatch {
                queue_id: self.queue_id.to_string(),
                expected: expected.to_string(),
                got: self.affinity_key.to_string(),
            });
        }
        Ok(())
    }
}

impl CacheInternal for QueueItemKey {}

impl AffinityKeyed for QueueItemKey {
    fn affinity_key(&self) -> &AffinityKey {
        &self.affinity_key
    }
}

impl PartialEq for QueueItemKey {
    fn eq(&self, other: &Self) -> bool {
        self.queue_id == other.queue_id && self.sequence == other.sequence
    }
}

impl Eq for QueueItemKey {}

impl Hash for QueueItemKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.queue_id.hash(state);
        self.sequence.hash(state);
    }
}

/// Keys of different queues are incomparable, so there is no `Ord` impl.
impl PartialOrd for QueueItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.queue_id != other.queue_id {
            return None;
        }
        Some(self.sequence.cmp(&other.sequence))
    }
}

impl fmt::Debug for QueueItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItemKey")
            .field("queue_id", &self.queue_id.as_str())
            .field("sequence", &self.sequence.get())
            .field("affinity_key", &self.affinity_key.as_str())
            .finish()
    }
}

impl fmt::Display for QueueItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.queue_id, self.sequence)
    }
}

/// Serialized shape of a [`QueueItemKey`]. All three fields travel so a
/// receiver can detect a token that disagrees with its own derivation.
#[derive(Serialize, Deserialize)]
struct ItemKeyRepr {
    queue_id: String,
    sequence: i64,
    affinity_key: String,
}

impl From<QueueItemKey> for ItemKeyRepr {
    fn from(key: QueueItemKey) -> Self {
        Self {
            sequence: key.sequence.as_i64(),
            queue_id: key.queue_id.0,
            affinity_key: key.affinity_key.0,
        }
    }
}

impl TryFrom<ItemKeyRepr> for QueueItemKey {
    type Error = QueueKeyError;

    fn try_from(repr: ItemKeyRepr) -> Result<Self, Self::Error> {
        let key = QueueItemKey::new(&repr.queue_id, repr.sequence)?;
        if key.affinity_key.as_str() != repr.affinity_key {
            return Err(QueueKeyError::RoutingMismatch {
                queue_id: repr.queue_id,
                expected: key.affinity_key.to_string(),
                got: repr.affinity_key,
            });
        }
        Ok(key)
    }
}

/// Rebuild a key from wire fields, used by the binary codec.
pub(crate) fn key_from_wire(
    queue_id: &str,
    sequence: u64,
    affinity_key: &str,
) -> Result<QueueItemKey, QueueKeyError> {
    let sequence = Sequence::from_stored(sequence)?;
    QueueItemKey::try_from(ItemKeyRepr {
        queue_id: queue_id.to_string(),
        sequence: sequence.as_i64(),
        affinity_key: affinity_key.to_string(),
    })
}
