//! Per-queue header record.
//!
//! The header is stored under [`QueueHeaderKey`](crate::item_key::QueueHeaderKey)
//! and carries the same affinity token as the queue's items, so it always sits
//! in the same partition and can be updated in the same transaction as an item.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

use crate::item_key::{AffinityKey, QueueId, QueueItemKey, QueueKeyError, Sequence};

#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct QueueHeader {
    pub queue_id: String,
    /// Token every item of this queue must route by
    pub affinity_key: String,
    /// Maximum number of live items; 0 means unbounded
    pub capacity: u64,
    /// Lowest sequence that may still be live
    pub head: u64,
    /// Next sequence to issue
    pub tail: u64,
    /// Number of live items. Differs from `tail - head` when sequences were
    /// reserved without an item or removed out of order.
    pub len: u64,
    pub created_at_ms: i64,
    /// Set once the queue is removed. The header stays behind as a tombstone
    /// so a queue re-created under the same name continues from `tail`.
    pub removed: bool,
}

impl QueueHeader {
    pub fn new(queue_id: &QueueId, capacity: u64, created_at_ms: i64) -> Self {
        Self {
            queue_id: queue_id.as_str().to_string(),
            affinity_key: AffinityKey::for_queue(queue_id).as_str().to_string(),
            capacity,
            head: 0,
            tail: 0,
            len: 0,
            created_at_ms,
            removed: false,
        }
    }

    /// Turn this header into a tombstone. `tail` is kept.
    pub fn mark_removed(&mut self) {
        self.record_clear();
        self.removed = true;
    }

    /// Bring a tombstone back as a fresh, empty queue. Sequences continue
    /// from the old `tail`, so keys of the removed queue never address
    /// items of the new one.
    pub fn revive(&mut self, capacity: u64, created_at_ms: i64) {
        self.record_clear();
        self.capacity = capacity;
        self.created_at_ms = created_at_ms;
        self.removed = false;
    }

    pub fn affinity(&self) -> AffinityKey {
        AffinityKey::from_stored(self.affinity_key.clone())
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }

    pub fn is_full(&self) -> bool {
        self.is_bounded() && self.len >= self.capacity
    }

    /// Issue the next sequence and advance `tail`.
    pub fn issue_next(&mut self) -> Result<Sequence, QueueKeyError> {
        let issued = Sequence::from_stored(self.tail)?;
        let next = issued.next().ok_or(QueueKeyError::InvalidSequence {
            sequence: issued.as_i64(),
            reason: "sequence space exhausted",
        })?;
        self.tail = next.get();
        Ok(issued)
    }

    /// Check that `key` belongs to this queue, routes with this header's
    /// token and was actually issued.
    pub fn check_key(&self, key: &QueueItemKey) -> Result<(), QueueKeyError> {
        key.verify_affinity(&self.affinity())?;
        if key.sequence().get() >= self.tail {
            return Err(QueueKeyError::InvalidSequence {
                sequence: key.sequence().as_i64(),
                reason: "never issued by this queue",
            });
        }
        Ok(())
    }

    /// Record that an item was written under a freshly issued sequence.
    pub fn record_insert(&mut self) {
        self.len += 1;
    }

    /// Record that the item at `sequence` was removed.
    pub fn record_remove(&mut self, sequence: Sequence) {
        self.len = self.len.saturating_sub(1);
        if sequence.get() == self.head {
            self.head += 1;
        }
        if self.len == 0 {
            self.head = self.tail;
        }
    }

    /// Record that `sequence`, the smallest live sequence, was consumed from the head.
    pub fn record_poll(&mut self, sequence: Sequence) {
        self.len = self.len.saturating_sub(1);
        self.head = self.head.max(sequence.get() + 1);
        if self.len == 0 {
            self.head = self.tail;
        }
    }

    /// Drop every item at once; issued sequences are never reused.
    pub fn record_clear(&mut self) {
        self.len = 0;
        self.head = self.tail;
    }
}
