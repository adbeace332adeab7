//! Binary store keys used inside a partition.
//!
//! Every queue owns two key ranges in the partition its affinity token routes to:
//! - header: `0x01 | len(u32 BE) | queue_id`
//! - items:  `0x02 | len(u32 BE) | queue_id | sequence(u64 BE)`
//!
//! The length prefix keeps one queue's range from overlapping another whose id
//! it is a prefix of, and the big-endian sequence makes a prefix scan return
//! items in FIFO order.

use crate::cache::CacheKey;
use crate::item_key::{QueueHeaderKey, QueueItemKey};

pub const HEADER_PREFIX: u8 = 0x01;
pub const ITEM_PREFIX: u8 = 0x02;

fn push_queue_id(buf: &mut Vec<u8>, queue_id: &str) {
    buf.extend_from_slice(&(queue_id.len() as u32).to_be_bytes());
    buf.extend_from_slice(queue_id.as_bytes());
}

/// Key of a queue's header record.
pub fn queue_header_key(queue_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 4 + queue_id.len());
    key.push(HEADER_PREFIX);
    push_queue_id(&mut key, queue_id);
    key
}

/// Prefix shared by every item key of a queue.
pub fn queue_items_prefix(queue_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 4 + queue_id.len() + 8);
    key.push(ITEM_PREFIX);
    push_queue_id(&mut key, queue_id);
    key
}

/// Key of one queue item.
pub fn queue_item_key(queue_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = queue_items_prefix(queue_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Smallest key strictly greater than every key starting with `prefix`.
/// Returns `None` when the prefix is all `0xFF` and has no upper bound.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn split_queue_id(rest: &[u8]) -> Option<(&str, &[u8])> {
    let len_bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let id_bytes = rest.get(4..4 + len)?;
    let queue_id = std::str::from_utf8(id_bytes).ok()?;
    Some((queue_id, &rest[4 + len..]))
}

/// Parsed components of an item key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItemKey {
    pub queue_id: String,
    pub sequence: u64,
}

pub fn parse_queue_item_key(key: &[u8]) -> Option<ParsedItemKey> {
    let (&prefix, rest) = key.split_first()?;
    if prefix != ITEM_PREFIX {
        return None;
    }
    let (queue_id, rest) = split_queue_id(rest)?;
    let seq_bytes: [u8; 8] = rest.try_into().ok()?;
    Some(ParsedItemKey {
        queue_id: queue_id.to_string(),
        sequence: u64::from_be_bytes(seq_bytes),
    })
}

pub fn parse_queue_header_key(key: &[u8]) -> Option<String> {
    let (&prefix, rest) = key.split_first()?;
    if prefix != HEADER_PREFIX {
        return None;
    }
    let (queue_id, rest) = split_queue_id(rest)?;
    if !rest.is_empty() {
        return None;
    }
    Some(queue_id.to_string())
}

impl CacheKey for QueueHeaderKey {
    fn store_key(&self) -> Vec<u8> {
        queue_header_key(self.queue_id().as_str())
    }
}

impl CacheKey for QueueItemKey {
    fn store_key(&self) -> Vec<u8> {
        queue_item_key(self.queue_id().as_str(), self.sequence().get())
    }
}
