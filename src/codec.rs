use rkyv::{AlignedVec, Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

use crate::header::QueueHeader;
use crate::item_key::{AffinityKeyed, QueueItemKey, QueueKeyError, key_from_wire};
use crate::queue::ItemRecord;

/// Error type for versioned codec operations
#[derive(Debug, Clone)]
pub enum CodecError {
    /// Data is too short to contain a version header
    TooShort,
    /// Version byte doesn't match expected version
    UnsupportedVersion { expected: u8, found: u8 },
    /// Underlying rkyv serialization/deserialization error
    Rkyv(String),
    /// Bytes decoded but describe a key that cannot exist
    InvalidKey(QueueKeyError),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::TooShort => write!(f, "data too short to contain version header"),
            CodecError::UnsupportedVersion { expected, found } => {
                write!(
                    f,
                    "unsupported version: expected {}, found {}",
                    expected, found
                )
            }
            CodecError::Rkyv(e) => write!(f, "rkyv error: {}", e),
            CodecError::InvalidKey(e) => write!(f, "invalid item key: {}", e),
        }
    }
}

impl std::error::Error for CodecError {}

// Version constants for each serializable type. Nodes running different
// builds exchange these bytes, so a layout change needs a new version and a
// decode path for the old one.

/// Version for QueueHeader serialization format. Version 2 added the
/// removal tombstone flag.
pub const QUEUE_HEADER_VERSION: u8 = 2;
const QUEUE_HEADER_V1: u8 = 1;
/// Version for ItemRecord serialization format
pub const ITEM_RECORD_VERSION: u8 = 1;
/// Version for the QueueItemKey transport format
pub const ITEM_KEY_VERSION: u8 = 1;

const VERSION_HEADER_SIZE: usize = 1;

#[inline]
fn prepend_version(version: u8, data: AlignedVec) -> Vec<u8> {
    let mut result = Vec::with_capacity(VERSION_HEADER_SIZE + data.len());
    result.push(version);
    result.extend_from_slice(&data);
    result
}

/// Strip the version byte, copying the rest into an AlignedVec for rkyv.
#[inline]
fn strip_version(expected: u8, data: &[u8]) -> Result<AlignedVec, CodecError> {
    if data.len() < VERSION_HEADER_SIZE {
        return Err(CodecError::TooShort);
    }
    let found = data[0];
    if found != expected {
        return Err(CodecError::UnsupportedVersion { expected, found });
    }
    let rkyv_data = &data[VERSION_HEADER_SIZE..];
    let mut aligned = AlignedVec::with_capacity(rkyv_data.len());
    aligned.extend_from_slice(rkyv_data);
    Ok(aligned)
}

// ============================================================================
// QueueHeader encoding/decoding
// ============================================================================

#[inline]
pub fn encode_queue_header(header: &QueueHeader) -> Result<Vec<u8>, CodecError> {
    let data =
        rkyv::to_bytes::<QueueHeader, 256>(header).map_err(|e| CodecError::Rkyv(e.to_string()))?;
    Ok(prepend_version(QUEUE_HEADER_VERSION, data))
}

/// Header layout written before removal left a tombstone.
#[derive(Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
struct QueueHeaderV1 {
    queue_id: String,
    affinity_key: String,
    capacity: u64,
    head: u64,
    tail: u64,
    len: u64,
    created_at_ms: i64,
}

impl From<QueueHeaderV1> for QueueHeader {
    fn from(v1: QueueHeaderV1) -> Self {
        QueueHeader {
            queue_id: v1.queue_id,
            affinity_key: v1.affinity_key,
            capacity: v1.capacity,
            head: v1.head,
            tail: v1.tail,
            len: v1.len,
            created_at_ms: v1.created_at_ms,
            removed: false,
        }
    }
}

/// Decode a header written by this or the previous layout version.
#[inline]
pub fn decode_queue_header(bytes: &[u8]) -> Result<QueueHeader, CodecError> {
    if bytes.first() == Some(&QUEUE_HEADER_V1) {
        let data = strip_version(QUEUE_HEADER_V1, bytes)?;
        let archived = rkyv::check_archived_root::<QueueHeaderV1>(&data)
            .map_err(|e| CodecError::Rkyv(e.to_string()))?;
        let v1: QueueHeaderV1 = RkyvDeserialize::deserialize(archived, &mut rkyv::Infallible)
            .unwrap_or_else(|_| unreachable!("infallible deserialization for QueueHeaderV1"));
        return Ok(v1.into());
    }
    let data = strip_version(QUEUE_HEADER_VERSION, bytes)?;
    let archived = rkyv::check_archived_root::<QueueHeader>(&data)
        .map_err(|e| CodecError::Rkyv(e.to_string()))?;
    Ok(RkyvDeserialize::deserialize(archived, &mut rkyv::Infallible)
        .unwrap_or_else(|_| unreachable!("infallible deserialization for QueueHeader")))
}

#[cfg(test)]
fn encode_queue_header_v1(header: &QueueHeader) -> Result<Vec<u8>, CodecError> {
    let v1 = QueueHeaderV1 {
        queue_id: header.queue_id.clone(),
        affinity_key: header.affinity_key.clone(),
        capacity: header.capacity,
        head: header.head,
        tail: header.tail,
        len: header.len,
        created_at_ms: header.created_at_ms,
    };
    let data =
        rkyv::to_bytes::<QueueHeaderV1, 256>(&v1).map_err(|e| CodecError::Rkyv(e.to_string()))?;
    Ok(prepend_version(QUEUE_HEADER_V1, data))
}

// ============================================================================
// ItemRecord encoding/decoding
// ============================================================================

#[inline]
pub fn encode_item_record(record: &ItemRecord) -> Result<Vec<u8>, CodecError> {
    let data =
        rkyv::to_bytes::<ItemRecord, 256>(record).map_err(|e| CodecError::Rkyv(e.to_string()))?;
    Ok(prepend_version(ITEM_RECORD_VERSION, data))
}

#[inline]
pub fn decode_item_record(bytes: &[u8]) -> Result<ItemRecord, CodecError> {
    let data = strip_version(ITEM_RECORD_VERSION, bytes)?;
    let archived = rkyv::check_archived_root::<ItemRecord>(&data)
        .map_err(|e| CodecError::Rkyv(e.to_string()))?;
    Ok(RkyvDeserialize::deserialize(archived, &mut rkyv::Infallible)
        .unwrap_or_else(|_| unreachable!("infallible deserialization for ItemRecord")))
}

// ============================================================================
// QueueItemKey encoding/decoding
// ============================================================================

/// Transport form of a [`QueueItemKey`]. All three fields are carried so
/// the receiver can reject a token that disagrees with its own derivation.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
struct ItemKeyWire {
    queue_id: String,
    sequence: u64,
    affinity_key: String,
}

#[inline]
pub fn encode_item_key(key: &QueueItemKey) -> Result<Vec<u8>, CodecError> {
    let wire = ItemKeyWire {
        queue_id: key.queue_id().as_str().to_string(),
        sequence: key.sequence().get(),
        affinity_key: key.affinity_key().as_str().to_string(),
    };
    let data =
        rkyv::to_bytes::<ItemKeyWire, 256>(&wire).map_err(|e| CodecError::Rkyv(e.to_string()))?;
    Ok(prepend_version(ITEM_KEY_VERSION, data))
}

#[inline]
pub fn decode_item_key(bytes: &[u8]) -> Result<QueueItemKey, CodecError> {
    let data = strip_version(ITEM_KEY_VERSION, bytes)?;
    let archived = rkyv::check_archived_root::<ItemKeyWire>(&data)
        .map_err(|e| CodecError::Rkyv(e.to_string()))?;
    key_from_wire(
        archived.queue_id.as_str(),
        archived.sequence,
        archived.affinity_key.as_str(),
    )
    .map_err(CodecError::InvalidKey)
}
