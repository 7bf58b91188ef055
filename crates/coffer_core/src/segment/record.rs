//! Segment record types.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, SequenceNumber};
use crate::wal::compute_crc32;

/// Maximum encodable key length.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Flags for segment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRecordFlags(u8);

impl SegmentRecordFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Record is a tombstone (entity deleted).
    pub const TOMBSTONE: Self = Self(0x01);

    /// Creates new flags from raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks if tombstone flag is set.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Sets the tombstone flag.
    #[must_use]
    pub const fn with_tombstone(self) -> Self {
        Self(self.0 | 0x01)
    }
}

/// A record stored in a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Collection this entity belongs to.
    pub collection_id: CollectionId,
    /// Entity key.
    pub key: String,
    /// Record flags.
    pub flags: SegmentRecordFlags,
    /// Entity payload (canonical CBOR bytes, or empty for tombstone).
    pub payload: Vec<u8>,
    /// Sequence number when this record was committed.
    pub sequence: SequenceNumber,
}

impl SegmentRecord {
    /// Fixed header size: record_len (4) + collection_id (4) + key_len (2) + flags (1) + sequence (8) = 19
    const HEADER_SIZE: usize = 19;
    /// CRC size.
    const CRC_SIZE: usize = 4;

    /// Creates a new put record.
    ///
    /// # Panics
    ///
    /// Panics if `key` exceeds [`MAX_KEY_SIZE`] bytes.
    #[must_use]
    pub fn put(
        collection_id: CollectionId,
        key: impl Into<String>,
        payload: Vec<u8>,
        sequence: SequenceNumber,
    ) -> Self {
        let key = key.into();
        assert!(key.len() <= MAX_KEY_SIZE, "key exceeds maximum length");
        Self {
            collection_id,
            key,
            flags: SegmentRecordFlags::NONE,
            payload,
            sequence,
        }
    }

    /// Creates a tombstone record.
    ///
    /// # Panics
    ///
    /// Panics if `key` exceeds [`MAX_KEY_SIZE`] bytes.
    #[must_use]
    pub fn tombstone(collection_id: CollectionId, key: impl Into<String>, sequence: SequenceNumber) -> Self {
        let key = key.into();
        assert!(key.len() <= MAX_KEY_SIZE, "key exceeds maximum length");
        Self {
            collection_id,
            key,
            flags: SegmentRecordFlags::TOMBSTONE,
            payload: Vec::new(),
            sequence,
        }
    }

    /// Returns whether this is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags.is_tombstone()
    }

    /// Encodes the record to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let key_bytes = self.key.as_bytes();
        let record_len = Self::HEADER_SIZE + key_bytes.len() + self.payload.len() + Self::CRC_SIZE;
        let mut buf = Vec::with_capacity(record_len);

        // Record length (total including this field)
        buf.extend_from_slice(&(record_len as u32).to_le_bytes());

        // Collection ID
        buf.extend_from_slice(&self.collection_id.as_u32().to_le_bytes());

        // Key length + key bytes
        buf.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());

        // Flags
        buf.push(self.flags.as_byte());

        // Sequence number
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());

        // Key
        buf.extend_from_slice(key_bytes);

        // Payload
        buf.extend_from_slice(&self.payload);

        // CRC32 (over everything before it)
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decodes a record from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < Self::HEADER_SIZE + Self::CRC_SIZE {
            return Err(CoreError::segment_corruption("record too short"));
        }

        // Parse header
        let record_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        if data.len() < record_len {
            return Err(CoreError::segment_corruption("incomplete record"));
        }

        // Verify CRC
        let stored_crc = u32::from_le_bytes([
            data[record_len - 4],
            data[record_len - 3],
            data[record_len - 2],
            data[record_len - 1],
        ]);
        let computed_crc = compute_crc32(&data[..record_len - 4]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let collection_id =
            CollectionId::new(u32::from_le_bytes([data[4], data[5], data[6], data[7]]));

        let key_len = u16::from_le_bytes([data[8], data[9]]) as usize;

        let flags = SegmentRecordFlags::from_byte(data[10]);

        let sequence = SequenceNumber::new(u64::from_le_bytes([
            data[11], data[12], data[13], data[14], data[15], data[16], data[17], data[18],
        ]));

        if record_len < Self::HEADER_SIZE + key_len + Self::CRC_SIZE {
            return Err(CoreError::segment_corruption("record too short for key"));
        }

        let key_start = Self::HEADER_SIZE;
        let key_end = key_start + key_len;
        let key = String::from_utf8(data[key_start..key_end].to_vec())
            .map_err(|_| CoreError::segment_corruption("invalid key encoding"))?;

        let payload_len = record_len - Self::HEADER_SIZE - key_len - Self::CRC_SIZE;
        let payload_start = key_end;
        let payload = data[payload_start..payload_start + payload_len].to_vec();

        Ok(Self {
            collection_id,
            key,
            flags,
            payload,
            sequence,
        })
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.key.len() + self.payload.len() + Self::CRC_SIZE
    }
}

/// A segment file containing entity records.
#[derive(Debug)]
pub struct Segment {
    /// Segment ID (monotonically increasing).
    pub id: u64,
    /// Whether this segment is sealed (immutable).
    pub sealed: bool,
    /// Current size in bytes.
    pub size: u64,
}

impl Segment {
    /// Creates a new segment.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            sealed: false,
            size: 0,
        }
    }
}
