//! WAL record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, OpId, SequenceNumber};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"CWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Begin a new write operation.
    Begin = 1,
    /// Save (insert or update) an entity.
    Put = 2,
    /// Delete an entity.
    Delete = 3,
    /// Commit a write operation.
    Commit = 4,
    /// Abort a write operation.
    Abort = 5,
    /// Checkpoint marker.
    Checkpoint = 6,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            5 => Some(Self::Abort),
            6 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A WAL record representing a database operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Begin a new write operation.
    Begin {
        /// Operation ID.
        op_id: OpId,
    },

    /// Save (insert or update) an entity.
    Put {
        /// Operation ID.
        op_id: OpId,
        /// Collection containing the entity.
        collection_id: CollectionId,
        /// Entity's stable string key.
        key: String,
        /// New entity payload (opaque bytes from `coffer_codec::encode_entity`).
        after_bytes: Vec<u8>,
    },

    /// Delete an entity.
    Delete {
        /// Operation ID.
        op_id: OpId,
        /// Collection containing the entity.
        collection_id: CollectionId,
        /// Entity's stable string key.
        key: String,
    },

    /// Commit a write operation.
    Commit {
        /// Operation ID.
        op_id: OpId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },

    /// Abort a write operation.
    Abort {
        /// Operation ID.
        op_id: OpId,
    },

    /// Checkpoint marker for WAL truncation.
    Checkpoint {
        /// Sequence number at checkpoint.
        sequence: SequenceNumber,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Commit { .. } => WalRecordType::Commit,
            Self::Abort { .. } => WalRecordType::Abort,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns the operation ID if this record is associated with one.
    #[must_use]
    pub fn op_id(&self) -> Option<OpId> {
        match self {
            Self::Begin { op_id }
            | Self::Put { op_id, .. }
            | Self::Delete { op_id, .. }
            | Self::Commit { op_id, .. }
            | Self::Abort { op_id } => Some(*op_id),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Maximum size for an entity payload in a WAL record.
    ///
    /// Payloads larger than this are rejected with an error. This limit
    /// exists because the WAL format uses a 4-byte length field.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Maximum size for a key in a WAL record (2-byte length field).
    pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if `after_bytes` in a `Put` record exceeds
    /// [`Self::MAX_PAYLOAD_SIZE`], or if a key exceeds [`Self::MAX_KEY_SIZE`].
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        fn write_key(buf: &mut Vec<u8>, key: &str) -> CoreResult<()> {
            let bytes = key.as_bytes();
            if bytes.len() > WalRecord::MAX_KEY_SIZE {
                return Err(CoreError::invalid_argument(format!(
                    "key too large: {} bytes exceeds maximum of {} bytes",
                    bytes.len(),
                    WalRecord::MAX_KEY_SIZE
                )));
            }
            let len = bytes.len() as u16;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(bytes);
            Ok(())
        }

        match self {
            Self::Begin { op_id } | Self::Abort { op_id } => {
                buf.extend_from_slice(&op_id.as_u64().to_le_bytes());
            }

            Self::Put {
                op_id,
                collection_id,
                key,
                after_bytes,
            } => {
                if after_bytes.len() > Self::MAX_PAYLOAD_SIZE {
                    return Err(CoreError::invalid_argument(format!(
                        "entity payload too large: {} bytes exceeds maximum of {} bytes",
                        after_bytes.len(),
                        Self::MAX_PAYLOAD_SIZE
                    )));
                }

                buf.extend_from_slice(&op_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&collection_id.as_u32().to_le_bytes());
                write_key(&mut buf, key)?;
                let len = after_bytes.len() as u32;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(after_bytes);
            }

            Self::Delete {
                op_id,
                collection_id,
                key,
            } => {
                buf.extend_from_slice(&op_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&collection_id.as_u32().to_le_bytes());
                write_key(&mut buf, key)?;
            }

            Self::Commit { op_id, sequence } => {
                buf.extend_from_slice(&op_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }

            Self::Checkpoint { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut cursor = 0;

        let read_u64 = |cursor: &mut usize| -> CoreResult<u64> {
            if *cursor + 8 > payload.len() {
                return Err(CoreError::wal_corruption("unexpected end of payload"));
            }
            let bytes: [u8; 8] = payload[*cursor..*cursor + 8]
                .try_into()
                .map_err(|_| CoreError::wal_corruption("invalid u64"))?;
            *cursor += 8;
            Ok(u64::from_le_bytes(bytes))
        };

        let read_u32 = |cursor: &mut usize| -> CoreResult<u32> {
            if *cursor + 4 > payload.len() {
                return Err(CoreError::wal_corruption("unexpected end of payload"));
            }
            let bytes: [u8; 4] = payload[*cursor..*cursor + 4]
                .try_into()
                .map_err(|_| CoreError::wal_corruption("invalid u32"))?;
            *cursor += 4;
            Ok(u32::from_le_bytes(bytes))
        };

        let read_key = |cursor: &mut usize| -> CoreResult<String> {
            if *cursor + 2 > payload.len() {
                return Err(CoreError::wal_corruption("unexpected end of payload"));
            }
            let len_bytes: [u8; 2] = payload[*cursor..*cursor + 2]
                .try_into()
                .map_err(|_| CoreError::wal_corruption("invalid key length"))?;
            let len = u16::from_le_bytes(len_bytes) as usize;
            *cursor += 2;
            if *cursor + len > payload.len() {
                return Err(CoreError::wal_corruption("unexpected end of key"));
            }
            let key = String::from_utf8(payload[*cursor..*cursor + len].to_vec())
                .map_err(|_| CoreError::wal_corruption("key is not valid UTF-8"))?;
            *cursor += len;
            Ok(key)
        };

        match record_type {
            WalRecordType::Begin => {
                let op_id = OpId::new(read_u64(&mut cursor)?);
                if cursor != payload.len() {
                    return Err(CoreError::wal_corruption("trailing bytes in Begin record"));
                }
                Ok(Self::Begin { op_id })
            }

            WalRecordType::Put => {
                let op_id = OpId::new(read_u64(&mut cursor)?);
                let collection_id = CollectionId::new(read_u32(&mut cursor)?);
                let key = read_key(&mut cursor)?;
                let len = read_u32(&mut cursor)? as usize;
                if cursor + len > payload.len() {
                    return Err(CoreError::wal_corruption("unexpected end of after_bytes"));
                }
                let after_bytes = payload[cursor..cursor + len].to_vec();
                cursor += len;
                if cursor != payload.len() {
                    return Err(CoreError::wal_corruption("trailing bytes in Put record"));
                }
                Ok(Self::Put {
                    op_id,
                    collection_id,
                    key,
                    after_bytes,
                })
            }

            WalRecordType::Delete => {
                let op_id = OpId::new(read_u64(&mut cursor)?);
                let collection_id = CollectionId::new(read_u32(&mut cursor)?);
                let key = read_key(&mut cursor)?;
                if cursor != payload.len() {
                    return Err(CoreError::wal_corruption("trailing bytes in Delete record"));
                }
                Ok(Self::Delete {
                    op_id,
                    collection_id,
                    key,
                })
            }

            WalRecordType::Commit => {
                let op_id = OpId::new(read_u64(&mut cursor)?);
                let sequence = SequenceNumber::new(read_u64(&mut cursor)?);
                if cursor != payload.len() {
                    return Err(CoreError::wal_corruption("trailing bytes in Commit record"));
                }
                Ok(Self::Commit { op_id, sequence })
            }

            WalRecordType::Abort => {
                let op_id = OpId::new(read_u64(&mut cursor)?);
                if cursor != payload.len() {
                    return Err(CoreError::wal_corruption("trailing bytes in Abort record"));
                }
                Ok(Self::Abort { op_id })
            }

            WalRecordType::Checkpoint => {
                let sequence = SequenceNumber::new(read_u64(&mut cursor)?);
                if cursor != payload.len() {
                    return Err(CoreError::wal_corruption(
                        "trailing bytes in Checkpoint record",
                    ));
                }
                Ok(Self::Checkpoint { sequence })
            }
        }
    }
}

/// Computes the CRC32 checksum (IEEE polynomial) of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_roundtrip() {
        for t in [
            WalRecordType::Begin,
            WalRecordType::Put,
            WalRecordType::Delete,
            WalRecordType::Commit,
            WalRecordType::Abort,
            WalRecordType::Checkpoint,
        ] {
            assert_eq!(WalRecordType::from_byte(t.as_byte()), Some(t));
        }
    }

    #[test]
    fn begin_record_roundtrip() {
        let record = WalRecord::Begin {
            op_id: OpId::new(42),
        };
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(WalRecordType::Begin, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn put_record_roundtrip() {
        let record = WalRecord::Put {
            op_id: OpId::new(1),
            collection_id: CollectionId::new(5),
            key: "user:42".to_string(),
            after_bytes: vec![0xCA, 0xFE, 0xBA, 0xBE],
        };
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(WalRecordType::Put, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn delete_record_roundtrip() {
        let record = WalRecord::Delete {
            op_id: OpId::new(99),
            collection_id: CollectionId::new(10),
            key: "user:7".to_string(),
        };
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(WalRecordType::Delete, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn commit_record_roundtrip() {
        let record = WalRecord::Commit {
            op_id: OpId::new(7),
            sequence: SequenceNumber::new(100),
        };
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(WalRecordType::Commit, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn abort_record_roundtrip() {
        let record = WalRecord::Abort {
            op_id: OpId::new(8),
        };
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(WalRecordType::Abort, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn checkpoint_record_roundtrip() {
        let record = WalRecord::Checkpoint {
            sequence: SequenceNumber::new(500),
        };
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(WalRecordType::Checkpoint, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn crc32_known_value() {
        let crc = compute_crc32(b"123456789");
        assert_eq!(crc, 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        let crc = compute_crc32(b"");
        assert_eq!(crc, 0x0000_0000);
    }
}
