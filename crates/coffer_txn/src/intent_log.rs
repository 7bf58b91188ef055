//! The coordinator's durable intent log: a single append-only file of
//! framed records recording, per transaction, every buffered mutation and
//! the `PrepareComplete`/`CommitComplete`/`AbortComplete` markers that
//! drive presumed-abort recovery on restart.
//!
//! Framing mirrors `coffer_core`'s WAL (magic, version, type, length,
//! payload, trailing CRC32) but the two are independent formats: this log
//! is owned by the coordinator and knows nothing about entities or
//! collections, only about transaction/resource identifiers and raw
//! key/payload bytes.

use std::path::Path;

use coffer_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;

use crate::error::{TxError, TxResult};
use crate::resource::{digest_of, LoggedMutation, MutationKind};

const LOG_MAGIC: [u8; 4] = *b"CTXL";
const LOG_VERSION: u16 = 1;
const HEADER_SIZE: usize = 4 + 2 + 1 + 4;
const CRC_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Mutation = 1,
    PrepareComplete = 2,
    CommitComplete = 3,
    AbortComplete = 4,
}

impl RecordType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Mutation),
            2 => Some(Self::PrepareComplete),
            3 => Some(Self::CommitComplete),
            4 => Some(Self::AbortComplete),
            _ => None,
        }
    }
}

/// A resource's prepare vote as recorded in a `PrepareComplete` entry: the
/// digest is checked against a replayed mutation list on recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResourceVote {
    pub(crate) resource_id: u32,
    pub(crate) resource_name: String,
    pub(crate) digest: [u8; 32],
}

/// One entry in the intent log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IntentRecord {
    /// One buffered mutation belonging to `resource_id` within `txn`,
    /// logged before the transaction enters `Committing` so that recovery
    /// has the exact bytes to replay, not merely a digest.
    Mutation {
        txn: u64,
        resource_id: u32,
        resource_name: String,
        kind: MutationKind,
        key: String,
        payload: Vec<u8>,
    },
    /// Recorded once every enlisted resource voted to prepare, immediately
    /// before the coordinator starts applying commits. `fsync`'d.
    PrepareComplete { txn: u64, resources: Vec<ResourceVote> },
    /// Recorded once every resource's commit has applied. `fsync`'d.
    CommitComplete { txn: u64 },
    /// Recorded once every resource has rolled back (or the transaction
    /// never reached `PrepareComplete`, the presumed-abort default).
    /// `fsync`'d.
    AbortComplete { txn: u64 },
}

impl IntentRecord {
    fn record_type(&self) -> RecordType {
        match self {
            Self::Mutation { .. } => RecordType::Mutation,
            Self::PrepareComplete { .. } => RecordType::PrepareComplete,
            Self::CommitComplete { .. } => RecordType::CommitComplete,
            Self::AbortComplete { .. } => RecordType::AbortComplete,
        }
    }

    /// The transaction this record belongs to, for grouping during the
    /// recovery scan.
    pub(crate) fn txn_id(&self) -> u64 {
        match self {
            Self::Mutation { txn, .. }
            | Self::PrepareComplete { txn, .. }
            | Self::CommitComplete { txn }
            | Self::AbortComplete { txn } => *txn,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Mutation {
                txn,
                resource_id,
                resource_name,
                kind,
                key,
                payload,
            } => {
                buf.extend_from_slice(&txn.to_le_bytes());
                buf.extend_from_slice(&resource_id.to_le_bytes());
                write_string(&mut buf, resource_name);
                buf.push(match kind {
                    MutationKind::Save => 1,
                    MutationKind::Delete => 2,
                });
                write_string(&mut buf, key);
                write_bytes(&mut buf, payload);
            }
            Self::PrepareComplete { txn, resources } => {
                buf.extend_from_slice(&txn.to_le_bytes());
                buf.extend_from_slice(&(resources.len() as u32).to_le_bytes());
                for vote in resources {
                    buf.extend_from_slice(&vote.resource_id.to_le_bytes());
                    write_string(&mut buf, &vote.resource_name);
                    buf.extend_from_slice(&vote.digest);
                }
            }
            Self::CommitComplete { txn } | Self::AbortComplete { txn } => {
                buf.extend_from_slice(&txn.to_le_bytes());
            }
        }
        buf
    }

    fn decode_payload(record_type: RecordType, payload: &[u8]) -> TxResult<Self> {
        let mut cursor = Cursor::new(payload);
        match record_type {
            RecordType::Mutation => {
                let txn = cursor.read_u64()?;
                let resource_id = cursor.read_u32()?;
                let resource_name = cursor.read_string()?;
                let kind = match cursor.read_u8()? {
                    1 => MutationKind::Save,
                    2 => MutationKind::Delete,
                    other => {
                        return Err(TxError::IntentLogCorrupt(format!(
                            "unknown mutation kind byte {other}"
                        )))
                    }
                };
                let key = cursor.read_string()?;
                let payload = cursor.read_bytes()?;
                Ok(Self::Mutation {
                    txn,
                    resource_id,
                    resource_name,
                    kind,
                    key,
                    payload,
                })
            }
            RecordType::PrepareComplete => {
                let txn = cursor.read_u64()?;
                let count = cursor.read_u32()?;
                let mut resources = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let resource_id = cursor.read_u32()?;
                    let resource_name = cursor.read_string()?;
                    let digest = cursor.read_digest()?;
                    resources.push(ResourceVote {
                        resource_id,
                        resource_name,
                        digest,
                    });
                }
                Ok(Self::PrepareComplete { txn, resources })
            }
            RecordType::CommitComplete => Ok(Self::CommitComplete {
                txn: cursor.read_u64()?,
            }),
            RecordType::AbortComplete => Ok(Self::AbortComplete {
                txn: cursor.read_u64()?,
            }),
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> TxResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(TxError::IntentLogCorrupt(
                "record payload truncated".to_string(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> TxResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> TxResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> TxResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_bytes(&mut self) -> TxResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn read_string(&mut self) -> TxResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| TxError::IntentLogCorrupt(format!("invalid utf-8: {e}")))
    }

    fn read_digest(&mut self) -> TxResult<[u8; 32]> {
        let b = self.take(32)?;
        Ok(b.try_into().unwrap())
    }
}

/// Matches `coffer_core::wal::record::compute_crc32`: a standard
/// CRC-32/ISO-HDLC implementation computed without a lookup table
/// dependency, so this crate doesn't need to share one with `coffer_core`.
fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// The coordinator's durable intent log.
///
/// Wraps a [`StorageBackend`] rather than a raw file so tests can use
/// [`coffer_storage::InMemoryBackend`]; production callers get
/// [`IntentLog::open`], which opens a real file and creates its parent
/// directory if absent.
pub(crate) struct IntentLog {
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl IntentLog {
    /// Opens (creating if absent) the intent log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::IntentLog`] if the file or its parent directory
    /// cannot be created or opened.
    pub(crate) fn open(path: &Path) -> TxResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)
            .map_err(|e| TxError::IntentLog(std::io::Error::other(e.to_string())))?;
        Ok(Self {
            backend: Mutex::new(Box::new(backend)),
        })
    }

    /// An intent log backed by memory only, for tests that don't need
    /// cross-process durability.
    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        Self {
            backend: Mutex::new(Box::new(coffer_storage::InMemoryBackend::new())),
        }
    }

    /// Appends `record`. When `durable` is set, the write is `fsync`'d
    /// before returning, matching the spec's requirement that the log be
    /// synced between `Preparing → Committing` and at every terminal
    /// marker; mutation records themselves are not individually synced.
    pub(crate) fn append(&self, record: &IntentRecord, durable: bool) -> TxResult<()> {
        let payload = record.encode_payload();
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(record.record_type() as u8);
        let len = u32::try_from(payload.len())
            .map_err(|_| TxError::IntentLogCorrupt("record payload too large".to_string()))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let mut backend = self.backend.lock();
        backend
            .append(&data)
            .map_err(|e| TxError::IntentLog(std::io::Error::other(e.to_string())))?;
        if durable {
            backend
                .sync()
                .map_err(|e| TxError::IntentLog(std::io::Error::other(e.to_string())))?;
        }
        Ok(())
    }

    /// Reads every record currently in the log, in append order.
    ///
    /// A truncated trailing record (a crash mid-append) is treated as the
    /// log's effective end, not an error — the coordinator never
    /// acknowledged that append as durable.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::IntentLogCorrupt`] if a complete record fails its
    /// CRC or framing invariant.
    pub(crate) fn read_all(&self) -> TxResult<Vec<IntentRecord>> {
        let backend = self.backend.lock();
        let size = backend
            .size()
            .map_err(|e| TxError::IntentLog(std::io::Error::other(e.to_string())))?;
        let mut offset = 0u64;
        let mut records = Vec::new();

        loop {
            if offset + HEADER_SIZE as u64 > size {
                break;
            }
            let header = backend
                .read_at(offset, HEADER_SIZE)
                .map_err(|e| TxError::IntentLog(std::io::Error::other(e.to_string())))?;
            if header[0..4] != LOG_MAGIC {
                return Err(TxError::IntentLogCorrupt(format!(
                    "bad magic at offset {offset}"
                )));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version > LOG_VERSION {
                return Err(TxError::IntentLogCorrupt(format!(
                    "unsupported intent log version {version}"
                )));
            }
            let record_type = RecordType::from_byte(header[6]).ok_or_else(|| {
                TxError::IntentLogCorrupt(format!("unknown record type {}", header[6]))
            })?;
            let payload_len =
                u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as u64;
            let total_len = HEADER_SIZE as u64 + payload_len + CRC_SIZE as u64;

            if offset + total_len > size {
                break;
            }

            let body = backend
                .read_at(offset, (total_len - CRC_SIZE as u64) as usize)
                .map_err(|e| TxError::IntentLog(std::io::Error::other(e.to_string())))?;
            let trailer = backend
                .read_at(offset + total_len - CRC_SIZE as u64, CRC_SIZE)
                .map_err(|e| TxError::IntentLog(std::io::Error::other(e.to_string())))?;
            let stored_crc = u32::from_le_bytes(trailer.try_into().unwrap());
            let computed_crc = compute_crc32(&body);
            if stored_crc != computed_crc {
                return Err(TxError::IntentLogCorrupt(format!(
                    "checksum mismatch at offset {offset}"
                )));
            }

            let payload = &body[HEADER_SIZE..];
            records.push(IntentRecord::decode_payload(record_type, payload)?);
            offset += total_len;
        }

        Ok(records)
    }
}

/// Verifies a replayed mutation list against the digest a `PrepareComplete`
/// record recorded for the same resource.
pub(crate) fn verify_digest(mutations: &[LoggedMutation], expected: [u8; 32]) -> bool {
    digest_of(mutations) == expected
}
