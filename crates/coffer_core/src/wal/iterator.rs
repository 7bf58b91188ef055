//! Streaming WAL record iterator.
//!
//! Reads records one-by-one from the storage backend without loading the
//! entire WAL into memory, which matters during recovery over a large WAL.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{compute_crc32, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
use coffer_storage::StorageBackend;
use parking_lot::MutexGuard;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A streaming iterator over WAL records, keeping memory usage constant
/// regardless of WAL size.
pub struct WalRecordIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Creates a new streaming iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        })
    }

    /// Ensures at least `min_bytes` are available from the current position,
    /// resizing the buffer if a record is larger than the default capacity.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let bytes_needed_from_wal = min_bytes - available;
        let remaining_in_wal = (self.total_size - self.current_offset) as usize - available;

        if remaining_in_wal < bytes_needed_from_wal {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            let new_size = min_bytes.next_power_of_two();
            self.buffer.resize(new_size, 0);
        }

        let bytes_to_read = std::cmp::min(self.buffer.len() - self.buffer_len, remaining_in_wal);

        if bytes_to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, bytes_to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    /// Reads the next record. `Ok(None)` means end-of-WAL or a truncated
    /// trailing record (treated as the recovery boundary, not an error).
    fn read_next_record(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        if self.finished {
            return Ok(None);
        }

        let record_start_offset = self.current_offset;

        if !self.ensure_buffered(HEADER_SIZE)? {
            self.finished = true;
            return Ok(None);
        }

        let header = &self.buffer[self.buffer_pos..self.buffer_pos + HEADER_SIZE];

        if header[0..4] != WAL_MAGIC {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {record_start_offset}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            self.finished = true;
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {record_start_offset}"
            )));
        }

        let type_byte = header[6];
        let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
            self.finished = true;
            CoreError::wal_corruption(format!(
                "unknown record type {type_byte} at offset {record_start_offset}"
            ))
        })?;

        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;

        if !self.ensure_buffered(total_len)? {
            self.finished = true;
            return Ok(None);
        }

        let payload_start = self.buffer_pos + HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        let crc_start = payload_end;

        let payload = &self.buffer[payload_start..payload_end];
        let stored_crc = u32::from_le_bytes([
            self.buffer[crc_start],
            self.buffer[crc_start + 1],
            self.buffer[crc_start + 2],
            self.buffer[crc_start + 3],
        ]);

        let header_and_payload = &self.buffer[self.buffer_pos..payload_end];
        let computed_crc = compute_crc32(header_and_payload);

        if stored_crc != computed_crc {
            self.finished = true;
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = WalRecord::decode_payload(record_type, payload)?;

        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;

        Ok(Some((record_start_offset, record)))
    }
}

impl<'a> Iterator for WalRecordIterator<'a> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// A memory-bounded recovery pass that identifies which operations
/// committed, without holding the whole WAL in memory.
///
/// Recovery is two-pass: first scan to find committed op IDs and the
/// checkpoint sequence, then replay `Put`/`Delete` records whose `op_id`
/// is in the committed set.
pub struct StreamingRecovery {
    committed_ops: std::collections::HashMap<crate::types::OpId, crate::types::SequenceNumber>,
    max_op_id: u64,
    max_seq: u64,
    committed_seq: u64,
}

impl StreamingRecovery {
    /// Creates a recovery context seeded with the manifest's last checkpoint
    /// sequence.
    pub fn new(checkpoint_seq: u64) -> Self {
        Self {
            committed_ops: std::collections::HashMap::new(),
            max_op_id: 0,
            max_seq: checkpoint_seq,
            committed_seq: checkpoint_seq,
        }
    }

    /// First pass: scans the WAL, recording which operations committed.
    pub fn scan_committed<I>(&mut self, iter: I) -> CoreResult<()>
    where
        I: Iterator<Item = CoreResult<(u64, WalRecord)>>,
    {
        for result in iter {
            let (_, record) = result?;

            if let Some(op_id) = record.op_id() {
                self.max_op_id = self.max_op_id.max(op_id.as_u64());
            }

            match &record {
                WalRecord::Commit { op_id, sequence } => {
                    self.committed_ops.insert(*op_id, *sequence);
                    self.max_seq = self.max_seq.max(sequence.as_u64());
                    self.committed_seq = self.committed_seq.max(sequence.as_u64());
                }
                WalRecord::Checkpoint { sequence } => {
                    self.max_seq = self.max_seq.max(sequence.as_u64());
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Returns whether `op_id` committed.
    #[must_use]
    pub fn is_committed(&self, op_id: &crate::types::OpId) -> bool {
        self.committed_ops.contains_key(op_id)
    }

    /// Returns the commit sequence for `op_id`, if it committed.
    #[must_use]
    pub fn get_commit_sequence(
        &self,
        op_id: &crate::types::OpId,
    ) -> Option<crate::types::SequenceNumber> {
        self.committed_ops.get(op_id).copied()
    }

    /// Returns the next operation ID to assign once recovery completes.
    #[must_use]
    pub fn next_op_id(&self) -> u64 {
        self.max_op_id + 1
    }

    /// Returns the next sequence number to assign once recovery completes.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.max_seq + 1
    }

    /// Returns the highest committed sequence number observed.
    #[must_use]
    pub fn committed_seq(&self) -> u64 {
        self.committed_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionId, OpId, SequenceNumber};
    use crate::wal::WalManager;
    use coffer_storage::InMemoryBackend;

    fn create_wal_with_records(records: &[WalRecord]) -> WalManager {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        for record in records {
            wal.append(record).unwrap();
        }
        wal
    }

    #[test]
    fn iterator_empty_wal() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        let records: Vec<_> = wal.iter().unwrap().collect();
        assert!(records.is_empty());
    }

    #[test]
    fn iterator_matches_read_all() {
        let mut records = Vec::new();
        for i in 0..100 {
            records.push(WalRecord::Begin {
                op_id: OpId::new(i),
            });
            records.push(WalRecord::Put {
                op_id: OpId::new(i),
                collection_id: CollectionId::new(1),
                key: format!("k{i}"),
                after_bytes: vec![i as u8; 50],
            });
            records.push(WalRecord::Commit {
                op_id: OpId::new(i),
                sequence: SequenceNumber::new(i),
            });
        }

        let wal = create_wal_with_records(&records);

        let iter_records: Vec<_> = wal.iter().unwrap().map(|r| r.unwrap()).collect();
        let all_records = wal.read_all().unwrap();

        assert_eq!(iter_records.len(), all_records.len());
        for (a, b) in iter_records.iter().zip(all_records.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn streaming_recovery_identifies_committed() {
        let records = vec![
            WalRecord::Begin {
                op_id: OpId::new(1),
            },
            WalRecord::Put {
                op_id: OpId::new(1),
                collection_id: CollectionId::new(1),
                key: "a".to_string(),
                after_bytes: vec![1, 2, 3],
            },
            WalRecord::Commit {
                op_id: OpId::new(1),
                sequence: SequenceNumber::new(1),
            },
            WalRecord::Begin {
                op_id: OpId::new(2),
            },
            WalRecord::Put {
                op_id: OpId::new(2),
                collection_id: CollectionId::new(1),
                key: "b".to_string(),
                after_bytes: vec![4, 5, 6],
            },
        ];

        let wal = create_wal_with_records(&records);
        let mut recovery = StreamingRecovery::new(0);
        recovery.scan_committed(wal.iter().unwrap()).unwrap();

        assert!(recovery.is_committed(&OpId::new(1)));
        assert!(!recovery.is_committed(&OpId::new(2)));
        assert_eq!(
            recovery.get_commit_sequence(&OpId::new(1)),
            Some(SequenceNumber::new(1))
        );
        assert_eq!(recovery.next_op_id(), 3);
        assert_eq!(recovery.next_seq(), 2);
    }

    #[test]
    fn streaming_recovery_with_checkpoint() {
        let recovery = StreamingRecovery::new(100);
        assert_eq!(recovery.committed_seq(), 100);
        assert_eq!(recovery.next_seq(), 101);
    }

    #[test]
    fn iterator_large_record() {
        let large_payload = vec![0xAB; 128 * 1024];
        let record = WalRecord::Put {
            op_id: OpId::new(1),
            collection_id: CollectionId::new(1),
            key: "big".to_string(),
            after_bytes: large_payload.clone(),
        };

        let wal = create_wal_with_records(&[record.clone()]);

        let records: Vec<_> = wal.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);

        if let WalRecord::Put { after_bytes, .. } = &records[0].1 {
            assert_eq!(after_bytes, &large_payload);
        } else {
            panic!("expected Put record");
        }
    }
}
