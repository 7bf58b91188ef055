//! WAL writer and reader.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{compute_crc32, WalRecord, WAL_MAGIC, WAL_VERSION};
use coffer_storage::StorageBackend;
use parking_lot::Mutex;
use std::sync::Arc;

/// Header size for WAL records: magic (4) + version (2) + type (1) + length (4).
const HEADER_SIZE: usize = 11;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Manages WAL writes and reads.
pub struct WalManager {
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    sync_on_write: bool,
}

impl WalManager {
    /// Creates a new WAL manager.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            sync_on_write,
        }
    }

    /// Appends a record to the WAL, returning the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the record payload exceeds the maximum encodable
    /// size, or if the underlying backend write fails.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        let payload = record.encode_payload()?;
        let record_type = record.record_type();

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(record_type.as_byte());
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;

        if self.sync_on_write {
            backend.flush()?;
        }

        Ok(offset)
    }

    /// Flushes all pending writes to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Returns the current WAL size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns a streaming iterator over WAL records, using O(1) memory
    /// regardless of WAL size.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<super::WalRecordIterator<'_>> {
        let backend = self.backend.lock();
        super::WalRecordIterator::new(backend, 0)
    }

    /// Iterates over records with a streaming callback. The callback
    /// returns `Ok(true)` to continue or `Ok(false)` to stop early.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the callback returns an error.
    pub fn for_each_streaming<F>(&self, mut callback: F) -> CoreResult<()>
    where
        F: FnMut(u64, WalRecord) -> CoreResult<bool>,
    {
        for result in self.iter()? {
            let (offset, record) = result?;
            if !callback(offset, record)? {
                break;
            }
        }
        Ok(())
    }

    /// Reads all records from the WAL into memory.
    ///
    /// Prefer [`WalManager::iter`] for large WALs.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        self.iter()?.collect()
    }

    /// Truncates the WAL to `offset`, discarding everything after it.
    ///
    /// Used after a checkpoint to reclaim space.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(offset)?;
        Ok(())
    }

    /// Clears all data from the WAL (truncates to zero length).
    pub fn clear(&self) -> CoreResult<()> {
        self.truncate(0)
    }

    #[cfg(test)]
    pub(crate) fn get_backend_for_testing(&self) -> Arc<Mutex<Box<dyn StorageBackend>>> {
        Arc::clone(&self.backend)
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionId, OpId, SequenceNumber};
    use coffer_storage::InMemoryBackend;

    fn create_wal() -> WalManager {
        WalManager::new(Box::new(InMemoryBackend::new()), false)
    }

    #[test]
    fn append_and_read_begin() {
        let wal = create_wal();
        let record = WalRecord::Begin {
            op_id: OpId::new(1),
        };
        wal.append(&record).unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, record);
    }

    #[test]
    fn append_and_read_put() {
        let wal = create_wal();
        let record = WalRecord::Put {
            op_id: OpId::new(1),
            collection_id: CollectionId::new(10),
            key: "widget:1".to_string(),
            after_bytes: vec![0xCA, 0xFE],
        };
        wal.append(&record).unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, record);
    }

    #[test]
    fn full_operation_sequence() {
        let wal = create_wal();

        wal.append(&WalRecord::Begin {
            op_id: OpId::new(1),
        })
        .unwrap();
        wal.append(&WalRecord::Put {
            op_id: OpId::new(1),
            collection_id: CollectionId::new(1),
            key: "a".to_string(),
            after_bytes: vec![10, 20, 30],
        })
        .unwrap();
        wal.append(&WalRecord::Commit {
            op_id: OpId::new(1),
            sequence: SequenceNumber::new(1),
        })
        .unwrap();

        wal.append(&WalRecord::Begin {
            op_id: OpId::new(2),
        })
        .unwrap();
        wal.append(&WalRecord::Put {
            op_id: OpId::new(2),
            collection_id: CollectionId::new(1),
            key: "b".to_string(),
            after_bytes: vec![40, 50],
        })
        .unwrap();
        wal.append(&WalRecord::Abort {
            op_id: OpId::new(2),
        })
        .unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(records[0].1.op_id(), Some(OpId::new(1)));
        assert_eq!(records[5].1.op_id(), Some(OpId::new(2)));
    }

    #[test]
    fn for_each_early_exit() {
        let wal = create_wal();

        for i in 0..10 {
            wal.append(&WalRecord::Begin {
                op_id: OpId::new(i),
            })
            .unwrap();
        }

        let mut count = 0;
        wal.for_each_streaming(|_, _| {
            count += 1;
            Ok(count < 3)
        })
        .unwrap();

        assert_eq!(count, 3);
    }

    #[test]
    fn clear_wal() {
        let wal = create_wal();

        wal.append(&WalRecord::Begin {
            op_id: OpId::new(1),
        })
        .unwrap();
        wal.append(&WalRecord::Commit {
            op_id: OpId::new(1),
            sequence: SequenceNumber::new(1),
        })
        .unwrap();

        assert!(wal.size().unwrap() > 0);
        wal.clear().unwrap();

        assert_eq!(wal.size().unwrap(), 0);
        assert!(wal.read_all().unwrap().is_empty());
    }

    #[test]
    fn truncate_wal() {
        let wal = create_wal();

        let offset1 = wal
            .append(&WalRecord::Begin {
                op_id: OpId::new(1),
            })
            .unwrap();
        let size_after_first = wal.size().unwrap();

        wal.append(&WalRecord::Commit {
            op_id: OpId::new(1),
            sequence: SequenceNumber::new(1),
        })
        .unwrap();

        wal.truncate(size_after_first).unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, offset1);
    }
}
