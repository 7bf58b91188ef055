//! The embedded log-structured DB provider: wraps `coffer_core`'s
//! directory layout, write-ahead log, and segment store with the
//! operational contract a real embedded log-structured engine (ESENT,
//! LMDB-alikes) exposes — dirty-shutdown recovery, a bounded read-session
//! pool, and a single-entry write permit so readers stay parallel while
//! writers serialize.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use coffer_core::{
    CollectionId, DatabaseDir, Manifest, OpId, SegmentManager, SegmentRecord, SequenceNumber,
    StreamingRecovery, WalManager, WalRecord,
};
use coffer_provider::{
    Capabilities, Capability, OpContext, ProviderError, ProviderResult, ProviderSettings, Record,
    StorageProvider,
};
use coffer_storage::FileBackend;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

const SEGMENT_FILE_NAME: &str = "seg-000001.dat";

/// Fixed page-size choices the embedded log-structured DB accepts,
/// mirroring the real engine's configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSizeKb {
    /// 2 KiB pages.
    Two,
    /// 4 KiB pages.
    Four,
    /// 8 KiB pages.
    Eight,
    /// 16 KiB pages.
    Sixteen,
    /// 32 KiB pages.
    ThirtyTwo,
}

impl PageSizeKb {
    /// Size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Two => 2 * 1024,
            Self::Four => 4 * 1024,
            Self::Eight => 8 * 1024,
            Self::Sixteen => 16 * 1024,
            Self::ThirtyTwo => 32 * 1024,
        }
    }
}

/// Settings for [`EmbeddedLogDbProvider`].
#[derive(Debug, Clone)]
pub struct EmbeddedLogDbSettings {
    /// Fields shared by every provider variant.
    pub common: ProviderSettings,
    /// Directory this instance's WAL, segments, and manifest live under.
    pub database_path: PathBuf,
    /// The exclusive instance name; forms part of the busy-error message
    /// when a second process attempts to open the same instance.
    pub instance_name: String,
    /// Advisory cache size; `coffer_core`'s segment index is in-memory and
    /// unbounded, so this only documents intended parity with a real
    /// engine's buffer pool.
    pub cache_size_mb: u32,
    /// Advisory maximum database size; not enforced by `coffer_core`.
    pub max_database_size_mb: u32,
    /// Fixed page size.
    pub page_size_kb: PageSizeKb,
    /// Whether reads are drawn from a bounded session pool rather than
    /// opening a fresh session per call.
    pub use_session_pool: bool,
    /// Capacity of the read-session pool, when enabled.
    pub session_pool_capacity: usize,
    /// Whether a dirty-shutdown or corrupt-log open attempts recovery
    /// (replay then, failing that, quarantine-and-reset) rather than
    /// surfacing the error immediately as `Fatal`.
    pub enable_crash_recovery: bool,
    /// Age, in days, past which stale temp files are removed during
    /// recovery.
    pub temp_file_retention_days: u32,
}

impl EmbeddedLogDbSettings {
    /// Settings for an instance named `instance_name` rooted at
    /// `database_path`, with the engine's common defaults.
    #[must_use]
    pub fn new(name: impl Into<String>, database_path: impl Into<PathBuf>, instance_name: impl Into<String>) -> Self {
        Self {
            common: ProviderSettings::new(name),
            database_path: database_path.into(),
            instance_name: instance_name.into(),
            cache_size_mb: 64,
            max_database_size_mb: 4096,
            page_size_kb: PageSizeKb::Eight,
            use_session_pool: true,
            session_pool_capacity: 8,
            enable_crash_recovery: true,
            temp_file_retention_days: 7,
        }
    }

    /// Overrides whether the session pool is used.
    #[must_use]
    pub fn with_session_pool(mut self, enabled: bool, capacity: usize) -> Self {
        self.use_session_pool = enabled;
        self.session_pool_capacity = capacity.max(1);
        self
    }

    /// Overrides the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: PageSizeKb) -> Self {
        self.page_size_kb = page_size;
        self
    }
}

/// A bounded pool of read "sessions". `coffer_core` has no separate session
/// handle of its own, so a session here is just a permit bounding
/// concurrent readers to `capacity`; draining and returning permits models
/// the real engine's session-pool discipline (FIFO acquisition, unconditional
/// return) without needing a distinct session object.
struct SessionPool {
    capacity: usize,
    available: StdMutex<usize>,
    cv: Condvar,
}

impl SessionPool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: StdMutex::new(capacity),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) -> SessionGuard<'_> {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        while *available == 0 {
            available = self.cv.wait(available).unwrap_or_else(|e| e.into_inner());
        }
        *available -= 1;
        SessionGuard { pool: self }
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        *available = (*available + 1).min(self.capacity);
        self.cv.notify_one();
    }
}

struct SessionGuard<'a> {
    pool: &'a SessionPool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// The durable, lockable state backing one open instance: the directory
/// lock, WAL, segment store, and manifest, plus the counters assigning
/// op IDs and sequence numbers.
struct CoreHandle {
    dir: DatabaseDir,
    wal: WalManager,
    segments: SegmentManager,
    manifest: RwLock<Manifest>,
    next_op_id: AtomicU64,
    next_seq: AtomicU64,
    write_permit: Mutex<()>,
}

/// A [`StorageProvider`] backed by `coffer_core`'s embedded log-structured
/// engine: WAL-first durability, crash recovery on open, a single-entry
/// write permit, and parallel reads through a bounded session pool.
pub struct EmbeddedLogDbProvider {
    settings: EmbeddedLogDbSettings,
    entity_type: String,
    core: Arc<CoreHandle>,
    sessions: Option<SessionPool>,
}

impl EmbeddedLogDbProvider {
    /// Opens (creating if absent, recovering if dirty) the provider for
    /// `entity_type` under `settings.database_path`.
    ///
    /// Implements the initialization algorithm: attach-and-open; on
    /// dirty-shutdown or log corruption, run recovery and retry once; any
    /// other error (besides the instance already being held) is `Fatal`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::InstanceBusy` if another process holds this
    /// instance's directory lock, or `ProviderError::Fatal` if recovery
    /// itself cannot bring the instance up.
    pub fn open(settings: EmbeddedLogDbSettings, entity_type: impl Into<String>) -> ProviderResult<Self> {
        let entity_type = entity_type.into();
        let core = match Self::try_attach(&settings) {
            Ok(core) => core,
            Err(e) if matches!(e.kind(), coffer_provider::ErrorKind::InstanceBusy) => {
                return Err(e)
            }
            Err(e) if settings.enable_crash_recovery && is_recoverable(&e) => {
                warn!(
                    instance = %settings.instance_name,
                    error = %e,
                    "embedded log DB open failed, running recovery"
                );
                Self::quarantine_and_reset(&settings)?;
                Self::try_attach(&settings)?
            }
            Err(e) => return Err(ProviderError::fatal(e.to_string())),
        };

        let sessions = settings
            .use_session_pool
            .then(|| SessionPool::new(settings.session_pool_capacity));

        let provider = Self {
            settings,
            entity_type,
            core,
            sessions,
        };
        provider.ensure_collection()?;
        Ok(provider)
    }

    fn try_attach(settings: &EmbeddedLogDbSettings) -> ProviderResult<Arc<CoreHandle>> {
        let dir = DatabaseDir::open(&settings.database_path, true).map_err(map_core_instance_error(settings))?;

        let manifest = dir.load_manifest().map_err(map_core)?.unwrap_or_else(|| {
            Manifest::new((1, 0))
        });

        let wal_backend = FileBackend::open(&dir.wal_path()).map_err(|e| {
            ProviderError::backend_unavailable(format!("failed to open WAL: {e}"))
        })?;
        let wal = WalManager::new(Box::new(wal_backend), true);

        std::fs::create_dir_all(dir.segments_dir())
            .map_err(|e| ProviderError::backend_unavailable(format!("failed to create segments dir: {e}")))?;
        let segment_path = dir.segments_dir().join(SEGMENT_FILE_NAME);
        let segment_backend = FileBackend::open(&segment_path).map_err(|e| {
            ProviderError::backend_unavailable(format!("failed to open segment store: {e}"))
        })?;
        let max_segment_size = u64::from(settings.max_database_size_mb) * 1024 * 1024;
        let segments = SegmentManager::new(Box::new(segment_backend), max_segment_size);
        segments.rebuild_index().map_err(map_core)?;

        let checkpoint_seq = manifest.last_checkpoint.map_or(0, SequenceNumber::as_u64);
        let (next_op_id, next_seq) = replay_wal(&wal, &segments, checkpoint_seq).map_err(map_core)?;

        dir.save_manifest(&manifest).map_err(map_core)?;

        info!(
            instance = %settings.instance_name,
            path = %settings.database_path.display(),
            "embedded log DB instance attached"
        );

        Ok(Arc::new(CoreHandle {
            dir,
            wal,
            segments,
            manifest: RwLock::new(manifest),
            next_op_id: AtomicU64::new(next_op_id),
            next_seq: AtomicU64::new(next_seq),
            write_permit: Mutex::new(()),
        }))
    }

    /// Quarantines a corrupted instance directory by renaming it aside
    /// (atomically) and re-initializes a fresh one in its place, per the
    /// recovery algorithm's step 3.
    fn quarantine_and_reset(settings: &EmbeddedLogDbSettings) -> ProviderResult<()> {
        let path = &settings.database_path;
        if path.exists() {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let quarantined = quarantine_path(path, stamp);
            std::fs::rename(path, &quarantined).map_err(|e| {
                ProviderError::fatal(format!(
                    "failed to quarantine corrupted instance at {}: {e}",
                    path.display()
                ))
            })?;
            warn!(
                from = %path.display(),
                to = %quarantined.display(),
                "quarantined corrupted embedded log DB instance"
            );
        }
        std::fs::create_dir_all(path)
            .map_err(|e| ProviderError::fatal(format!("failed to recreate instance directory: {e}")))?;
        Ok(())
    }

    fn ensure_collection(&self) -> ProviderResult<CollectionId> {
        let existing = self.core.manifest.read().get_collection(&self.entity_type);
        if let Some(id) = existing {
            return Ok(CollectionId::new(id));
        }
        let mut manifest = self.core.manifest.write();
        let id = manifest.get_or_create_collection(&self.entity_type);
        self.core.dir.save_manifest(&manifest).map_err(map_core)?;
        Ok(CollectionId::new(id))
    }

    fn acquire_session(&self) -> Option<SessionGuard<'_>> {
        self.sessions.as_ref().map(SessionPool::acquire)
    }
}

fn replay_wal(wal: &WalManager, segments: &SegmentManager, checkpoint_seq: u64) -> coffer_core::CoreResult<(u64, u64)> {
    let mut recovery = StreamingRecovery::new(checkpoint_seq);
    recovery.scan_committed(wal.iter()?)?;

    let mut pending: std::collections::HashMap<OpId, WalRecord> = std::collections::HashMap::new();
    for result in wal.iter()? {
        let (_, record) = result?;
        match &record {
            WalRecord::Put { op_id, .. } | WalRecord::Delete { op_id, .. } => {
                pending.insert(*op_id, record);
            }
            WalRecord::Commit { op_id, sequence } => {
                if let Some(op) = pending.remove(op_id) {
                    apply_committed(segments, op, *sequence)?;
                }
            }
            WalRecord::Abort { op_id } => {
                pending.remove(op_id);
            }
            WalRecord::Begin { .. } | WalRecord::Checkpoint { .. } => {}
        }
    }

    Ok((recovery.next_op_id(), recovery.next_seq()))
}

fn apply_committed(segments: &SegmentManager, op: WalRecord, sequence: SequenceNumber) -> coffer_core::CoreResult<()> {
    let record = match op {
        WalRecord::Put {
            collection_id,
            key,
            after_bytes,
            ..
        } => SegmentRecord::put(collection_id, key, after_bytes, sequence),
        WalRecord::Delete {
            collection_id, key, ..
        } => SegmentRecord::tombstone(collection_id, key, sequence),
        _ => return Ok(()),
    };
    segments.append(&record)?;
    Ok(())
}

fn is_recoverable(e: &ProviderError) -> bool {
    matches!(e.kind(), coffer_provider::ErrorKind::Corrupt)
}

fn quarantine_path(path: &Path, stamp: u64) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "instance".to_string());
    path.with_file_name(format!("{name}.corrupted.{stamp}"))
}

fn map_core(e: coffer_core::CoreError) -> ProviderError {
    ProviderError::from(e)
}

fn map_core_instance_error(
    settings: &EmbeddedLogDbSettings,
) -> impl Fn(coffer_core::CoreError) -> ProviderError + '_ {
    move |e| match e {
        coffer_core::CoreError::DatabaseLocked => {
            ProviderError::instance_busy(settings.instance_name.clone())
        }
        other => ProviderError::from(other),
    }
}

impl StorageProvider for EmbeddedLogDbProvider {
    fn name(&self) -> &str {
        &self.settings.common.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with(Capability::BatchAtomic)
    }

    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        ctx.check()?;
        let _session = self.acquire_session();
        let collection_id = self.ensure_collection()?;
        self.core
            .segments
            .get(collection_id, key)
            .map_err(map_core)?
            .ok_or_else(|| ProviderError::not_found(key))
    }

    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        ctx.check()?;
        let _session = self.acquire_session();
        let collection_id = self.ensure_collection()?;
        Ok(self
            .core
            .segments
            .iter_collection(collection_id)
            .map_err(map_core)?
            .into_iter()
            .map(|(key, value)| Record { key, value })
            .filter(|r| filter.map_or(true, |f| f(r)))
            .collect())
    }

    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        let collection_id = self.ensure_collection()?;
        let _permit = self.core.write_permit.lock();
        ctx.check()?;

        let op_id = OpId::new(self.core.next_op_id.fetch_add(1, Ordering::SeqCst));
        let sequence = SequenceNumber::new(self.core.next_seq.fetch_add(1, Ordering::SeqCst));

        self.core
            .wal
            .append(&WalRecord::Begin { op_id })
            .map_err(map_core)?;
        self.core
            .wal
            .append(&WalRecord::Put {
                op_id,
                collection_id,
                key: key.to_string(),
                after_bytes: value.to_vec(),
            })
            .map_err(map_core)?;
        self.core
            .wal
            .append(&WalRecord::Commit { op_id, sequence })
            .map_err(map_core)?;
        self.core.wal.flush().map_err(map_core)?;

        let record = SegmentRecord::put(collection_id, key, value.to_vec(), sequence);
        self.core.segments.append(&record).map_err(map_core)?;
        Ok(())
    }

    fn save_many(&self, records: &[Record], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        let collection_id = self.ensure_collection()?;
        let _permit = self.core.write_permit.lock();

        for r in records {
            ctx.check()?;
            let op_id = OpId::new(self.core.next_op_id.fetch_add(1, Ordering::SeqCst));
            let sequence = SequenceNumber::new(self.core.next_seq.fetch_add(1, Ordering::SeqCst));
            self.core
                .wal
                .append(&WalRecord::Begin { op_id })
                .map_err(map_core)?;
            self.core
                .wal
                .append(&WalRecord::Put {
                    op_id,
                    collection_id,
                    key: r.key.clone(),
                    after_bytes: r.value.clone(),
                })
                .map_err(map_core)?;
            self.core
                .wal
                .append(&WalRecord::Commit { op_id, sequence })
                .map_err(map_core)?;
            let segment_record = SegmentRecord::put(collection_id, r.key.clone(), r.value.clone(), sequence);
            self.core.segments.append(&segment_record).map_err(map_core)?;
        }
        self.core.wal.flush().map_err(map_core)?;
        Ok(())
    }

    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        let collection_id = self.ensure_collection()?;
        let _permit = self.core.write_permit.lock();
        ctx.check()?;

        let op_id = OpId::new(self.core.next_op_id.fetch_add(1, Ordering::SeqCst));
        let sequence = SequenceNumber::new(self.core.next_seq.fetch_add(1, Ordering::SeqCst));

        self.core
            .wal
            .append(&WalRecord::Begin { op_id })
            .map_err(map_core)?;
        self.core
            .wal
            .append(&WalRecord::Delete {
                op_id,
                collection_id,
                key: key.to_string(),
            })
            .map_err(map_core)?;
        self.core
            .wal
            .append(&WalRecord::Commit { op_id, sequence })
            .map_err(map_core)?;
        self.core.wal.flush().map_err(map_core)?;

        let record = SegmentRecord::tombstone(collection_id, key, sequence);
        self.core.segments.append(&record).map_err(map_core)?;
        Ok(())
    }

    fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        ctx.check()?;
        let _session = self.acquire_session();
        let collection_id = self.ensure_collection()?;
        Ok(self
            .core
            .segments
            .get(collection_id, key)
            .map_err(map_core)?
            .is_some())
    }

    fn count(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<usize> {
        ctx.check()?;
        if filter.is_none() {
            let _session = self.acquire_session();
            let collection_id = self.ensure_collection()?;
            return Ok(self
                .core
                .segments
                .iter_collection(collection_id)
                .map_err(map_core)?
                .len());
        }
        Ok(self.get_all(filter, ctx)?.len())
    }

    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        let collection_id = self.ensure_collection()?;
        let _permit = self.core.write_permit.lock();
        let keys: Vec<String> = self
            .core
            .segments
            .iter_collection(collection_id)
            .map_err(map_core)?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for key in &keys {
            ctx.check()?;
            let op_id = OpId::new(self.core.next_op_id.fetch_add(1, Ordering::SeqCst));
            let sequence = SequenceNumber::new(self.core.next_seq.fetch_add(1, Ordering::SeqCst));
            self.core
                .wal
                .append(&WalRecord::Begin { op_id })
                .map_err(map_core)?;
            self.core
                .wal
                .append(&WalRecord::Delete {
                    op_id,
                    collection_id,
                    key: key.clone(),
                })
                .map_err(map_core)?;
            self.core
                .wal
                .append(&WalRecord::Commit { op_id, sequence })
                .map_err(map_core)?;
            let record = SegmentRecord::tombstone(collection_id, key, sequence);
            self.core.segments.append(&record).map_err(map_core)?;
        }
        self.core.wal.flush().map_err(map_core)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx() -> OpContext {
        OpContext::none()
    }

    fn open(root: &Path, entity_type: &str) -> EmbeddedLogDbProvider {
        let settings = EmbeddedLogDbSettings::new("edb", root, "test-instance");
        EmbeddedLogDbProvider::open(settings, entity_type).unwrap()
    }

    #[test]
    fn save_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let p = open(dir.path(), "widgets");
        p.save("w1", b"payload", &ctx()).unwrap();
        assert_eq!(p.get("w1", &ctx()).unwrap(), b"payload");
    }

    #[test]
    fn overwrite_replaces_value() {
        let dir = tempdir().unwrap();
        let p = open(dir.path(), "widgets");
        p.save("w1", b"first", &ctx()).unwrap();
        p.save("w1", b"second", &ctx()).unwrap();
        assert_eq!(p.get("w1", &ctx()).unwrap(), b"second");
        assert_eq!(p.count(None, &ctx()).unwrap(), 1);
    }

    #[test]
    fn delete_then_exists_false() {
        let dir = tempdir().unwrap();
        let p = open(dir.path(), "widgets");
        p.save("w1", b"v", &ctx()).unwrap();
        p.delete("w1", &ctx()).unwrap();
        assert!(!p.exists("w1", &ctx()).unwrap());
    }

    #[test]
    fn delete_missing_is_noop() {
        let dir = tempdir().unwrap();
        let p = open(dir.path(), "widgets");
        assert!(p.delete("missing", &ctx()).is_ok());
    }

    #[test]
    fn reopen_after_clean_shutdown_survives_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instance");
        {
            let p = open(&path, "widgets");
            p.save("crash-1", b"V", &ctx()).unwrap();
        }
        let p = open(&path, "widgets");
        assert_eq!(p.get("crash-1", &ctx()).unwrap(), b"V");
    }

    #[test]
    fn second_open_of_same_instance_is_busy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instance");
        let _first = open(&path, "widgets");
        let settings = EmbeddedLogDbSettings::new("edb", &path, "test-instance");
        let err = EmbeddedLogDbProvider::open(settings, "widgets").unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::InstanceBusy);
    }

    #[test]
    fn corrupted_manifest_is_quarantined_and_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instance");
        {
            let p = open(&path, "widgets");
            p.save("k1", b"v1", &ctx()).unwrap();
        }
        std::fs::write(path.join("MANIFEST"), b"not a manifest").unwrap();

        let settings = EmbeddedLogDbSettings::new("edb", &path, "test-instance");
        let p = EmbeddedLogDbProvider::open(settings, "widgets").unwrap();
        assert!(p.get("k1", &ctx()).is_err());
        p.save("k2", b"v2", &ctx()).unwrap();
        assert_eq!(p.get("k2", &ctx()).unwrap(), b"v2");

        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|e| e.file_name().to_string_lossy().contains(".corrupted."));
        assert!(quarantined);
    }

    #[test]
    fn concurrent_writes_to_distinct_keys_all_land() {
        use std::sync::Arc;
        let dir = tempdir().unwrap();
        let p = Arc::new(open(dir.path(), "widgets"));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        p.save(&format!("t{t}-{i}"), b"v", &OpContext::none()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.count(None, &ctx()).unwrap(), 100);
    }
}
