//! The file-per-record storage provider: one file per key under a root
//! directory, with atomic temp-file-then-rename writes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use coffer_provider::{
    Capabilities, Capability, OpContext, ProviderError, ProviderResult, ProviderSettings, Record,
    StorageProvider,
};
use tracing::debug;

const TEMP_PREFIX: &str = ".tmp-";

/// Settings for [`FilePerRecordProvider`].
#[derive(Debug, Clone)]
pub struct FilePerRecordSettings {
    /// Fields shared by every provider variant.
    pub common: ProviderSettings,
    /// The root directory records are stored under. Created if missing.
    pub root_path: PathBuf,
}

impl FilePerRecordSettings {
    /// Settings for a provider named `name`, rooted at `root_path`.
    #[must_use]
    pub fn new(name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            common: ProviderSettings::new(name),
            root_path: root_path.into(),
        }
    }
}

/// A [`StorageProvider`] that stores each key as its own file.
///
/// Keys are escaped into filenames by hex-encoding any byte that is not an
/// ASCII alphanumeric, `-`, or `.`; the escaping is reversible, so `get_all`
/// can recover the original key from the filename alone without a side
/// index. Writes go through a per-call temp file under the same root,
/// fsynced and renamed into place, so a reader never observes a partial
/// write and a crash mid-write leaves only an orphaned temp file, never a
/// corrupt record.
pub struct FilePerRecordProvider {
    settings: FilePerRecordSettings,
    temp_counter: AtomicU64,
}

impl FilePerRecordProvider {
    /// Opens (creating if missing) the provider rooted at `settings.root_path`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::BackendUnavailable` if the root directory
    /// cannot be created or is not a directory.
    pub fn open(settings: FilePerRecordSettings) -> ProviderResult<Self> {
        fs::create_dir_all(&settings.root_path).map_err(|e| {
            ProviderError::backend_unavailable(format!(
                "failed to create root directory {}: {e}",
                settings.root_path.display()
            ))
        })?;
        if !settings.root_path.is_dir() {
            return Err(ProviderError::backend_unavailable(format!(
                "{} exists and is not a directory",
                settings.root_path.display()
            )));
        }
        Ok(Self {
            settings,
            temp_counter: AtomicU64::new(0),
        })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.settings.root_path.join(encode_filename(key))
    }

    fn temp_path(&self) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.settings
            .root_path
            .join(format!("{TEMP_PREFIX}{}-{n}", std::process::id()))
    }

    fn sync_root_dir(&self) -> ProviderResult<()> {
        if cfg!(unix) {
            fs::File::open(&self.settings.root_path)
                .and_then(|f| f.sync_all())
                .map_err(|e| {
                    ProviderError::backend_unavailable(format!(
                        "failed to fsync root directory: {e}"
                    ))
                })?;
        }
        Ok(())
    }
}

fn encode_filename(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        let is_plain = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.';
        if is_plain {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}

fn decode_filename(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn map_io_error(key: &str, e: io::Error) -> ProviderError {
    if e.kind() == io::ErrorKind::NotFound {
        ProviderError::not_found(key)
    } else {
        ProviderError::Io(e)
    }
}

impl StorageProvider for FilePerRecordProvider {
    fn name(&self) -> &str {
        &self.settings.common.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with(Capability::RangeScan)
    }

    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        ctx.check()?;
        fs::read(self.record_path(key)).map_err(|e| map_io_error(key, e))
    }

    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.settings.root_path)
            .map_err(|e| ProviderError::backend_unavailable(format!("read_dir failed: {e}")))?
        {
            ctx.check()?;
            let entry = entry
                .map_err(|e| ProviderError::backend_unavailable(format!("read_dir entry failed: {e}")))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let Some(key) = decode_filename(file_name) else {
                continue;
            };
            let value = fs::read(entry.path())
                .map_err(|e| ProviderError::backend_unavailable(format!("read failed: {e}")))?;
            let record = Record { key, value };
            if filter.map_or(true, |f| f(&record)) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        let temp_path = self.temp_path();
        write_atomically(&temp_path, &self.record_path(key), value)?;
        self.sync_root_dir()
    }

    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => {
                debug!(key, "file-per-record entry deleted");
                self.sync_root_dir()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::backend_unavailable(format!(
                "delete failed: {e}"
            ))),
        }
    }

    fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        ctx.check()?;
        Ok(self.record_path(key).is_file())
    }

    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        for entry in fs::read_dir(&self.settings.root_path)
            .map_err(|e| ProviderError::backend_unavailable(format!("read_dir failed: {e}")))?
        {
            ctx.check()?;
            let entry = entry
                .map_err(|e| ProviderError::backend_unavailable(format!("read_dir entry failed: {e}")))?;
            if entry.path().is_file() {
                fs::remove_file(entry.path()).map_err(|e| {
                    ProviderError::backend_unavailable(format!("remove failed: {e}"))
                })?;
            }
        }
        self.sync_root_dir()
    }
}

fn write_atomically(temp_path: &Path, final_path: &Path, value: &[u8]) -> ProviderResult<()> {
    fs::write(temp_path, value)
        .map_err(|e| ProviderError::backend_unavailable(format!("write failed: {e}")))?;
    fs::File::open(temp_path)
        .and_then(|f| f.sync_all())
        .map_err(|e| ProviderError::backend_unavailable(format!("fsync failed: {e}")))?;
    fs::rename(temp_path, final_path)
        .map_err(|e| ProviderError::backend_unavailable(format!("rename failed: {e}")))
}
