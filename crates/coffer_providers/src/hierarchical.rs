//! The hierarchical key store provider: keys are hashed into value names
//! under a path built from `{cluster, application, service, entity type}`
//! segments, mirroring a namespaced registry-like cluster store.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use coffer_provider::{
    Capabilities, OpContext, ProviderError, ProviderResult, ProviderSettings, Record,
    StorageProvider,
};
use directories::ProjectDirs;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const COMPRESSION_FLAG_NONE: u8 = 0;
const COMPRESSION_FLAG_GZIP: u8 = 1;
/// Values at or above this size are gzip-compressed when compression is
/// enabled; smaller values are stored raw regardless of the setting, since
/// gzip's own framing overhead would net-lose on tiny payloads.
const COMPRESSION_THRESHOLD_BYTES: usize = 256;

/// Settings for [`HierarchicalKeyStoreProvider`].
#[derive(Debug, Clone)]
pub struct HierarchicalKeyStoreSettings {
    /// Fields shared by every provider variant.
    pub common: ProviderSettings,
    /// The cluster namespace this store instance belongs to.
    pub cluster_name: String,
    /// Filesystem root the namespace hierarchy is rooted at.
    pub root_path: PathBuf,
    /// The owning application's name; the first path segment under
    /// `cluster_name`.
    pub application_name: String,
    /// The owning service's name; the second path segment.
    pub service_name: String,
    /// Values larger than this are rejected with `SizeExceeded`.
    pub max_value_size_kb: u32,
    /// Whether values at or above [`COMPRESSION_THRESHOLD_BYTES`] are
    /// gzip-compressed before being written.
    pub enable_compression: bool,
    /// Whether to fall back to a process-local namespace root if the
    /// configured cluster root is unavailable.
    pub fallback_to_local_registry: bool,
    /// Simulated connection timeout; the filesystem backend has no network
    /// round trip to bound, so this only documents intended parity with a
    /// networked cluster store and is not otherwise enforced.
    pub connection_timeout_seconds: u32,
    /// Number of retries for a transient I/O failure.
    pub retry_count: u32,
    /// Delay between retries.
    pub retry_delay_milliseconds: u32,
}

impl HierarchicalKeyStoreSettings {
    /// Settings with reasonable defaults for a named cluster store rooted
    /// at `root_path`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        cluster_name: impl Into<String>,
        root_path: impl Into<PathBuf>,
        application_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            common: ProviderSettings::new(name),
            cluster_name: cluster_name.into(),
            root_path: root_path.into(),
            application_name: application_name.into(),
            service_name: service_name.into(),
            max_value_size_kb: 1024,
            enable_compression: true,
            fallback_to_local_registry: false,
            connection_timeout_seconds: 10,
            retry_count: 3,
            retry_delay_milliseconds: 50,
        }
    }

    /// Overrides the maximum value size, in kibibytes.
    #[must_use]
    pub fn with_max_value_size_kb(mut self, kb: u32) -> Self {
        self.max_value_size_kb = kb;
        self
    }

    /// Overrides whether compression is enabled.
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Overrides whether local-registry fallback is enabled.
    #[must_use]
    pub fn with_fallback_to_local_registry(mut self, enabled: bool) -> Self {
        self.fallback_to_local_registry = enabled;
        self
    }
}

/// A [`StorageProvider`] over a hashed, namespaced key hierarchy.
///
/// The on-disk value name is the SHA-256 hex digest of the key; the
/// original key is not recoverable from the name, so it's carried inside
/// the stored payload alongside the (optionally compressed) value. This
/// keeps `get_all` working without a side index, at the cost of one extra
/// round trip of decoding per record.
pub struct HierarchicalKeyStoreProvider {
    settings: HierarchicalKeyStoreSettings,
    entity_type: String,
}

impl HierarchicalKeyStoreProvider {
    /// Opens the provider for `entity_type` under `settings`'s namespace.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::BackendUnavailable` if neither the primary
    /// nor (when enabled) the fallback namespace root can be created.
    pub fn open(
        settings: HierarchicalKeyStoreSettings,
        entity_type: impl Into<String>,
    ) -> ProviderResult<Self> {
        let provider = Self {
            settings,
            entity_type: entity_type.into(),
        };
        provider.with_retry(|| provider.ensure_root())?;
        Ok(provider)
    }

    fn primary_root(&self) -> PathBuf {
        self.settings
            .root_path
            .join(&self.settings.cluster_name)
            .join(&self.settings.application_name)
            .join(&self.settings.service_name)
            .join(&self.entity_type)
    }

    fn fallback_root(&self) -> Option<PathBuf> {
        ProjectDirs::from("", "", &self.settings.application_name).map(|dirs| {
            dirs.data_local_dir()
                .join(&self.settings.cluster_name)
                .join(&self.settings.service_name)
                .join(&self.entity_type)
        })
    }

    /// Creates the primary namespace root, falling back to the local
    /// registry root if enabled and the primary is unavailable.
    fn ensure_root(&self) -> ProviderResult<PathBuf> {
        let primary = self.primary_root();
        match fs::create_dir_all(&primary) {
            Ok(()) => Ok(primary),
            Err(primary_err) => {
                if self.settings.fallback_to_local_registry {
                    if let Some(fallback) = self.fallback_root() {
                        warn!(
                            cluster = %self.settings.cluster_name,
                            error = %primary_err,
                            "cluster namespace root unavailable, falling back to local registry"
                        );
                        fs::create_dir_all(&fallback).map_err(|e| {
                            ProviderError::backend_unavailable(format!(
                                "fallback namespace root also unavailable: {e}"
                            ))
                        })?;
                        return Ok(fallback);
                    }
                }
                Err(ProviderError::backend_unavailable(format!(
                    "namespace root {} unavailable: {primary_err}",
                    primary.display()
                )))
            }
        }
    }

    fn value_path(&self, key: &str) -> ProviderResult<PathBuf> {
        Ok(self.ensure_root()?.join(hash_key(key)))
    }

    fn with_retry<T>(&self, mut op: impl FnMut() -> ProviderResult<T>) -> ProviderResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.settings.retry_count => {
                    attempt += 1;
                    debug!(attempt, "retrying transient hierarchical store failure");
                    thread::sleep(Duration::from_millis(
                        self.settings.retry_delay_milliseconds.into(),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn encode_payload(&self, key: &str, value: &[u8]) -> ProviderResult<Vec<u8>> {
        let key_bytes = key.as_bytes();
        let mut envelope = Vec::with_capacity(4 + key_bytes.len() + value.len());
        envelope.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
        envelope.extend_from_slice(key_bytes);
        envelope.extend_from_slice(value);

        if self.settings.enable_compression && envelope.len() >= COMPRESSION_THRESHOLD_BYTES {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&envelope)
                .and_then(|()| encoder.finish())
                .map(|compressed| {
                    let mut out = Vec::with_capacity(compressed.len() + 1);
                    out.push(COMPRESSION_FLAG_GZIP);
                    out.extend_from_slice(&compressed);
                    out
                })
                .map_err(|e| ProviderError::corrupt(format!("compression failed: {e}")))
        } else {
            let mut out = Vec::with_capacity(envelope.len() + 1);
            out.push(COMPRESSION_FLAG_NONE);
            out.extend_from_slice(&envelope);
            Ok(out)
        }
    }

    fn decode_payload(&self, raw: &[u8]) -> ProviderResult<(String, Vec<u8>)> {
        let (flag, body) = raw
            .split_first()
            .ok_or_else(|| ProviderError::corrupt("empty hierarchical store record"))?;
        let envelope = match *flag {
            COMPRESSION_FLAG_NONE => body.to_vec(),
            COMPRESSION_FLAG_GZIP => {
                let mut decoder = GzDecoder::new(body);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| ProviderError::corrupt(format!("decompression failed: {e}")))?;
                out
            }
            other => {
                return Err(ProviderError::corrupt(format!(
                    "unknown compression flag {other}"
                )))
            }
        };
        if envelope.len() < 4 {
            return Err(ProviderError::corrupt("truncated hierarchical store envelope"));
        }
        let key_len = u32::from_le_bytes(envelope[0..4].try_into().unwrap()) as usize;
        let key_bytes = envelope
            .get(4..4 + key_len)
            .ok_or_else(|| ProviderError::corrupt("truncated key in hierarchical store envelope"))?;
        let key = String::from_utf8(key_bytes.to_vec())
            .map_err(|e| ProviderError::corrupt(format!("key is not valid utf-8: {e}")))?;
        let value = envelope[4 + key_len..].to_vec();
        Ok((key, value))
    }
}

fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn map_io_error(key: &str, e: io::Error) -> ProviderError {
    if e.kind() == io::ErrorKind::NotFound {
        ProviderError::not_found(key)
    } else {
        ProviderError::backend_unavailable(e.to_string())
    }
}

impl StorageProvider for HierarchicalKeyStoreProvider {
    fn name(&self) -> &str {
        &self.settings.common.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        ctx.check()?;
        self.with_retry(|| {
            let raw = fs::read(self.value_path(key)?).map_err(|e| map_io_error(key, e))?;
            let (_, value) = self.decode_payload(&raw)?;
            Ok(value)
        })
    }

    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        let root = self.ensure_root()?;
        let mut out = Vec::new();
        for entry in fs::read_dir(&root)
            .map_err(|e| ProviderError::backend_unavailable(format!("read_dir failed: {e}")))?
        {
            ctx.check()?;
            let entry = entry
                .map_err(|e| ProviderError::backend_unavailable(format!("read_dir entry failed: {e}")))?;
            if !entry.path().is_file() {
                continue;
            }
            let raw = fs::read(entry.path())
                .map_err(|e| ProviderError::backend_unavailable(format!("read failed: {e}")))?;
            let (key, value) = self.decode_payload(&raw)?;
            let record = Record { key, value };
            if filter.map_or(true, |f| f(&record)) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        let limit_bytes = (self.settings.max_value_size_kb as usize) * 1024;
        if value.len() > limit_bytes {
            return Err(ProviderError::size_exceeded(value.len(), limit_bytes));
        }
        let payload = self.encode_payload(key, value)?;
        self.with_retry(|| {
            let path = self.value_path(key)?;
            fs::write(&path, &payload)
                .map_err(|e| ProviderError::backend_unavailable(format!("write failed: {e}")))
        })
    }

    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.with_retry(|| match fs::remove_file(self.value_path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::backend_unavailable(format!(
                "delete failed: {e}"
            ))),
        })
    }

    fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        ctx.check()?;
        Ok(self.value_path(key)?.is_file())
    }

    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        let root = self.ensure_root()?;
        for entry in fs::read_dir(&root)
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

    fn provider(root: &std::path::Path) -> HierarchicalKeyStoreProvider {
        let settings =
            HierarchicalKeyStoreSettings::new("registry", "cluster-a", root, "coffer", "kv");
        HierarchicalKeyStoreProvider::open(settings, "widgets").unwrap()
    }

    #[test]
    fn save_then_get_roundtrips_small_value() {
        let dir = tempdir().unwrap();
        let p = provider(dir.path());
        p.save("widgets/1", b"payload", &ctx()).unwrap();
        assert_eq!(p.get("widgets/1", &ctx()).unwrap(), b"payload");
    }

    #[test]
    fn save_then_get_roundtrips_large_compressible_value() {
        let dir = tempdir().unwrap();
        let p = provider(dir.path());
        let value = vec![b'x'; 4096];
        p.save("big", &value, &ctx()).unwrap();
        assert_eq!(p.get("big", &ctx()).unwrap(), value);
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let p = provider(dir.path());
        let err = p.get("missing", &ctx()).unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::NotFound);
    }

    #[test]
    fn oversized_value_is_rejected() {
        let dir = tempdir().unwrap();
        let settings = HierarchicalKeyStoreSettings::new("registry", "cluster-a", dir.path(), "coffer", "kv")
            .with_max_value_size_kb(1);
        let p = HierarchicalKeyStoreProvider::open(settings, "widgets").unwrap();
        let value = vec![0u8; 2048];
        let err = p.save("too-big", &value, &ctx()).unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::SizeExceeded);
    }

    #[test]
    fn get_all_recovers_original_keys_from_payload_not_filename() {
        let dir = tempdir().unwrap();
        let p = provider(dir.path());
        p.save("original-key-one", b"v1", &ctx()).unwrap();
        p.save("original-key-two", b"v2", &ctx()).unwrap();
        let mut keys: Vec<_> = p.get_all(None, &ctx()).unwrap().into_iter().map(|r| r.key).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["original-key-one".to_string(), "original-key-two".to_string()]
        );
    }

    #[test]
    fn hash_key_is_deterministic_and_hex() {
        let a = hash_key("same-key");
        let b = hash_key("same-key");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn clear_removes_all_values() {
        let dir = tempdir().unwrap();
        let p = provider(dir.path());
        p.save("k1", b"v", &ctx()).unwrap();
        p.save("k2", b"v", &ctx()).unwrap();
        p.clear(&ctx()).unwrap();
        assert!(p.get_all(None, &ctx()).unwrap().is_empty());
    }
}
