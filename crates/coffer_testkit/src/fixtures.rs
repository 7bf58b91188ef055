//! Constructors for every storage provider variant, backed by a temp
//! directory where the variant needs one.
//!
//! `named_providers` is the single entry point most tests and property
//! tests want: a fresh instance of every variant that doesn't need an
//! external service, each paired with its backend name.

use std::sync::Arc;

use coffer_provider::StorageProvider;
use coffer_providers::{
    EmbeddedLogDbProvider, EmbeddedLogDbSettings, FilePerRecordProvider, FilePerRecordSettings,
    HierarchicalKeyStoreProvider, HierarchicalKeyStoreSettings, InMemoryProvider,
};
use tempfile::TempDir;

/// A provider instance paired with the temp directory backing it, if any.
/// The directory must outlive the provider, so callers hold this struct
/// rather than just the `Arc<dyn StorageProvider>`.
pub struct ProviderFixture {
    /// The backend name, matching what `coffer_providers::registry` would
    /// register this variant under.
    pub backend_name: &'static str,
    /// The live provider instance.
    pub provider: Arc<dyn StorageProvider>,
    _temp_dir: Option<TempDir>,
}

/// Builds one fresh instance of every provider variant that requires no
/// external service (excludes `embedded_sql` and `networked_sql`, which
/// need a real SQLite file-lock environment and a reachable Postgres
/// respectively and are exercised by their own crate-local tests instead).
///
/// # Panics
///
/// Panics if a variant fails to open against its fresh temp directory,
/// which would indicate a bug in the variant itself rather than in the
/// test using it.
#[must_use]
pub fn named_providers() -> Vec<ProviderFixture> {
    vec![
        in_memory_provider(),
        file_per_record_provider(),
        embedded_log_db_provider(),
        hierarchical_key_store_provider(),
    ]
}

/// A fresh [`InMemoryProvider`].
#[must_use]
pub fn in_memory_provider() -> ProviderFixture {
    ProviderFixture {
        backend_name: "in_memory",
        provider: Arc::new(InMemoryProvider::new("in_memory")),
        _temp_dir: None,
    }
}

/// A fresh [`FilePerRecordProvider`] rooted at a new temp directory.
#[must_use]
pub fn file_per_record_provider() -> ProviderFixture {
    let temp_dir = TempDir::new().expect("create temp dir for file_per_record fixture");
    let settings = FilePerRecordSettings::new("file_per_record", temp_dir.path());
    let provider =
        FilePerRecordProvider::open(settings).expect("open file_per_record fixture provider");
    ProviderFixture {
        backend_name: "file_per_record",
        provider: Arc::new(provider),
        _temp_dir: Some(temp_dir),
    }
}

/// A fresh [`EmbeddedLogDbProvider`] rooted at a new temp directory.
#[must_use]
pub fn embedded_log_db_provider() -> ProviderFixture {
    let temp_dir = TempDir::new().expect("create temp dir for embedded fixture");
    let settings = EmbeddedLogDbSettings::new("embedded", temp_dir.path(), "fixture");
    let provider =
        EmbeddedLogDbProvider::open(settings, "fixture").expect("open embedded fixture provider");
    ProviderFixture {
        backend_name: "embedded",
        provider: Arc::new(provider),
        _temp_dir: Some(temp_dir),
    }
}

/// A fresh [`HierarchicalKeyStoreProvider`] rooted at a new temp
/// directory, standing in for the platform namespace root.
#[must_use]
pub fn hierarchical_key_store_provider() -> ProviderFixture {
    let temp_dir = TempDir::new().expect("create temp dir for hierarchical fixture");
    let settings = HierarchicalKeyStoreSettings::new(
        "hierarchical",
        "test-cluster",
        temp_dir.path(),
        "coffer-testkit",
        "fixture",
    );
    let provider = HierarchicalKeyStoreProvider::open(settings, "fixture")
        .expect("open hierarchical fixture provider");
    ProviderFixture {
        backend_name: "hierarchical",
        provider: Arc::new(provider),
        _temp_dir: Some(temp_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_provider::OpContext;

    #[test]
    fn every_named_provider_round_trips_a_value() {
        for fixture in named_providers() {
            let ctx = OpContext::none();
            fixture
                .provider
                .save("k", b"v", &ctx)
                .unwrap_or_else(|e| panic!("{}: save failed: {e}", fixture.backend_name));
            let got = fixture
                .provider
                .get("k", &ctx)
                .unwrap_or_else(|e| panic!("{}: get failed: {e}", fixture.backend_name));
            assert_eq!(got, b"v", "{} round-trip mismatch", fixture.backend_name);
        }
    }
}
