//! # coffer-providers
//!
//! The storage provider variant set plus the registry/factory that
//! resolves a `(backend name, entity type)` pair to a live, shared
//! [`coffer_provider::StorageProvider`] instance.
//!
//! Each variant module implements the same object-safe contract defined
//! in `coffer_provider`, so callers never match on the concrete backend:
//!
//! - [`in_memory::InMemoryProvider`] — sharded, lock-guarded map; no I/O.
//! - [`file_per_record::FilePerRecordProvider`] — one file per key under a root.
//! - [`embedded::EmbeddedLogDbProvider`] — WAL + segment store, crash recovery.
//! - [`embedded_sql::EmbeddedSqlProvider`] — single-file SQLite database.
//! - [`networked_sql::NetworkedSqlProvider`] — pooled Postgres connection.
//! - [`hierarchical::HierarchicalKeyStoreProvider`] — hashed keys under a
//!   platform-provided namespace root.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod embedded;
pub mod embedded_sql;
pub mod file_per_record;
pub mod hierarchical;
pub mod in_memory;
pub mod networked_sql;
mod registry;

pub use embedded::{EmbeddedLogDbProvider, EmbeddedLogDbSettings};
pub use embedded_sql::{EmbeddedSqlProvider, EmbeddedSqlSettings};
pub use file_per_record::{FilePerRecordProvider, FilePerRecordSettings};
pub use hierarchical::{HierarchicalKeyStoreProvider, HierarchicalKeyStoreSettings};
pub use in_memory::{InMemoryProvider, InMemorySettings};
pub use networked_sql::{NetworkedSqlProvider, NetworkedSqlSettings};
pub use registry::{ProviderFactory, ProviderRegistry};
