//! # coffer-core
//!
//! Embedded log-structured storage engine backing the `EmbeddedLogDb`
//! storage provider: a write-ahead log for durability, immutable
//! append-only segments for entity data, and a manifest recording the
//! collection registry and last checkpoint.
//!
//! This crate has no opinion on transactions across multiple storage
//! providers — that is the concern of the transaction coordinator layered
//! on top. What it guarantees on its own is standard WAL-database
//! crash safety: a `Put`/`Delete` is durable only once its `Commit`
//! record has been appended (and, if `sync_on_commit` is set, flushed),
//! and recovery replays only committed operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │              DatabaseDir                    │
//! │  (directory lock, manifest load/save,       │
//! │   path layout for WAL + segments)           │
//! └───────────────────┬─────────────────────────┘
//!                      │
//! ┌────────────────────▼──────┐   ┌─────────────────────────┐
//! │       WalManager           │   │     SegmentManager       │
//! │  (append-only log,         │   │  (immutable records,     │
//! │   streaming recovery)      │   │   in-memory key index)   │
//! └────────────────────┬──────┘   └────────────┬─────────────┘
//!                      │                        │
//! ┌────────────────────▼────────────────────────▼─────────────┐
//! │                  StorageBackend (trait)                     │
//! │              (opaque byte store: memory, file)              │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key invariants
//!
//! - WAL-first: every mutation is appended to the WAL before the
//!   segment store is updated.
//! - Recovery replays only operations whose `Commit` record was
//!   durably appended; anything else is discarded.
//! - A directory lock (`DatabaseDir::open`) prevents two processes
//!   from opening the same database concurrently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod manifest;
mod segment;
mod types;
mod wal;

pub use dir::DatabaseDir;
pub use error::{CoreError, CoreResult};
pub use manifest::{Manifest, MANIFEST_MAGIC, MANIFEST_VERSION};
pub use segment::{Segment, SegmentManager, SegmentRecord, SegmentRecordFlags, MAX_KEY_SIZE};
pub use types::{CollectionId, OpId, SequenceNumber};
pub use wal::{
    compute_crc32, StreamingRecovery, WalManager, WalRecord, WalRecordIterator, WalRecordType,
};
