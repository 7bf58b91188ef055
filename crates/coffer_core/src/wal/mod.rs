//! Write-Ahead Log (WAL) for durability and crash recovery.
//!
//! The WAL is the foundation of the embedded log-structured provider's
//! durability guarantees. Every mutation is written to the WAL, and fsynced
//! when the provider is configured for sync-on-write, before the write is
//! acknowledged. On crash, the WAL is replayed to recover committed writes.
//!
//! ## WAL Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Invariants
//!
//! - WAL is **append-only** - records are never modified after write
//! - WAL is **flushed before commit acknowledgment** (when sync-on-write is set)
//! - Recovery replays only **committed** operations
//! - Replay is **idempotent** - multiple replays produce the same state

mod iterator;
mod record;
mod writer;

pub use iterator::{StreamingRecovery, WalRecordIterator};
pub use record::{compute_crc32, WalRecord, WalRecordType};
pub use writer::WalManager;
