//! Segment storage for entities.
//!
//! Segments are immutable, append-only files that store entity records.
//! Once sealed, segments are never modified.
//!
//! ## Segment Record Format
//!
//! ```text
//! | record_len (4) | collection_id (4) | key_len (2) | flags (1) | sequence (8) | key (N) | payload (M) | checksum (4) |
//! ```
//!
//! Flags:
//! - `0x01` = tombstone (deleted entity)

mod record;
mod store;

pub use record::{Segment, SegmentRecord, SegmentRecordFlags, MAX_KEY_SIZE};
pub use store::SegmentManager;
