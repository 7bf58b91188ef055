//! Error types for the embedded log-structured DB provider's internals.
//!
//! These are internal to this crate; at the `coffer_provider::StorageProvider`
//! boundary they are mapped onto `coffer_provider::ProviderError` (see
//! `provider.rs`).

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the embedded log-structured DB provider.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] coffer_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] coffer_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Segment is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// Database is already open or locked by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Manifest persistence failed.
    #[error("manifest persist failed: {message}")]
    ManifestPersistFailed {
        /// Description of the failure.
        message: String,
    },

    /// Segment file creation failed.
    #[error("segment file creation failed: {path}")]
    SegmentFileCreationFailed {
        /// Path that failed to create.
        path: String,
        /// Underlying error message.
        source_message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a manifest persist failed error.
    pub fn manifest_persist_failed(message: impl Into<String>) -> Self {
        Self::ManifestPersistFailed {
            message: message.into(),
        }
    }

    /// Creates a segment file creation failed error.
    pub fn segment_file_creation_failed(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self::SegmentFileCreationFailed {
            path: path.into(),
            source_message: source.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

impl From<CoreError> for coffer_provider::ProviderError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Storage(s) => Self::Storage(s),
            CoreError::Codec(c) => Self::Codec(c),
            CoreError::Io(io) => Self::Io(io),
            CoreError::DatabaseLocked => Self::instance_busy("embedded log-structured DB"),
            CoreError::WalCorruption { message }
            | CoreError::SegmentCorruption { message }
            | CoreError::InvalidFormat { message }
            | CoreError::ManifestPersistFailed { message } => Self::corrupt(message),
            CoreError::ChecksumMismatch { expected, actual } => Self::corrupt(format!(
                "checksum mismatch: expected {expected:08x}, got {actual:08x}"
            )),
            CoreError::CollectionNotFound { name } => {
                Self::not_found(format!("collection {name}"))
            }
            CoreError::InvalidOperation { message } | CoreError::InvalidArgument { message } => {
                Self::fatal(message)
            }
            CoreError::DatabaseClosed => Self::fatal("database is closed"),
            CoreError::SegmentFileCreationFailed {
                path,
                source_message,
            } => Self::backend_unavailable(format!(
                "segment file creation failed at {path}: {source_message}"
            )),
        }
    }
}
