//! The error taxonomy shared by every provider and by the transaction coordinator.

use thiserror::Error;

/// The nine distinguishable error kinds a caller can match on, independent
/// of which provider or coordinator path produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key absent on `Get`/`Delete` where presence was assumed.
    NotFound,
    /// Backend already held exclusively by another process.
    InstanceBusy,
    /// Transient I/O or network error.
    BackendUnavailable,
    /// Serialized value exceeds the backend's configured cap.
    SizeExceeded,
    /// An integrity check (checksum, magic, structural) failed.
    Corrupt,
    /// Optimistic concurrency check failed.
    Conflict,
    /// A transaction exceeded its deadline.
    TxTimedOut,
    /// The coordinator or a resource received an operation illegal in its
    /// current state (enlist after prepare, commit after terminal, ...).
    TxInWrongState,
    /// An unrecoverable invariant violation.
    Fatal,
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors a [`crate::StorageProvider`] can return.
///
/// Every variant maps onto exactly one [`ErrorKind`] via [`ProviderError::kind`],
/// so callers that only care about the taxonomy never need to match on the
/// concrete variant.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Key absent where presence was assumed.
    #[error("not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// Backend instance already held by another process.
    #[error("instance busy: {instance}")]
    InstanceBusy {
        /// The instance name or path in contention.
        instance: String,
    },

    /// Transient backend failure; may be retried per the provider's policy.
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        /// Description of the transient failure.
        message: String,
    },

    /// Serialized payload exceeds the backend's configured maximum size.
    #[error("size exceeded: payload is {size} bytes, limit is {limit} bytes")]
    SizeExceeded {
        /// Size of the rejected payload.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// An integrity check failed.
    #[error("corrupt: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Optimistic concurrency check failed.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    /// Operation was cancelled via its [`crate::CancellationToken`].
    #[error("operation cancelled")]
    Cancelled,

    /// An unrecoverable invariant violation.
    #[error("fatal: {message}")]
    Fatal {
        /// Description of the violated invariant.
        message: String,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying entity (de)serialization failure.
    #[error("codec error: {0}")]
    Codec(#[from] coffer_codec::CodecError),

    /// Underlying low-level storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] coffer_storage::StorageError),
}

impl ProviderError {
    /// Creates a `NotFound` error for `key`.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an `InstanceBusy` error for `instance`.
    pub fn instance_busy(instance: impl Into<String>) -> Self {
        Self::InstanceBusy {
            instance: instance.into(),
        }
    }

    /// Creates a `BackendUnavailable` error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `SizeExceeded` error.
    pub fn size_exceeded(size: usize, limit: usize) -> Self {
        Self::SizeExceeded { size, limit }
    }

    /// Creates a `Corrupt` error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a `Conflict` error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a `Fatal` error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Maps this error onto its taxonomy [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InstanceBusy { .. } => ErrorKind::InstanceBusy,
            Self::BackendUnavailable { .. } | Self::Io(_) => ErrorKind::BackendUnavailable,
            Self::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            Self::Corrupt { .. } | Self::Codec(_) => ErrorKind::Corrupt,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Cancelled => ErrorKind::Fatal,
            Self::Fatal { .. } => ErrorKind::Fatal,
            Self::Storage(e) => storage_error_kind(e),
        }
    }

    /// Returns whether this error is transient and eligible for the
    /// provider's own retry-with-backoff policy (§7 propagation policy:
    /// only `BackendUnavailable` is retried).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::BackendUnavailable
    }
}

fn storage_error_kind(e: &coffer_storage::StorageError) -> ErrorKind {
    match e {
        coffer_storage::StorageError::Corrupted(_) => ErrorKind::Corrupt,
        coffer_storage::StorageError::Closed => ErrorKind::Fatal,
        coffer_storage::StorageError::Io(_) | coffer_storage::StorageError::ReadPastEnd { .. } => {
            ErrorKind::BackendUnavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_kind() {
        assert_eq!(ProviderError::not_found("k").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn only_backend_unavailable_is_retryable() {
        assert!(ProviderError::backend_unavailable("timeout").is_retryable());
        assert!(!ProviderError::conflict("stale").is_retryable());
        assert!(!ProviderError::not_found("k").is_retryable());
    }
}
