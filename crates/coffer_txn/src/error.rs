//! Errors the coordinator and the resource adapter can raise.
//!
//! `TxError` is a distinct type from [`coffer_provider::ProviderError`] —
//! the coordinator needs two kinds neither a provider nor the generic
//! taxonomy had a variant for, `TxTimedOut` and `TxInWrongState` — but
//! [`TxError::kind`] maps onto the very same [`coffer_provider::ErrorKind`]
//! so callers can match on one taxonomy regardless of which layer raised
//! the error.

use coffer_provider::{ErrorKind, ProviderError};
use thiserror::Error;

use crate::transaction::TransactionId;

/// Result type for coordinator and resource-adapter operations.
pub type TxResult<T> = Result<T, TxError>;

/// Errors raised by the transaction coordinator or the resource adapter.
#[derive(Debug, Error)]
pub enum TxError {
    /// The coordinator has no record of this transaction (already disposed,
    /// or handle from a different coordinator instance).
    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    /// An API call was illegal for the transaction's current state (e.g.
    /// `enlist` after `commit` was called, or `commit` on an already
    /// terminal transaction).
    #[error("transaction {txn} in state {actual:?}, expected {expected:?}")]
    WrongState {
        /// The transaction in question.
        txn: TransactionId,
        /// The state required for the attempted call.
        expected: crate::state::TxState,
        /// The transaction's actual state.
        actual: crate::state::TxState,
    },

    /// The transaction's deadline elapsed before it reached a terminal
    /// state.
    #[error("transaction {0} timed out")]
    TimedOut(TransactionId),

    /// The transaction's cancellation token was triggered.
    #[error("transaction {0} was cancelled")]
    Cancelled(TransactionId),

    /// A resource returned Abort from `prepare`.
    #[error("resource {resource} refused to prepare: {message}")]
    PrepareRefused {
        /// Name of the refusing resource.
        resource: String,
        /// The resource's stated reason, if any.
        message: String,
    },

    /// A resource's `commit` raised after every resource had already
    /// prepared. The transaction moves to `Failed`; presumed-abort recovery
    /// re-drives the commit against every enlisted resource on next
    /// coordinator startup.
    #[error("commit failed after prepare for transaction {txn}: {message}")]
    CommitFailedAfterPrepare {
        /// The transaction that failed mid-commit.
        txn: TransactionId,
        /// Description of the failure.
        message: String,
    },

    /// One or more resources failed during rollback. Every resource is
    /// still visited; this collects the failures rather than aborting the
    /// traversal early.
    #[error("rollback of transaction {txn} had {} failure(s): {failures}", failures.len())]
    RollbackFailed {
        /// The transaction being rolled back.
        txn: TransactionId,
        /// `"<resource>: <message>"` for each resource that failed to roll
        /// back cleanly.
        failures: Vec<String>,
    },

    /// A provider operation failed while buffering a mutation, preparing,
    /// committing, or rolling back.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The intent log could not be read or appended to.
    #[error("intent log error: {0}")]
    IntentLog(#[from] std::io::Error),

    /// The intent log contains a record that fails its checksum or framing
    /// invariant.
    #[error("intent log corrupt: {0}")]
    IntentLogCorrupt(String),
}

impl TxError {
    /// Maps this error onto the shared [`ErrorKind`] taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::WrongState { .. } => ErrorKind::TxInWrongState,
            Self::TimedOut(_) => ErrorKind::TxTimedOut,
            Self::Cancelled(_) => ErrorKind::Fatal,
            Self::PrepareRefused { .. } => ErrorKind::Conflict,
            Self::CommitFailedAfterPrepare { .. } | Self::RollbackFailed { .. } => ErrorKind::Fatal,
            Self::Provider(e) => e.kind(),
            Self::IntentLog(_) | Self::IntentLogCorrupt(_) => ErrorKind::Fatal,
        }
    }

    /// Returns whether this error is transient and eligible for a caller's
    /// own retry policy (only `BackendUnavailable`-class failures are).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::BackendUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_maps_to_tx_timed_out() {
        let e = TxError::TimedOut(TransactionId::new(1));
        assert_eq!(e.kind(), ErrorKind::TxTimedOut);
    }

    #[test]
    fn wrong_state_maps_to_tx_in_wrong_state() {
        let e = TxError::WrongState {
            txn: TransactionId::new(1),
            expected: crate::state::TxState::Active,
            actual: crate::state::TxState::Committed,
        };
        assert_eq!(e.kind(), ErrorKind::TxInWrongState);
    }

    #[test]
    fn provider_error_kind_passes_through() {
        let e = TxError::Provider(ProviderError::conflict("stale"));
        assert_eq!(e.kind(), ErrorKind::Conflict);
    }
}
