//! Coordinator and per-transaction settings.

use std::path::PathBuf;
use std::time::Duration;

/// Isolation level requested for a transaction.
///
/// Advisory for providers that don't natively honor isolation levels; the
/// coordinator itself only enforces the serializability of commit ordering
/// across its own transactions (see [`crate::TransactionCoordinator`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Strictest level: no enlisted resource's committed state may be
    /// observed to interleave with a concurrent transaction's writes.
    Serializable,
    /// Readers see only already-committed data, but repeated reads within
    /// the same transaction may observe different values.
    ReadCommitted,
}

/// Per-transaction settings recognized by `begin`.
#[derive(Debug, Clone)]
pub struct TransactionSettings {
    /// Requested isolation level.
    pub isolation: Isolation,
    /// Deadline from the moment `begin` is called.
    pub timeout: Duration,
    /// Whether dropping the transaction handle without an explicit
    /// `commit`/`rollback` call triggers an automatic rollback.
    pub auto_rollback_on_dispose: bool,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            isolation: Isolation::Serializable,
            timeout: Duration::from_secs(30),
            auto_rollback_on_dispose: true,
        }
    }
}

impl TransactionSettings {
    /// Settings with the engine's defaults (`Serializable`, 30s, auto-rollback on dispose).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the isolation level.
    #[must_use]
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Overrides the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides whether dropping the handle auto-rolls-back.
    #[must_use]
    pub fn with_auto_rollback_on_dispose(mut self, auto_rollback: bool) -> Self {
        self.auto_rollback_on_dispose = auto_rollback;
        self
    }
}

/// Settings for a [`crate::TransactionCoordinator`] instance.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Path to the coordinator's durable intent log.
    pub intent_log_path: PathBuf,
    /// Default timeout applied to transactions begun without explicit
    /// [`TransactionSettings`].
    pub default_timeout: Duration,
    /// Default for [`TransactionSettings::auto_rollback_on_dispose`] when a
    /// transaction is begun without explicit settings.
    pub auto_rollback_on_dispose: bool,
}

impl CoordinatorSettings {
    /// Settings for a coordinator whose intent log lives at `intent_log_path`.
    #[must_use]
    pub fn new(intent_log_path: impl Into<PathBuf>) -> Self {
        Self {
            intent_log_path: intent_log_path.into(),
            default_timeout: Duration::from_secs(30),
            auto_rollback_on_dispose: true,
        }
    }

    /// Overrides the default per-transaction timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_settings_defaults() {
        let s = TransactionSettings::default();
        assert_eq!(s.isolation, Isolation::Serializable);
        assert_eq!(s.timeout, Duration::from_secs(30));
        assert!(s.auto_rollback_on_dispose);
    }

    #[test]
    fn builder_overrides_apply() {
        let s = TransactionSettings::new()
            .with_isolation(Isolation::ReadCommitted)
            .with_timeout(Duration::from_secs(5))
            .with_auto_rollback_on_dispose(false);
        assert_eq!(s.isolation, Isolation::ReadCommitted);
        assert_eq!(s.timeout, Duration::from_secs(5));
        assert!(!s.auto_rollback_on_dispose);
    }
}
