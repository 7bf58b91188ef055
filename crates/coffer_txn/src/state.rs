//! The transaction state machine.

/// A transaction's lifecycle state.
///
/// ```text
/// Active → Preparing (commit called)
/// Preparing → Prepared (all resources returned Prepared)
///           → RollingBack (any resource aborted, or timeout fired)
/// Prepared → Committing → Committed (all resource commits applied)
///                       → Failed (a resource commit raised after Prepared)
/// RollingBack → RolledBack
/// Any state → TimedOut on deadline; TimedOut transitions to RollingBack.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Open for enlistment and buffered mutations.
    Active,
    /// `commit` has been called; resources are being asked to prepare.
    Preparing,
    /// Every enlisted resource returned Prepared.
    Prepared,
    /// Resource commits are being applied.
    Committing,
    /// Every resource commit applied successfully. Terminal.
    Committed,
    /// The transaction is being rolled back.
    RollingBack,
    /// Rollback completed on every resource. Terminal.
    RolledBack,
    /// A resource commit raised after Prepared; awaiting presumed-abort
    /// recovery to re-drive the commit. Terminal until recovery resolves
    /// it into `Committed` or `RolledBack` on the next coordinator
    /// startup.
    Failed,
    /// The transaction's deadline elapsed. Always transitions immediately
    /// to `RollingBack`.
    TimedOut,
}

impl TxState {
    /// Returns whether this state is terminal — no further transition
    /// through the normal API is possible (`Failed` only resolves via
    /// intent-log recovery on coordinator restart).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }

    /// Returns whether new resources may still be enlisted.
    #[must_use]
    pub fn accepts_enlistment(self) -> bool {
        matches!(self, Self::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TxState::Committed.is_terminal());
        assert!(TxState::RolledBack.is_terminal());
        assert!(TxState::Failed.is_terminal());
        assert!(!TxState::Active.is_terminal());
        assert!(!TxState::Preparing.is_terminal());
    }

    #[test]
    fn only_active_accepts_enlistment() {
        assert!(TxState::Active.accepts_enlistment());
        assert!(!TxState::Preparing.accepts_enlistment());
        assert!(!TxState::Committed.accepts_enlistment());
    }
}
