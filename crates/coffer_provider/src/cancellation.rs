//! Cooperative cancellation and deadline propagation.
//!
//! Coffer has no async runtime: every provider method is an ordinary
//! blocking call. Cooperative cancellation and timeouts are instead
//! threaded through explicitly as a [`CancellationToken`] and [`Deadline`],
//! bundled together in an [`OpContext`] that every [`crate::StorageProvider`]
//! method accepts. Implementations check both at their suspension points
//! (before blocking I/O, before acquiring a lock, before an fsync, before a
//! timed wait) and return [`crate::ProviderError::Cancelled`] /
//! [`crate::ErrorKind::TxTimedOut`] promptly rather than polling a runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable, atomically-flippable cancellation flag.
///
/// Cloning shares the same underlying flag: cancelling any clone cancels
/// all of them. This mirrors the relationship between a transaction
/// coordinator (which can cancel) and the provider calls it has fanned out
/// to enlisted resources (which observe the cancellation).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the token to cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether this token (or any of its clones) was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// An optional point in time after which an operation should give up.
///
/// A `Deadline` with no inner instant never expires; this is the default
/// for callers that do not need a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub fn none() -> Self {
        Self { at: None }
    }

    /// A deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// A deadline at the given instant.
    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// Returns whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Returns the time remaining, or `None` if the deadline never expires.
    /// Returns `Some(Duration::ZERO)` if already expired.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// The cancellation token and deadline threaded through every provider and
/// coordinator operation.
///
/// `OpContext::none()` is the zero-overhead default for callers that don't
/// need either facility.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Deadline,
}

impl OpContext {
    /// An `OpContext` with no cancellation token set and no deadline.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds a context from an explicit token and deadline.
    #[must_use]
    pub fn new(token: CancellationToken, deadline: Deadline) -> Self {
        Self { token, deadline }
    }

    /// Returns a reference to the cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the deadline.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Checks the suspension-point invariant: errors if cancelled or past
    /// the deadline, otherwise returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProviderError::Cancelled`] if the token was
    /// cancelled, or a timed-out [`crate::ProviderError::Fatal`]-class error
    /// if the deadline has passed.
    pub fn check(&self) -> crate::ProviderResult<()> {
        if self.token.is_cancelled() {
            return Err(crate::ProviderError::Cancelled);
        }
        if self.deadline.is_expired() {
            return Err(crate::ProviderError::backend_unavailable(
                "operation deadline exceeded",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clone_shares_state() {
        let a = CancellationToken::new();
        let b = a.clone();
        assert!(!a.is_cancelled());
        b.cancel();
        assert!(a.is_cancelled());
    }

    #[test]
    fn deadline_none_never_expires() {
        assert!(!Deadline::none().is_expired());
        assert_eq!(Deadline::none().remaining(), None);
    }

    #[test]
    fn deadline_after_zero_is_expired() {
        let d = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(d.is_expired());
    }

    #[test]
    fn context_check_rejects_cancelled() {
        let ctx = OpContext::new(CancellationToken::new(), Deadline::none());
        ctx.token().cancel();
        assert!(matches!(
            ctx.check(),
            Err(crate::ProviderError::Cancelled)
        ));
    }
}
