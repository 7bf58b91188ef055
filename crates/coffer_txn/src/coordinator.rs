//! The two-phase commit coordinator: `begin`/`commit`/`rollback`, the
//! durable intent log, and presumed-abort recovery on restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use coffer_provider::StorageProvider;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{TxError, TxResult};
use crate::intent_log::{verify_digest, IntentLog, IntentRecord, ResourceVote};
use crate::resource::{EnlistedResource, LoggedMutation, MutationKind};
use crate::settings::{CoordinatorSettings, TransactionSettings};
use crate::state::TxState;
use crate::transaction::{Transaction, TransactionId, TransactionIdGenerator};

/// A resource whose transaction logged `PrepareComplete` but no terminal
/// marker before the coordinator last shut down — the presumed-abort
/// recovery path must re-drive its commit, not abort it.
#[derive(Debug, Clone)]
struct PendingResource {
    resource_id: u32,
    resource_name: String,
    digest: [u8; 32],
    mutations: Vec<LoggedMutation>,
}

/// A transaction awaiting recovery, discovered by [`TransactionCoordinator::open`]
/// scanning the intent log.
#[derive(Debug, Clone)]
pub struct PendingRecovery {
    txn_id: TransactionId,
    resources: Vec<PendingResource>,
}

impl PendingRecovery {
    /// The transaction this recovery concerns.
    #[must_use]
    pub fn txn_id(&self) -> TransactionId {
        self.txn_id
    }

    /// Names of the enlisted resources the replay needs resolved providers
    /// for.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.resource_name.as_str()).collect()
    }
}

/// The outcome of a [`TransactionCoordinator::recover`] pass.
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    /// Transactions whose commit was successfully re-driven to completion.
    pub recommitted: Vec<TransactionId>,
    /// Transactions still awaiting recovery because one or more enlisted
    /// resource names could not be resolved by the supplied callback.
    /// Retry on a later call once those providers are available.
    pub unresolved: Vec<TransactionId>,
}

/// Coordinator-driven two-phase commit over any number of enlisted
/// [`StorageProvider`] instances, in one process address space.
///
/// Not distributed: the protocol is the textbook one anyway, so a single
/// resource's failure to prepare aborts the whole transaction, and a crash
/// between `Prepared` and `Committed` recovers deterministically from the
/// durable intent log on the next [`TransactionCoordinator::open`].
pub struct TransactionCoordinator {
    settings: CoordinatorSettings,
    intent_log: IntentLog,
    ids: TransactionIdGenerator,
    pending: Mutex<Vec<PendingRecovery>>,
}

impl TransactionCoordinator {
    /// Opens the coordinator's intent log at `settings.intent_log_path`
    /// (creating it and its parent directory if absent) and runs the
    /// startup recovery scan.
    ///
    /// Transactions with no `PrepareComplete` record are immediately
    /// marked `AbortComplete` — presumed-abort, since nothing was ever
    /// applied to a provider before that marker is written. Transactions
    /// with `PrepareComplete` but no terminal marker are parked in
    /// [`Self::pending_recoveries`] for the caller to resolve via
    /// [`Self::recover`] once it can supply live provider handles for
    /// their enlisted resource names.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent log cannot be opened or is corrupt.
    pub fn open(settings: CoordinatorSettings) -> TxResult<Self> {
        let intent_log = IntentLog::open(&settings.intent_log_path)?;
        let pending = Self::scan_for_recovery(&intent_log)?;
        Ok(Self {
            settings,
            intent_log,
            ids: TransactionIdGenerator::default(),
            pending: Mutex::new(pending),
        })
    }

    /// Opens a coordinator whose intent log path is `path`, using default
    /// settings otherwise.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_at(path: impl AsRef<Path>) -> TxResult<Self> {
        Self::open(CoordinatorSettings::new(path.as_ref().to_path_buf()))
    }

    fn scan_for_recovery(intent_log: &IntentLog) -> TxResult<Vec<PendingRecovery>> {
        let records = intent_log.read_all()?;

        let mut by_txn: HashMap<u64, Vec<IntentRecord>> = HashMap::new();
        for record in records {
            by_txn.entry(record.txn_id()).or_default().push(record);
        }

        let mut pending = Vec::new();
        for (txn, records) in by_txn {
            let terminal = records.iter().any(|r| {
                matches!(
                    r,
                    IntentRecord::CommitComplete { .. } | IntentRecord::AbortComplete { .. }
                )
            });
            if terminal {
                continue;
            }

            let prepare = records.iter().find_map(|r| match r {
                IntentRecord::PrepareComplete { resources, .. } => Some(resources.clone()),
                _ => None,
            });

            match prepare {
                None => {
                    // Presumed-abort: never reached Prepared, so nothing
                    // was ever applied to a provider. Terminate now.
                    info!(txn, "intent log recovery: presumed-abort, no prepare record");
                    intent_log.append(&IntentRecord::AbortComplete { txn }, true)?;
                }
                Some(votes) => {
                    let resources = votes
                        .into_iter()
                        .map(|vote| build_pending_resource(vote, &records))
                        .collect();
                    pending.push(PendingRecovery {
                        txn_id: TransactionId::new(txn),
                        resources,
                    });
                }
            }
        }

        pending.sort_by_key(|p| p.txn_id.as_u64());
        Ok(pending)
    }

    /// Transactions awaiting recovery after the startup scan.
    #[must_use]
    pub fn pending_recoveries(&self) -> Vec<PendingRecovery> {
        self.pending.lock().clone()
    }

    /// Re-drives the commit of every pending recovery whose resources
    /// `resolve` can name. Each resolved resource's buffered mutations
    /// (captured in the intent log before `PrepareComplete`) are replayed
    /// directly against the provider — idempotently, since replaying a
    /// save or delete twice converges to the same end state — and the
    /// transaction's `CommitComplete` marker is appended once every
    /// enlisted resource has been replayed.
    ///
    /// Transactions with a resource `resolve` returns `None` for are left
    /// pending for a subsequent call.
    ///
    /// # Errors
    ///
    /// Returns an error only for conditions that are not retry-safe: a
    /// replayed mutation list's digest not matching the one recorded in
    /// `PrepareComplete` ([`TxError::IntentLogCorrupt`]), or a provider
    /// call failing ([`TxError::Provider`]).
    pub fn recover<F>(&self, resolve: F) -> TxResult<RecoveryReport>
    where
        F: Fn(&str) -> Option<Arc<dyn StorageProvider>>,
    {
        let mut report = RecoveryReport::default();
        let mut still_pending = Vec::new();

        for recovery in self.pending.lock().drain(..) {
            let mut resolved = Vec::with_capacity(recovery.resources.len());
            let mut all_resolved = true;
            for pr in &recovery.resources {
                match resolve(&pr.resource_name) {
                    Some(provider) => resolved.push(provider),
                    None => {
                        all_resolved = false;
                        break;
                    }
                }
            }

            if !all_resolved {
                report.unresolved.push(recovery.txn_id);
                still_pending.push(recovery);
                continue;
            }

            for (pr, provider) in recovery.resources.iter().zip(resolved.iter()) {
                if !verify_digest(&pr.mutations, pr.digest) {
                    return Err(TxError::IntentLogCorrupt(format!(
                        "recovered mutation list for resource {} does not match its prepare digest",
                        pr.resource_name
                    )));
                }
                let ctx = coffer_provider::OpContext::none();
                for mutation in &pr.mutations {
                    match mutation.kind {
                        MutationKind::Save => provider.save(&mutation.key, &mutation.payload, &ctx)?,
                        MutationKind::Delete => provider.delete(&mutation.key, &ctx)?,
                    }
                }
            }

            self.intent_log.append(
                &IntentRecord::CommitComplete {
                    txn: recovery.txn_id.as_u64(),
                },
                true,
            )?;
            info!(txn = %recovery.txn_id, "intent log recovery: re-drove commit to completion");
            report.recommitted.push(recovery.txn_id);
        }

        *self.pending.lock() = still_pending;
        Ok(report)
    }

    /// Begins a new transaction with `settings`.
    #[must_use]
    pub fn begin(&self, settings: TransactionSettings) -> Arc<Transaction> {
        Transaction::new(self.ids.next(), settings)
    }

    /// Begins a new transaction with the coordinator's default settings.
    #[must_use]
    pub fn begin_default(&self) -> Arc<Transaction> {
        self.begin(
            TransactionSettings::new()
                .with_timeout(self.settings.default_timeout)
                .with_auto_rollback_on_dispose(self.settings.auto_rollback_on_dispose),
        )
    }

    /// Runs the 2PC protocol over `txn`'s enlisted resources to completion:
    /// prepare every resource in enlistment order, log `PrepareComplete`,
    /// then apply every resource's commit in enlistment order and log
    /// `CommitComplete`.
    ///
    /// # Errors
    ///
    /// - [`TxError::WrongState`] if `txn` is not `Active`.
    /// - [`TxError::TimedOut`] if the deadline passed before every resource
    ///   prepared; `txn` ends `RolledBack` with no partial effects.
    /// - [`TxError::PrepareRefused`] if any resource voted to abort; every
    ///   other already-prepared resource is rolled back and `txn` ends
    ///   `RolledBack`.
    /// - [`TxError::CommitFailedAfterPrepare`] if a resource's commit
    ///   raises after every resource had prepared; `txn` ends `Failed` and
    ///   recovers via [`Self::recover`] on the next coordinator restart.
    pub fn commit(&self, txn: &Arc<Transaction>) -> TxResult<()> {
        txn.require_active()?;

        if txn.is_expired() {
            return self.timeout_and_rollback(txn);
        }

        txn.set_state(TxState::Preparing);
        let ctx = txn.op_context();
        let resources = txn.resources_snapshot();

        for resource in &resources {
            if txn.is_expired() {
                return self.timeout_and_rollback_resources(txn, &resources);
            }
            if ctx.token().is_cancelled() {
                self.rollback_resources(&resources, &ctx);
                txn.set_state(TxState::RolledBack);
                return Err(TxError::Cancelled(txn.id()));
            }
            if let Err(e) = resource.prepare(&ctx) {
                self.rollback_resources(&resources, &ctx);
                txn.set_state(TxState::RolledBack);
                return Err(TxError::PrepareRefused {
                    resource: resource.name().to_string(),
                    message: e.to_string(),
                });
            }
        }
        txn.set_state(TxState::Prepared);

        let mut votes = Vec::with_capacity(resources.len());
        for (index, resource) in resources.iter().enumerate() {
            let resource_id = index as u32;
            for mutation in resource.buffered_mutations() {
                self.intent_log.append(
                    &IntentRecord::Mutation {
                        txn: txn.id().as_u64(),
                        resource_id,
                        resource_name: resource.name().to_string(),
                        kind: mutation.kind,
                        key: mutation.key,
                        payload: mutation.payload,
                    },
                    false,
                )?;
            }
            votes.push(ResourceVote {
                resource_id,
                resource_name: resource.name().to_string(),
                digest: resource.mutation_digest(),
            });
        }
        self.intent_log.append(
            &IntentRecord::PrepareComplete {
                txn: txn.id().as_u64(),
                resources: votes,
            },
            true,
        )?;

        txn.set_state(TxState::Committing);

        for resource in &resources {
            if let Err(e) = resource.commit(&ctx) {
                txn.set_state(TxState::Failed);
                warn!(
                    txn = %txn.id(),
                    resource = resource.name(),
                    error = %e,
                    "commit failed after prepare; awaiting intent-log recovery"
                );
                return Err(TxError::CommitFailedAfterPrepare {
                    txn: txn.id(),
                    message: e.to_string(),
                });
            }
        }

        self.intent_log.append(
            &IntentRecord::CommitComplete {
                txn: txn.id().as_u64(),
            },
            true,
        )?;
        txn.set_state(TxState::Committed);
        Ok(())
    }

    /// Forces the abort path: rolls back every enlisted resource in
    /// enlistment order, collecting (not stopping at) any failures, then
    /// appends `AbortComplete`.
    ///
    /// # Errors
    ///
    /// - [`TxError::WrongState`] if `txn` is not `Active`.
    /// - [`TxError::RollbackFailed`] if any resource failed to roll back;
    ///   `txn` still ends `RolledBack`, since every resource was visited.
    pub fn rollback(&self, txn: &Arc<Transaction>) -> TxResult<()> {
        txn.require_active()?;
        txn.set_state(TxState::RollingBack);
        let ctx = txn.op_context();
        let resources = txn.resources_snapshot();
        let failures = self.rollback_resources(&resources, &ctx);

        self.intent_log.append(
            &IntentRecord::AbortComplete {
                txn: txn.id().as_u64(),
            },
            true,
        )?;
        txn.set_state(TxState::RolledBack);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TxError::RollbackFailed {
                txn: txn.id(),
                failures,
            })
        }
    }

    fn rollback_resources(
        &self,
        resources: &[Arc<EnlistedResource>],
        ctx: &coffer_provider::OpContext,
    ) -> Vec<String> {
        let mut failures = Vec::new();
        for resource in resources {
            if let Err(e) = resource.rollback(ctx) {
                failures.push(format!("{}: {e}", resource.name()));
            }
        }
        failures
    }

    fn timeout_and_rollback(&self, txn: &Arc<Transaction>) -> TxResult<()> {
        let resources = txn.resources_snapshot();
        self.timeout_and_rollback_resources(txn, &resources)
    }

    fn timeout_and_rollback_resources(
        &self,
        txn: &Arc<Transaction>,
        resources: &[Arc<EnlistedResource>],
    ) -> TxResult<()> {
        txn.set_state(TxState::TimedOut);
        txn.set_state(TxState::RollingBack);
        let ctx = txn.op_context();
        self.rollback_resources(resources, &ctx);
        self.intent_log.append(
            &IntentRecord::AbortComplete {
                txn: txn.id().as_u64(),
            },
            true,
        )?;
        txn.set_state(TxState::RolledBack);
        Err(TxError::TimedOut(txn.id()))
    }
}

fn build_pending_resource(vote: ResourceVote, records: &[IntentRecord]) -> PendingResource {
    let mutations = records
        .iter()
        .filter_map(|r| match r {
            IntentRecord::Mutation {
                resource_id,
                kind,
                key,
                payload,
                ..
            } if *resource_id == vote.resource_id => Some(LoggedMutation {
                kind: *kind,
                key: key.clone(),
                payload: payload.clone(),
            }),
            _ => None,
        })
        .collect();
    PendingResource {
        resource_id: vote.resource_id,
        resource_name: vote.resource_name,
        digest: vote.digest,
        mutations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_providers::InMemoryProvider;
    use std::time::Duration;

    fn coordinator(dir: &tempfile::TempDir) -> TransactionCoordinator {
        TransactionCoordinator::open_at(dir.path().join("intent.log")).unwrap()
    }

    #[test]
    fn happy_path_commits_both_resources() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let p1 = Arc::new(InMemoryProvider::new("p1"));
        let p2 = Arc::new(InMemoryProvider::new("p2"));

        let txn = coordinator.begin(TransactionSettings::new());
        let r1 = txn.enlist(p1.clone()).unwrap();
        let r2 = txn.enlist(p2.clone()).unwrap();
        let ctx = coffer_provider::OpContext::none();
        r1.save("a", b"vA", &ctx).unwrap();
        r2.save("b", b"vB", &ctx).unwrap();

        coordinator.commit(&txn).unwrap();

        assert_eq!(txn.state(), TxState::Committed);
        assert_eq!(p1.get("a", &ctx).unwrap(), b"vA");
        assert_eq!(p2.get("b", &ctx).unwrap(), b"vB");
    }

    struct RefusingProvider {
        inner: InMemoryProvider,
    }

    impl StorageProvider for RefusingProvider {
        fn name(&self) -> &str {
            "refusing"
        }
        fn capabilities(&self) -> coffer_provider::Capabilities {
            self.inner.capabilities()
        }
        fn get(&self, key: &str, ctx: &coffer_provider::OpContext) -> coffer_provider::ProviderResult<Vec<u8>> {
            self.inner.get(key, ctx)
        }
        fn get_all(
            &self,
            filter: coffer_provider::RecordFilter<'_>,
            ctx: &coffer_provider::OpContext,
        ) -> coffer_provider::ProviderResult<Vec<coffer_provider::Record>> {
            self.inner.get_all(filter, ctx)
        }
        fn save(&self, key: &str, value: &[u8], ctx: &coffer_provider::OpContext) -> coffer_provider::ProviderResult<()> {
            self.inner.save(key, value, ctx)
        }
        fn delete(&self, key: &str, ctx: &coffer_provider::OpContext) -> coffer_provider::ProviderResult<()> {
            self.inner.delete(key, ctx)
        }
        fn clear(&self, ctx: &coffer_provider::OpContext) -> coffer_provider::ProviderResult<()> {
            self.inner.clear(ctx)
        }
        fn count(
            &self,
            _filter: coffer_provider::RecordFilter<'_>,
            _ctx: &coffer_provider::OpContext,
        ) -> coffer_provider::ProviderResult<usize> {
            Err(coffer_provider::ProviderError::conflict("always refuses prepare"))
        }
    }

    #[test]
    fn abort_path_leaves_every_resource_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let p1 = Arc::new(InMemoryProvider::new("p1"));
        let p2 = Arc::new(RefusingProvider {
            inner: InMemoryProvider::new("p2"),
        });

        let txn = coordinator.begin(TransactionSettings::new());
        let r1 = txn.enlist(p1.clone()).unwrap();
        let r2 = txn.enlist(p2.clone()).unwrap();
        let ctx = coffer_provider::OpContext::none();
        r1.save("a", b"vA", &ctx).unwrap();
        r2.save("b", b"vB", &ctx).unwrap();

        let err = coordinator.commit(&txn).unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::Conflict);
        assert_eq!(txn.state(), TxState::RolledBack);
        assert!(p1.get("a", &ctx).is_err());
        assert!(p2.get("b", &ctx).is_err());
    }

    #[test]
    fn expired_deadline_times_out_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let p1 = Arc::new(InMemoryProvider::new("p1"));

        let txn = coordinator.begin(TransactionSettings::new().with_timeout(Duration::from_millis(0)));
        let r1 = txn.enlist(p1.clone()).unwrap();
        r1.save("a", b"vA", &coffer_provider::OpContext::none()).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let err = coordinator.commit(&txn).unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::TxTimedOut);
        assert_eq!(txn.state(), TxState::RolledBack);
        assert!(p1.get("a", &coffer_provider::OpContext::none()).is_err());
    }

    #[test]
    fn commit_on_terminal_transaction_is_wrong_state() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let txn = coordinator.begin(TransactionSettings::new());
        coordinator.commit(&txn).unwrap();
        let err = coordinator.commit(&txn).unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::TxInWrongState);
    }

    #[test]
    fn rollback_after_saves_restores_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let p1 = Arc::new(InMemoryProvider::new("p1"));
        p1.save("a", b"original", &coffer_provider::OpContext::none()).unwrap();

        let txn = coordinator.begin(TransactionSettings::new());
        let r1 = txn.enlist(p1.clone()).unwrap();
        r1.save("a", b"updated", &coffer_provider::OpContext::none()).unwrap();

        coordinator.rollback(&txn).unwrap();
        assert_eq!(txn.state(), TxState::RolledBack);
        assert_eq!(
            p1.get("a", &coffer_provider::OpContext::none()).unwrap(),
            b"original"
        );
    }

    #[test]
    fn restart_without_prepare_complete_presumes_abort() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("intent.log");
        {
            let coordinator = TransactionCoordinator::open_at(&log_path).unwrap();
            let p1 = Arc::new(InMemoryProvider::new("p1"));
            let txn = coordinator.begin(TransactionSettings::new());
            let r1 = txn.enlist(p1).unwrap();
            // Buffer a write but never call commit/rollback before
            // "crashing" (dropping the coordinator, which never touched
            // the provider because nothing reached `Committing`).
            r1.save("a", b"vA", &coffer_provider::OpContext::none()).unwrap();
            std::mem::forget(txn);
        }

        let reopened = TransactionCoordinator::open_at(&log_path).unwrap();
        assert!(reopened.pending_recoveries().is_empty());
    }

    #[test]
    fn restart_after_prepare_complete_recommits_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("intent.log");
        let txn_id;
        {
            let coordinator = TransactionCoordinator::open_at(&log_path).unwrap();
            let p1 = Arc::new(InMemoryProvider::new("p1"));
            let txn = coordinator.begin(TransactionSettings::new());
            txn_id = txn.id();
            let r1 = txn.enlist(p1).unwrap();

            // Manually drive only through PrepareComplete, as if the
            // process crashed between logging it and applying commits.
            let ctx = txn.op_context();
            r1.save("a", b"vA", &ctx).unwrap();
            let resources = txn.resources_snapshot();
            for resource in &resources {
                resource.prepare(&ctx).unwrap();
            }
            for (index, resource) in resources.iter().enumerate() {
                for mutation in resource.buffered_mutations() {
                    coordinator
                        .intent_log
                        .append(
                            &IntentRecord::Mutation {
                                txn: txn_id.as_u64(),
                                resource_id: index as u32,
                                resource_name: resource.name().to_string(),
                                kind: mutation.kind,
                                key: mutation.key,
                                payload: mutation.payload,
                            },
                            false,
                        )
                        .unwrap();
                }
            }
            coordinator
                .intent_log
                .append(
                    &IntentRecord::PrepareComplete {
                        txn: txn_id.as_u64(),
                        resources: vec![ResourceVote {
                            resource_id: 0,
                            resource_name: "p1".to_string(),
                            digest: resources[0].mutation_digest(),
                        }],
                    },
                    true,
                )
                .unwrap();
            std::mem::forget(txn);
        }

        let reopened = TransactionCoordinator::open_at(&log_path).unwrap();
        let pending = reopened.pending_recoveries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].txn_id(), txn_id);

        let p1 = Arc::new(InMemoryProvider::new("p1"));
        let p1_dyn: Arc<dyn StorageProvider> = p1.clone();
        let report = reopened
            .recover(|name| if name == "p1" { Some(p1_dyn.clone()) } else { None })
            .unwrap();

        assert_eq!(report.recommitted, vec![txn_id]);
        assert!(reopened.pending_recoveries().is_empty());
        assert_eq!(p1.get("a", &coffer_provider::OpContext::none()).unwrap(), b"vA");
    }
}
