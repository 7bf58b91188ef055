//! Cross-crate integration helpers: the universal provider property
//! checks (§8 properties 1-6) run generically against any
//! `StorageProvider`, and the end-to-end 2PC coordinator scenarios.

use std::sync::Arc;

use coffer_provider::{ErrorKind, OpContext, ProviderError, ProviderResult, Record, StorageProvider};
use coffer_txn::{CoordinatorSettings, TransactionCoordinator, TransactionSettings};

/// Runs the universal provider invariants against a freshly constructed,
/// empty provider. Panics (via assertions) on the first violated
/// invariant, identifying it by the property number from the provider
/// contract.
///
/// # Panics
///
/// Panics if `provider` is not empty when passed in, or if any of
/// properties 1-6 fail.
pub fn assert_universal_properties(provider: &dyn StorageProvider) {
    let ctx = OpContext::none();
    assert_eq!(
        provider.count(None, &ctx).expect("count on empty provider"),
        0,
        "provider must be passed in empty"
    );

    // Property 1: Save then Get returns what was saved.
    provider.save("k1", b"v1", &ctx).expect("save k1");
    assert_eq!(provider.get("k1", &ctx).expect("get k1"), b"v1");

    // Property 2: a second Save to the same key overwrites.
    provider.save("k1", b"v2", &ctx).expect("overwrite k1");
    assert_eq!(provider.get("k1", &ctx).expect("get k1 after overwrite"), b"v2");

    // Property 3: Delete then Exists is false.
    provider.delete("k1", &ctx).expect("delete k1");
    assert!(!provider.exists("k1", &ctx).expect("exists k1 after delete"));

    // Property 4: Delete of an absent key is a no-op, not an error.
    provider
        .delete("never-existed", &ctx)
        .expect("delete of absent key must not error");

    // Property 5: Count equals the number of keys for which Exists holds.
    provider.save("a", b"1", &ctx).expect("save a");
    provider.save("b", b"2", &ctx).expect("save b");
    provider.save("c", b"3", &ctx).expect("save c");
    let count = provider.count(None, &ctx).expect("count");
    let existing = ["a", "b", "c"]
        .iter()
        .filter(|k| provider.exists(k, &ctx).unwrap_or(false))
        .count();
    assert_eq!(count, existing);
    assert_eq!(count, 3);

    // Property 6: Clear returns the pre-clear count and empties the store.
    let cleared = provider.clear(&ctx);
    assert!(cleared.is_ok(), "clear must succeed");
    assert_eq!(provider.count(None, &ctx).expect("count after clear"), 0);
}

/// A provider wrapper whose `prepare` liveness probe (`count`) always
/// fails, standing in for a participant that votes Abort during 2PC
/// prepare. Every other operation forwards to the wrapped provider so a
/// resource can still buffer saves against it before the coordinator
/// reaches prepare.
pub struct RefusingProvider<P> {
    inner: P,
}

impl<P: StorageProvider> RefusingProvider<P> {
    /// Wraps `inner` so its prepare vote is always Abort.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: StorageProvider> StorageProvider for RefusingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> coffer_provider::Capabilities {
        self.inner.capabilities()
    }

    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        self.inner.get(key, ctx)
    }

    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        self.inner.get_all(filter, ctx)
    }

    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        self.inner.save(key, value, ctx)
    }

    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        self.inner.delete(key, ctx)
    }

    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        self.inner.clear(ctx)
    }

    fn count(&self, _filter: coffer_provider::RecordFilter<'_>, _ctx: &OpContext) -> ProviderResult<usize> {
        Err(ProviderError::conflict("refusing provider always votes abort at prepare"))
    }
}

/// Runs scenario S4 (2PC happy path): enlists `p1` and `p2` in one
/// transaction, saves one key to each, commits, and asserts both values
/// are observable afterward.
///
/// # Panics
///
/// Panics if enlistment, the buffered saves, the commit, or either
/// post-commit `Get` fails.
pub fn run_2pc_happy_path(
    coordinator: &TransactionCoordinator,
    p1: Arc<dyn StorageProvider>,
    p2: Arc<dyn StorageProvider>,
) {
    let ctx = OpContext::none();
    let txn = coordinator.begin(TransactionSettings::new());
    let r1 = txn.enlist(Arc::clone(&p1)).expect("enlist p1");
    let r2 = txn.enlist(Arc::clone(&p2)).expect("enlist p2");
    r1.save("a", b"vA", &ctx).expect("buffer save a");
    r2.save("b", b"vB", &ctx).expect("buffer save b");

    coordinator.commit(&txn).expect("commit must succeed");

    assert_eq!(p1.get("a", &ctx).expect("p1 must have a"), b"vA");
    assert_eq!(p2.get("b", &ctx).expect("p2 must have b"), b"vB");
}

/// Runs scenario S5 (2PC abort): enlists `p1` and a [`RefusingProvider`]
/// wrapping `p2`, saves one key to each, commits (expecting failure), and
/// asserts neither provider ended up with its key.
///
/// # Panics
///
/// Panics if commit unexpectedly succeeds, or if either provider retained
/// its buffered key after the abort.
pub fn run_2pc_abort_on_refusal(
    coordinator: &TransactionCoordinator,
    p1: Arc<dyn StorageProvider>,
    p2: Arc<dyn StorageProvider>,
) {
    let ctx = OpContext::none();
    let refusing_p2: Arc<dyn StorageProvider> = Arc::new(RefusingProvider::new(ClonedProvider(p2.clone())));
    let txn = coordinator.begin(TransactionSettings::new());
    let r1 = txn.enlist(Arc::clone(&p1)).expect("enlist p1");
    let r2 = txn.enlist(refusing_p2).expect("enlist refusing p2");
    r1.save("a", b"vA", &ctx).expect("buffer save a");
    r2.save("b", b"vB", &ctx).expect("buffer save b");

    let err = coordinator
        .commit(&txn)
        .expect_err("commit must fail when a participant refuses prepare");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert!(p1.get("a", &ctx).is_err(), "p1 must not have committed a");
    assert!(p2.get("b", &ctx).is_err(), "p2 must not have committed b");
}

/// A thin forwarding wrapper so a provider already held as `Arc<dyn
/// StorageProvider>` can be re-wrapped by [`RefusingProvider`], which
/// takes its inner provider by value.
struct ClonedProvider(Arc<dyn StorageProvider>);

impl StorageProvider for ClonedProvider {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn capabilities(&self) -> coffer_provider::Capabilities {
        self.0.capabilities()
    }
    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        self.0.get(key, ctx)
    }
    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        self.0.get_all(filter, ctx)
    }
    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        self.0.save(key, value, ctx)
    }
    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        self.0.delete(key, ctx)
    }
    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        self.0.clear(ctx)
    }
    fn count(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<usize> {
        self.0.count(filter, ctx)
    }
}

/// Opens a [`TransactionCoordinator`] against a fresh intent log under
/// `dir`, for S4-S6-style scenario tests.
///
/// # Panics
///
/// Panics if the intent log cannot be opened.
pub fn open_scenario_coordinator(dir: &std::path::Path) -> TransactionCoordinator {
    TransactionCoordinator::open(CoordinatorSettings::new(dir.join("intent.log")))
        .expect("open scenario coordinator")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::named_providers;
    use coffer_providers::InMemoryProvider;
    use proptest::prelude::*;

    #[test]
    fn universal_properties_hold_for_every_named_provider() {
        for fixture in named_providers() {
            assert_universal_properties(fixture.provider.as_ref());
        }
    }

    #[test]
    fn scenario_s4_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = open_scenario_coordinator(dir.path());
        run_2pc_happy_path(
            &coordinator,
            Arc::new(InMemoryProvider::new("p1")),
            Arc::new(InMemoryProvider::new("p2")),
        );
    }

    #[test]
    fn scenario_s5_abort_on_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = open_scenario_coordinator(dir.path());
        run_2pc_abort_on_refusal(
            &coordinator,
            Arc::new(InMemoryProvider::new("p1")),
            Arc::new(InMemoryProvider::new("p2")),
        );
    }

    proptest::proptest! {
        /// A generated sequence of save/delete/get operations against a
        /// fresh `InMemoryProvider`, checked against a `HashMap` reference
        /// model after every step — the provider must agree with the model
        /// at every point, not just at the end.
        #[test]
        fn operation_sequence_matches_reference_model(
            ops in crate::generators::kv_operation_sequence_strategy(64)
        ) {
            use crate::generators::KvOperation;
            use std::collections::HashMap;

            let provider = InMemoryProvider::new("model-check");
            let ctx = OpContext::none();
            let mut model: HashMap<String, Vec<u8>> = HashMap::new();

            for op in ops {
                match op {
                    KvOperation::Save(k, v) => {
                        provider.save(&k, &v, &ctx).unwrap();
                        model.insert(k, v);
                    }
                    KvOperation::Delete(k) => {
                        provider.delete(&k, &ctx).unwrap();
                        model.remove(&k);
                    }
                    KvOperation::Get(k) => {
                        let expected = model.get(&k).cloned();
                        let actual = provider.get(&k, &ctx).ok();
                        prop_assert_eq!(actual, expected);
                    }
                }
            }
        }
    }
}
