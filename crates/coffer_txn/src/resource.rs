//! The Transactional Resource Adapter: wraps any [`StorageProvider`] as a
//! two-phase participant.
//!
//! During the Active phase the adapter buffers mutations without touching
//! the underlying provider. Reads are overlaid by the transaction's own
//! buffer first, so read-your-writes holds even though nothing has been
//! applied yet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use coffer_provider::{
    Capability, ErrorKind, OpContext, ProviderResult, Record, StorageProvider,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
enum Mutation {
    Save { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl Mutation {
    fn key(&self) -> &str {
        match self {
            Self::Save { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Which kind of mutation a [`LoggedMutation`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationKind {
    /// A save (upsert).
    Save,
    /// A delete.
    Delete,
}

/// A single buffered mutation, flattened for the coordinator's intent log.
/// `payload` is empty (and ignored) for `Delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoggedMutation {
    pub(crate) kind: MutationKind,
    pub(crate) key: String,
    pub(crate) payload: Vec<u8>,
}

/// The same digest algorithm [`EnlistedResource::mutation_digest`] uses,
/// exposed so that intent-log recovery can verify a replayed mutation list
/// against the digest recorded in a `PrepareComplete` record.
#[must_use]
pub(crate) fn digest_of(mutations: &[LoggedMutation]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for m in mutations {
        match m.kind {
            MutationKind::Save => {
                hasher.update([1u8]);
                hasher.update((m.key.len() as u32).to_le_bytes());
                hasher.update(m.key.as_bytes());
                hasher.update((m.payload.len() as u32).to_le_bytes());
                hasher.update(&m.payload);
            }
            MutationKind::Delete => {
                hasher.update([2u8]);
                hasher.update((m.key.len() as u32).to_le_bytes());
                hasher.update(m.key.as_bytes());
            }
        }
    }
    hasher.finalize().into()
}

#[derive(Debug, Clone)]
struct BufferedOp {
    mutation: Mutation,
    /// The value the key held immediately before this transaction touched
    /// it for the first time, or `None` if it was absent. Used to
    /// compensate a partially-applied commit on rollback.
    prior_image: Option<Vec<u8>>,
}

/// One provider enlisted in a transaction, with its own mutation buffer
/// and compensation images.
///
/// Returned by [`crate::Transaction::enlist`]; callers mutate the
/// transaction through this handle rather than through the provider
/// directly, so that nothing is applied until commit.
pub struct EnlistedResource {
    provider: Arc<dyn StorageProvider>,
    buffer: Mutex<Vec<BufferedOp>>,
    prior_images: Mutex<HashMap<String, Option<Vec<u8>>>>,
    /// Set once `commit` has started applying mutations to the provider.
    /// Rollback before this point is a pure in-memory discard; rollback
    /// after it (only reachable via the `Failed` recovery path) must
    /// compensate.
    applying: AtomicBool,
}

impl EnlistedResource {
    pub(crate) fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            provider,
            buffer: Mutex::new(Vec::new()),
            prior_images: Mutex::new(HashMap::new()),
            applying: AtomicBool::new(false),
        }
    }

    /// The enlisted provider's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    fn capture_prior_image(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        let mut images = self.prior_images.lock();
        if images.contains_key(key) {
            return Ok(());
        }
        let prior = match self.provider.get(key, ctx) {
            Ok(v) => Some(v),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        images.insert(key.to_string(), prior);
        Ok(())
    }

    /// Buffers a save, overlaying it on subsequent reads of `key` within
    /// this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading `key`'s prior value (for later
    /// compensation) fails for a reason other than absence.
    pub fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.capture_prior_image(key, ctx)?;
        let prior_image = self.prior_images.lock().get(key).cloned().flatten();
        self.buffer.lock().push(BufferedOp {
            mutation: Mutation::Save {
                key: key.to_string(),
                value: value.to_vec(),
            },
            prior_image,
        });
        Ok(())
    }

    /// Buffers a delete, overlaying it on subsequent reads of `key` within
    /// this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading `key`'s prior value fails for a
    /// reason other than absence.
    pub fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.capture_prior_image(key, ctx)?;
        let prior_image = self.prior_images.lock().get(key).cloned().flatten();
        self.buffer.lock().push(BufferedOp {
            mutation: Mutation::Delete {
                key: key.to_string(),
            },
            prior_image,
        });
        Ok(())
    }

    /// Reads `key`, overlaid by this transaction's own buffered mutations.
    ///
    /// # Errors
    ///
    /// Returns [`coffer_provider::ProviderError::NotFound`] if `key` is
    /// absent, whether because the provider never had it or because this
    /// transaction buffered a delete for it.
    pub fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        ctx.check()?;
        if let Some(op) = self.buffer.lock().iter().rev().find(|op| op.mutation.key() == key) {
            return match &op.mutation {
                Mutation::Save { value, .. } => Ok(value.clone()),
                Mutation::Delete { .. } => Err(coffer_provider::ProviderError::not_found(key)),
            };
        }
        self.provider.get(key, ctx)
    }

    /// Returns whether `key` exists, overlaid by this transaction's own
    /// buffered mutations.
    pub fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        ctx.check()?;
        if let Some(op) = self.buffer.lock().iter().rev().find(|op| op.mutation.key() == key) {
            return Ok(matches!(op.mutation, Mutation::Save { .. }));
        }
        self.provider.exists(key, ctx)
    }

    /// A deterministic digest of this resource's buffered mutation set, in
    /// recorded order, used by the coordinator's intent log to identify
    /// which mutation set a `PrepareComplete` record committed this
    /// resource to.
    #[must_use]
    pub(crate) fn mutation_digest(&self) -> [u8; 32] {
        digest_of(&self.buffered_mutations())
    }

    /// Snapshots the buffered mutation set, in recorded order, for the
    /// coordinator to write to the intent log before entering `Committing`.
    #[must_use]
    pub(crate) fn buffered_mutations(&self) -> Vec<LoggedMutation> {
        self.buffer
            .lock()
            .iter()
            .map(|op| match &op.mutation {
                Mutation::Save { key, value } => LoggedMutation {
                    kind: MutationKind::Save,
                    key: key.clone(),
                    payload: value.clone(),
                },
                Mutation::Delete { key } => LoggedMutation {
                    kind: MutationKind::Delete,
                    key: key.clone(),
                    payload: Vec::new(),
                },
            })
            .collect()
    }

    /// Prepare: the last chance to refuse. Verifies the provider is still
    /// reachable; any error here is treated by the coordinator as an
    /// Abort vote.
    ///
    /// # Errors
    ///
    /// Returns whatever error the provider raises on the liveness probe.
    pub(crate) fn prepare(&self, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.provider.count(None, ctx).map(|_| ())
    }

    /// Commit: applies buffered mutations through the provider in recorded
    /// order. If the provider advertises `BatchAtomic` and the buffer is
    /// all saves, forwards them as one batch; otherwise applies one at a
    /// time.
    ///
    /// Idempotent: calling this again after a successful commit re-applies
    /// the same mutations, which is a no-op in effect (every mutation
    /// overwrites or deletes the same key to the same end state). This is
    /// what makes presumed-abort recovery's re-drive safe.
    ///
    /// # Errors
    ///
    /// Returns the first provider error encountered; some mutations may
    /// already have been applied (`applying` is now set, so a subsequent
    /// rollback compensates rather than merely discarding the buffer).
    pub(crate) fn commit(&self, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        let buffer = self.buffer.lock();
        if buffer.is_empty() {
            return Ok(());
        }

        self.applying.store(true, Ordering::SeqCst);

        let all_saves = buffer
            .iter()
            .all(|op| matches!(op.mutation, Mutation::Save { .. }));

        if all_saves && self.provider.capabilities().has(Capability::BatchAtomic) {
            let records: Vec<Record> = buffer
                .iter()
                .map(|op| match &op.mutation {
                    Mutation::Save { key, value } => Record {
                        key: key.clone(),
                        value: value.clone(),
                    },
                    Mutation::Delete { .. } => unreachable!("all_saves checked above"),
                })
                .collect();
            self.provider.save_many(&records, ctx)?;
            return Ok(());
        }

        for op in buffer.iter() {
            ctx.check()?;
            match &op.mutation {
                Mutation::Save { key, value } => self.provider.save(key, value, ctx)?,
                Mutation::Delete { key } => self.provider.delete(key, ctx)?,
            }
        }
        Ok(())
    }

    /// Rollback. Before any commit application has begun, this is a pure
    /// in-memory discard of the buffer. If commit had already started
    /// applying mutations (only reachable via the coordinator's `Failed`
    /// recovery path), issues compensating operations for each buffered
    /// mutation in reverse order, restoring the stashed prior image (a
    /// missing prior image compensates as a delete).
    ///
    /// # Errors
    ///
    /// On the compensation path, returns the first provider error
    /// encountered; the coordinator visits every resource regardless and
    /// collects failures rather than stopping at the first one.
    pub(crate) fn rollback(&self, ctx: &OpContext) -> ProviderResult<()> {
        if !self.applying.load(Ordering::SeqCst) {
            self.buffer.lock().clear();
            return Ok(());
        }

        let buffer = self.buffer.lock();
        for op in buffer.iter().rev() {
            ctx.check()?;
            match &op.prior_image {
                Some(prior) => self.provider.save(op.mutation.key(), prior, ctx)?,
                None => self.provider.delete(op.mutation.key(), ctx)?,
            }
        }
        Ok(())
    }

    /// Presumed-abort recovery's re-drive of a resource whose transaction
    /// logged `PrepareComplete` but no terminal marker: simply re-runs
    /// commit, which [`Self::commit`] guarantees is idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first provider error encountered while re-applying.
    pub(crate) fn recover_commit(&self, ctx: &OpContext) -> ProviderResult<()> {
        self.commit(ctx)
    }
}
