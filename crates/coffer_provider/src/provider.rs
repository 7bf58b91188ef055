//! The storage provider contract every backend variant implements.

use crate::cancellation::OpContext;
use crate::capability::Capabilities;
use crate::error::ProviderResult;

/// A single stored record: an entity's string key paired with its opaque,
/// already-serialized byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The entity's stable string key.
    pub key: String,
    /// The entity's serialized byte payload, as produced by
    /// [`coffer_codec::encode_entity`].
    pub value: Vec<u8>,
}

/// An optional predicate over a decoded entity, passed to `GetAll`/`Count`.
///
/// `StorageProvider` never interprets the bytes it stores, so the predicate
/// runs against the [`Record`] it already has in hand; [`crate::TypedStore`]
/// layers a predicate over the decoded `T` on top of this by decoding each
/// candidate record before deciding whether it matches. `None` means "match
/// everything", matching the spec's "optional filter" contract.
pub type RecordFilter<'a> = Option<&'a dyn Fn(&Record) -> bool>;

/// The byte-level contract implemented by every storage backend variant
/// (embedded log-structured DB, in-memory, file-per-record, embedded SQL,
/// networked SQL, hierarchical key store).
///
/// `StorageProvider` never interprets the bytes it stores; entity
/// (de)serialization happens one layer up, in [`crate::TypedStore`]. Every
/// method takes an [`OpContext`] and must check it at suspension points
/// (before blocking I/O, before acquiring a lock, before an fsync) so that
/// cancellation and deadlines propagate even though there is no async
/// runtime driving them.
///
/// The trait is object-safe so a [`crate::TypedStore`] or the transaction
/// coordinator can hold a `Box<dyn StorageProvider>`/`Arc<dyn
/// StorageProvider>` without knowing the concrete variant.
pub trait StorageProvider: Send + Sync {
    /// A human-readable name for this provider instance, for diagnostics
    /// and for `InstanceBusy` error messages.
    fn name(&self) -> &str;

    /// The capabilities this provider advertises.
    fn capabilities(&self) -> Capabilities;

    /// Fetches the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProviderError::NotFound`] if `key` is absent.
    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>>;

    /// Fetches the values stored under each of `keys`, in order. Absent
    /// keys yield `None` at the corresponding position rather than failing
    /// the whole call.
    fn get_many(&self, keys: &[String], ctx: &OpContext) -> ProviderResult<Vec<Option<Vec<u8>>>> {
        keys.iter()
            .map(|k| match self.get(k, ctx) {
                Ok(v) => Ok(Some(v)),
                Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Returns every record currently stored that `filter` accepts (or
    /// every record, if `filter` is `None`). Intended for small backends
    /// and for full-scan recovery paths, not as a general query mechanism.
    fn get_all(&self, filter: RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>>;

    /// Returns every record whose key falls in `[start, end)`, if the
    /// provider advertises [`crate::Capability::RangeScan`].
    ///
    /// The default implementation falls back to a full scan with
    /// client-side filtering; providers that can do better should
    /// override it and advertise the capability.
    fn range(&self, start: &str, end: &str, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        Ok(self
            .get_all(None, ctx)?
            .into_iter()
            .filter(|r| r.key.as_str() >= start && r.key.as_str() < end)
            .collect())
    }

    /// Stores `value` under `key`, overwriting any existing value.
    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()>;

    /// Stores every record in `records`. Providers advertising
    /// [`crate::Capability::BatchAtomic`] apply the whole batch atomically;
    /// others apply records one at a time and may leave a partial write on
    /// failure.
    fn save_many(&self, records: &[Record], ctx: &OpContext) -> ProviderResult<()> {
        for r in records {
            self.save(&r.key, &r.value, ctx)?;
        }
        Ok(())
    }

    /// Removes the value stored under `key`, if present.
    ///
    /// Deleting an absent key is not an error; it's a no-op.
    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()>;

    /// Returns whether `key` currently has a stored value.
    fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        match self.get(key, ctx) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns the number of records currently stored that `filter` accepts
    /// (or every record, if `filter` is `None`).
    fn count(&self, filter: RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<usize> {
        Ok(self.get_all(filter, ctx)?.len())
    }

    /// Removes every stored record.
    fn clear(&self, ctx: &OpContext) -> ProviderResult<()>;
}
