//! The in-memory storage provider: a sharded, lock-guarded map with no
//! backing I/O. Used for tests, caches, and ephemeral collections.

use coffer_provider::{
    Capabilities, Capability, OpContext, ProviderResult, ProviderSettings, Record, StorageProvider,
};
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

const DEFAULT_SHARD_COUNT: usize = 16;

/// Settings for [`InMemoryProvider`].
#[derive(Debug, Clone)]
pub struct InMemorySettings {
    /// Fields shared by every provider variant.
    pub common: ProviderSettings,
    /// Number of independently-locked shards the key space is split
    /// across. More shards reduce contention under concurrent writers to
    /// disjoint keys, at the cost of `get_all`/`count`/`clear` needing to
    /// visit every shard.
    pub shard_count: usize,
}

impl InMemorySettings {
    /// Settings for a provider named `name`, with the default shard count.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            common: ProviderSettings::new(name),
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }

    /// Overrides the shard count. Clamped to at least 1.
    #[must_use]
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count.max(1);
        self
    }
}

struct Shard {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

/// A sharded in-memory [`StorageProvider`]. Advertises
/// [`Capability::BatchAtomic`] is not set (each `save` in a batch takes its
/// own shard lock independently) but reads always observe the writer's own
/// prior writes, matching every other provider's read-your-writes guarantee.
pub struct InMemoryProvider {
    settings: InMemorySettings,
    shards: Vec<Shard>,
}

impl InMemoryProvider {
    /// Creates a provider named `name` with the default shard count.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(InMemorySettings::new(name))
    }

    /// Creates a provider from explicit settings.
    #[must_use]
    pub fn with_settings(settings: InMemorySettings) -> Self {
        let shards = (0..settings.shard_count)
            .map(|_| Shard {
                data: RwLock::new(HashMap::new()),
            })
            .collect();
        Self { settings, shards }
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }
}

impl StorageProvider for InMemoryProvider {
    fn name(&self) -> &str {
        &self.settings.common.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with(Capability::RangeScan)
    }

    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        ctx.check()?;
        self.shard_for(key)
            .data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| coffer_provider::ProviderError::not_found(key))
    }

    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        let mut out = Vec::new();
        for shard in &self.shards {
            ctx.check()?;
            out.extend(
                shard
                    .data
                    .read()
                    .iter()
                    .map(|(k, v)| Record {
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .filter(|r| filter.map_or(true, |f| f(r))),
            );
        }
        Ok(out)
    }

    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.shard_for(key)
            .data
            .write()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.shard_for(key).data.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        ctx.check()?;
        Ok(self.shard_for(key).data.read().contains_key(key))
    }

    fn count(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<usize> {
        if filter.is_none() {
            let mut total = 0;
            for shard in &self.shards {
                ctx.check()?;
                total += shard.data.read().len();
            }
            return Ok(total);
        }
        Ok(self.get_all(filter, ctx)?.len())
    }

    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        for shard in &self.shards {
            ctx.check()?;
            shard.data.write().clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OpContext {
        OpContext::none()
    }

    #[test]
    fn save_then_get_roundtrips() {
        let p = InMemoryProvider::new("mem");
        p.save("k1", b"hello", &ctx()).unwrap();
        assert_eq!(p.get("k1", &ctx()).unwrap(), b"hello");
    }

    #[test]
    fn get_missing_is_not_found() {
        let p = InMemoryProvider::new("mem");
        let err = p.get("missing", &ctx()).unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::NotFound);
    }

    #[test]
    fn delete_is_noop_on_absent_key() {
        let p = InMemoryProvider::new("mem");
        assert!(p.delete("missing", &ctx()).is_ok());
    }

    #[test]
    fn overwrite_replaces_value() {
        let p = InMemoryProvider::new("mem");
        p.save("k1", b"first", &ctx()).unwrap();
        p.save("k1", b"second", &ctx()).unwrap();
        assert_eq!(p.get("k1", &ctx()).unwrap(), b"second");
        assert_eq!(p.count(None, &ctx()).unwrap(), 1);
    }

    #[test]
    fn clear_empties_every_shard() {
        let p = InMemoryProvider::with_settings(InMemorySettings::new("mem").with_shard_count(4));
        for i in 0..50 {
            p.save(&format!("k{i}"), b"v", &ctx()).unwrap();
        }
        assert_eq!(p.count(None, &ctx()).unwrap(), 50);
        p.clear(&ctx()).unwrap();
        assert_eq!(p.count(None, &ctx()).unwrap(), 0);
        assert!(p.get_all(None, &ctx()).unwrap().is_empty());
    }

    #[test]
    fn exists_reflects_save_and_delete() {
        let p = InMemoryProvider::new("mem");
        assert!(!p.exists("k1", &ctx()).unwrap());
        p.save("k1", b"v", &ctx()).unwrap();
        assert!(p.exists("k1", &ctx()).unwrap());
        p.delete("k1", &ctx()).unwrap();
        assert!(!p.exists("k1", &ctx()).unwrap());
    }

    #[test]
    fn range_filters_by_key_bounds() {
        let p = InMemoryProvider::new("mem");
        for k in ["a", "b", "c", "d"] {
            p.save(k, b"v", &ctx()).unwrap();
        }
        let mut keys: Vec<_> = p
            .range("b", "d", &ctx())
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn disjoint_key_writes_from_many_threads_all_land() {
        use std::sync::Arc;
        let p = Arc::new(InMemoryProvider::new("mem"));
        let handles: Vec<_> = (0..10)
            .map(|t| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        p.save(&format!("t{t}-{i}"), b"v", &OpContext::none()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.count(None, &ctx()).unwrap(), 1000);
    }
}
