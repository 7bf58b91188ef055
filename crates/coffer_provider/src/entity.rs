//! A typed convenience facade over a byte-level [`StorageProvider`].

use std::marker::PhantomData;
use std::sync::Arc;

use coffer_codec::{decode_entity, encode_entity};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cancellation::OpContext;
use crate::error::ProviderResult;
use crate::provider::StorageProvider;

/// Wraps an `Arc<dyn StorageProvider>` with entity (de)serialization, so
/// callers work in terms of `T` instead of raw byte buffers.
///
/// `TypedStore` is cheap to clone (it only clones the inner `Arc`) and can
/// be freely shared across threads, matching the underlying provider's
/// `Send + Sync` bound.
pub struct TypedStore<T> {
    provider: Arc<dyn StorageProvider>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            _marker: PhantomData,
        }
    }
}

impl<T> TypedStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Wraps `provider` as a typed store of `T`.
    #[must_use]
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            provider,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying byte-level provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    /// Fetches and deserializes the entity stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProviderError::NotFound`] if absent, or a `Corrupt`
    /// error if the stored bytes no longer match `T`'s shape.
    pub fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<T> {
        let bytes = self.provider.get(key, ctx)?;
        Ok(decode_entity(&bytes)?)
    }

    /// Serializes `value` and stores it under `key`.
    pub fn save(&self, key: &str, value: &T, ctx: &OpContext) -> ProviderResult<()> {
        let bytes = encode_entity(value)?;
        self.provider.save(key, &bytes, ctx)
    }

    /// Removes the entity stored under `key`, if present.
    pub fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        self.provider.delete(key, ctx)
    }

    /// Returns whether `key` currently has a stored entity.
    pub fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        self.provider.exists(key, ctx)
    }

    /// Fetches and deserializes every stored entity that `filter` accepts
    /// (or every entity, if `filter` is `None`).
    ///
    /// The predicate runs against the *decoded* entity, per the spec's
    /// "filter predicate over the decoded entity" contract — unlike
    /// [`StorageProvider::get_all`]'s byte-level [`crate::RecordFilter`],
    /// which has no entity type to decode into.
    ///
    /// A record whose bytes no longer deserialize as `T` fails the whole
    /// call; callers that need partial results should go through
    /// [`TypedStore::provider`] directly.
    pub fn get_all(&self, filter: Option<&dyn Fn(&T) -> bool>, ctx: &OpContext) -> ProviderResult<Vec<T>> {
        self.provider
            .get_all(None, ctx)?
            .into_iter()
            .map(|r| Ok(decode_entity(&r.value)?))
            .collect::<ProviderResult<Vec<T>>>()
            .map(|entities| match filter {
                Some(f) => entities.into_iter().filter(|e| f(e)).collect(),
                None => entities,
            })
    }

    /// Returns the number of stored entities that `filter` accepts (or
    /// every entity, if `filter` is `None`).
    pub fn count(&self, filter: Option<&dyn Fn(&T) -> bool>, ctx: &OpContext) -> ProviderResult<usize> {
        Ok(self.get_all(filter, ctx)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Record;
    use crate::{Capabilities, ProviderError};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        label: String,
    }

    #[derive(Default)]
    struct MapProvider {
        data: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl StorageProvider for MapProvider {
        fn name(&self) -> &str {
            "map"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::none()
        }

        fn get(&self, key: &str, _ctx: &OpContext) -> ProviderResult<Vec<u8>> {
            self.data
                .lock()
                .get(key)
                .cloned()
                .ok_or_else(|| ProviderError::not_found(key))
        }

        fn get_all(&self, filter: crate::RecordFilter<'_>, _ctx: &OpContext) -> ProviderResult<Vec<Record>> {
            Ok(self
                .data
                .lock()
                .iter()
                .map(|(k, v)| Record {
                    key: k.clone(),
                    value: v.clone(),
                })
                .filter(|r| filter.map_or(true, |f| f(r)))
                .collect())
        }

        fn save(&self, key: &str, value: &[u8], _ctx: &OpContext) -> ProviderResult<()> {
            self.data.lock().insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn delete(&self, key: &str, _ctx: &OpContext) -> ProviderResult<()> {
            self.data.lock().remove(key);
            Ok(())
        }

        fn clear(&self, _ctx: &OpContext) -> ProviderResult<()> {
            self.data.lock().clear();
            Ok(())
        }
    }

    #[test]
    fn save_then_get_roundtrips() {
        let store: TypedStore<Widget> = TypedStore::new(Arc::new(MapProvider::default()));
        let ctx = OpContext::none();
        let w = Widget {
            label: "bolt".to_string(),
        };
        store.save("w1", &w, &ctx).unwrap();
        assert_eq!(store.get("w1", &ctx).unwrap(), w);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store: TypedStore<Widget> = TypedStore::new(Arc::new(MapProvider::default()));
        let ctx = OpContext::none();
        let err = store.get("missing", &ctx).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn delete_then_exists_false() {
        let store: TypedStore<Widget> = TypedStore::new(Arc::new(MapProvider::default()));
        let ctx = OpContext::none();
        let w = Widget {
            label: "nut".to_string(),
        };
        store.save("w2", &w, &ctx).unwrap();
        store.delete("w2", &ctx).unwrap();
        assert!(!store.exists("w2", &ctx).unwrap());
    }

    #[test]
    fn get_all_filter_runs_over_decoded_entities() {
        let store: TypedStore<Widget> = TypedStore::new(Arc::new(MapProvider::default()));
        let ctx = OpContext::none();
        store
            .save("w1", &Widget { label: "bolt".to_string() }, &ctx)
            .unwrap();
        store
            .save("w2", &Widget { label: "nut".to_string() }, &ctx)
            .unwrap();
        store
            .save("w3", &Widget { label: "bolt".to_string() }, &ctx)
            .unwrap();

        let bolts = store
            .get_all(Some(&|w: &Widget| w.label == "bolt"), &ctx)
            .unwrap();
        assert_eq!(bolts.len(), 2);
        assert!(bolts.iter().all(|w| w.label == "bolt"));

        assert_eq!(store.count(Some(&|w: &Widget| w.label == "bolt"), &ctx).unwrap(), 2);
        assert_eq!(store.count(None, &ctx).unwrap(), 3);
    }
}
