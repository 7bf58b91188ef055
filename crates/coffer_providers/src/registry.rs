//! Provider registry and factory: resolves a `(backend name, entity type)`
//! pair to a live, shared storage provider instance.

use coffer_provider::{ProviderError, ProviderResult, StorageProvider};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds a provider instance for one entity type (collection) within a
/// backend. Implementations typically close over the backend's settings.
///
/// A blanket impl covers plain closures, so registering a factory is
/// usually `registry.register("in_memory", move |collection| { .. })`.
pub trait ProviderFactory: Send + Sync {
    /// Creates (or otherwise produces) the provider for `entity_type`.
    fn open(&self, entity_type: &str) -> ProviderResult<Arc<dyn StorageProvider>>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&str) -> ProviderResult<Arc<dyn StorageProvider>> + Send + Sync,
{
    fn open(&self, entity_type: &str) -> ProviderResult<Arc<dyn StorageProvider>> {
        self(entity_type)
    }
}

/// Resolves `(backend name, entity type)` pairs to provider instances.
///
/// A provider is created on first resolution for a given pair and then
/// lives for the registry's lifetime (process lifetime, in the common
/// case of one registry per application). Resolving the same pair again
/// returns the same `Arc`.
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ProviderFactory>>>,
    #[allow(clippy::type_complexity)]
    instances: RwLock<HashMap<(String, String), Arc<dyn StorageProvider>>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a factory under `backend_name`. Replaces any factory
    /// previously registered under the same name; existing instances
    /// already resolved through the old factory are not invalidated.
    pub fn register(&self, backend_name: impl Into<String>, factory: impl ProviderFactory + 'static) {
        let backend_name = backend_name.into();
        debug!(backend = %backend_name, "registering provider factory");
        self.factories
            .write()
            .insert(backend_name, Arc::new(factory));
    }

    /// Returns whether a factory is registered under `backend_name`.
    #[must_use]
    pub fn is_registered(&self, backend_name: &str) -> bool {
        self.factories.read().contains_key(backend_name)
    }

    /// Resolves `(backend_name, entity_type)` to a provider instance,
    /// creating it via the registered factory on first resolution.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Fatal` if no factory is registered under
    /// `backend_name`, or whatever error the factory itself returns.
    pub fn resolve(
        &self,
        backend_name: &str,
        entity_type: &str,
    ) -> ProviderResult<Arc<dyn StorageProvider>> {
        let cache_key = (backend_name.to_string(), entity_type.to_string());

        if let Some(provider) = self.instances.read().get(&cache_key) {
            return Ok(Arc::clone(provider));
        }

        let factory = self
            .factories
            .read()
            .get(backend_name)
            .cloned()
            .ok_or_else(|| {
                ProviderError::fatal(format!("no provider factory registered for backend '{backend_name}'"))
            })?;

        let mut instances = self.instances.write();
        // Re-check under the write lock: another caller may have raced us.
        if let Some(provider) = instances.get(&cache_key) {
            return Ok(Arc::clone(provider));
        }

        let provider = factory.open(entity_type)?;
        info!(backend = %backend_name, entity_type, name = provider.name(), "provider resolved");
        instances.insert(cache_key, Arc::clone(&provider));
        Ok(provider)
    }

    /// Drops all cached provider instances without unregistering
    /// factories. Subsequent `resolve` calls recreate providers.
    pub fn clear_instances(&self) {
        self.instances.write().clear();
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("registered_backends", &self.factories.read().len())
            .field("cached_instances", &self.instances.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolve_creates_once_per_pair() {
        let registry = ProviderRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        registry.register("in_memory", move |_entity_type: &str| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(InMemoryProvider::new("in_memory")) as Arc<dyn StorageProvider>)
        });

        let a = registry.resolve("in_memory", "widgets").unwrap();
        let b = registry.resolve("in_memory", "widgets").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c = registry.resolve("in_memory", "gadgets").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn resolve_unknown_backend_is_fatal() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("nope", "widgets").unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::Fatal);
    }

    #[test]
    fn is_registered_reflects_registrations() {
        let registry = ProviderRegistry::new();
        assert!(!registry.is_registered("in_memory"));
        registry.register("in_memory", |_: &str| {
            Ok(Arc::new(InMemoryProvider::new("in_memory")) as Arc<dyn StorageProvider>)
        });
        assert!(registry.is_registered("in_memory"));
    }
}
