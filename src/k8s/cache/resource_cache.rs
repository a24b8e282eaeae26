use super::cached_data::CachedResource;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Composite cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of `service`, `None` when it has no name
    #[must_use]
    pub fn of(service: &Service) -> Option<Self> {
        let name = service.metadata.name.clone()?;
        Some(Self::new(service.namespace().unwrap_or_default(), name))
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
}

/// Last-known Service bodies keyed by namespace and name.
///
/// Any number of readers may run at once; a writer excludes everyone else.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: RwLock<HashMap<ResourceKey, CachedResource>>,
}

impl ResourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<CachedResource> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Store `service` and the node set it was seen with; returns the entry it replaced
    pub fn put(
        &self,
        key: ResourceKey,
        service: Service,
        node_addresses: Vec<String>,
    ) -> Option<CachedResource> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get_mut(&key) {
            let previous = existing.clone();
            existing.update(service, node_addresses);
            debug!("💾 Cache UPDATE: {} (v{})", key, existing.version);
            return Some(previous);
        }

        debug!("💾 Cache STORE: {}", key);
        entries.insert(key, CachedResource::new(service, node_addresses));
        None
    }

    /// Read and remove the entry for `key` in one step
    pub fn take(&self, key: &ResourceKey) -> Option<CachedResource> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            debug!("🗑️  Cache REMOVE: {}", key);
        }
        removed
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}
