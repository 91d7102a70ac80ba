//! Registry of namespace cache sets for one cluster side.
//!
//! The registry owns every [`NamespaceCaches`] for its side and the
//! client their watch pumps run against. Adding a namespace that is
//! already cached returns the existing set unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::namespace::NamespaceCaches;
use crate::client::ClusterClient;
use crate::error::{Error, Result};
use crate::resource::{ResourceKind, Side};

/// All namespace cache sets for one side of the reflection
pub struct CacheRegistry {
    side: Side,
    kinds: Vec<ResourceKind>,
    client: Arc<dyn ClusterClient>,
    sets: RwLock<HashMap<String, Arc<NamespaceCaches>>>,
}

impl CacheRegistry {
    pub fn new(side: Side, kinds: Vec<ResourceKind>, client: Arc<dyn ClusterClient>) -> Self {
        Self {
            side,
            kinds,
            client,
            sets: RwLock::new(HashMap::new()),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Kinds mirrored for every namespace on this side
    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    /// Add a namespace's cache set, or return the existing set if it is
    /// already cached. No watches run until
    /// [`CacheRegistry::start_namespace`].
    pub async fn add_namespace(&self, namespace: &str) -> Result<Arc<NamespaceCaches>> {
        if namespace.is_empty() {
            return Err(Error::config("namespace name cannot be empty"));
        }
        let mut sets = self.sets.write().await;
        if let Some(existing) = sets.get(namespace) {
            return Ok(Arc::clone(existing));
        }
        info!(side = %self.side, namespace = %namespace, "Adding namespace caches");
        let set = Arc::new(NamespaceCaches::new(namespace, self.side, &self.kinds));
        sets.insert(namespace.to_string(), Arc::clone(&set));
        Ok(set)
    }

    /// Spawn the watch pumps for a previously added namespace, running
    /// until `stop` fires.
    ///
    /// Fails if the namespace was never added. Starting a started
    /// namespace is a no-op.
    pub async fn start_namespace(&self, namespace: &str, stop: CancellationToken) -> Result<()> {
        let set = self.namespace(namespace).await?;
        if !set.is_started() {
            info!(side = %self.side, namespace = %namespace, "Starting namespace caching");
        }
        set.start(Arc::clone(&self.client), stop);
        Ok(())
    }

    /// Stop caching a namespace and drop its set. Unknown namespaces are
    /// a no-op.
    pub async fn remove_namespace(&self, namespace: &str) {
        let removed = self.sets.write().await.remove(namespace);
        if let Some(set) = removed {
            info!(side = %self.side, namespace = %namespace, "Stopping namespace caching");
            set.stop();
        }
    }

    /// Cache set for a namespace
    pub async fn namespace(&self, namespace: &str) -> Result<Arc<NamespaceCaches>> {
        self.sets
            .read()
            .await
            .get(namespace)
            .cloned()
            .ok_or_else(|| Error::not_found("namespace caches", namespace))
    }

    /// Whether a namespace is currently cached
    pub async fn contains(&self, namespace: &str) -> bool {
        self.sets.read().await.contains_key(namespace)
    }

    /// Names of all cached namespaces
    pub async fn namespaces(&self) -> Vec<String> {
        self.sets.read().await.keys().cloned().collect()
    }

    /// Stop every namespace cache set
    pub async fn stop_all(&self) {
        let mut sets = self.sets.write().await;
        for (namespace, set) in sets.drain() {
            info!(side = %self.side, namespace = %namespace, "Stopping namespace caching");
            set.stop();
        }
    }
}
