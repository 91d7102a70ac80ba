//! Two-sided cache manager.
//!
//! The [`CacheManager`] pairs the home and foreign [`CacheRegistry`]
//! instances and exposes a side-addressed lookup API to the reflectors.
//! A manager built without one of its sides reports an error on every
//! operation against that side instead of panicking; the watch pumps and
//! the other side keep working.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::namespace::NamespaceCaches;
use crate::cache::registry::CacheRegistry;
use crate::cache::resource::EventHandlers;
use crate::error::{Error, Result};
use crate::resource::{MirroredObject, ResourceKind, Side};

/// Home and foreign cache registries behind one API
#[derive(Default)]
pub struct CacheManager {
    home: Option<Arc<CacheRegistry>>,
    foreign: Option<Arc<CacheRegistry>>,
}

impl CacheManager {
    pub fn new(home: Arc<CacheRegistry>, foreign: Arc<CacheRegistry>) -> Self {
        Self {
            home: Some(home),
            foreign: Some(foreign),
        }
    }

    /// Registry for one side; fails when that side was never wired up
    pub fn registry(&self, side: Side) -> Result<&Arc<CacheRegistry>> {
        let registry = match side {
            Side::Home => self.home.as_ref(),
            Side::Foreign => self.foreign.as_ref(),
        };
        registry.ok_or_else(|| Error::config(format!("{side} cache registry is not configured")))
    }

    /// Add a namespace's cache set on one side (idempotent). Watches do
    /// not run until [`CacheManager::start_namespace`].
    pub async fn add_namespace(&self, side: Side, namespace: &str) -> Result<Arc<NamespaceCaches>> {
        self.registry(side)?.add_namespace(namespace).await
    }

    /// Add a home/foreign namespace pair (idempotent on both sides)
    pub async fn add_namespace_pair(&self, home_ns: &str, foreign_ns: &str) -> Result<()> {
        self.add_namespace(Side::Home, home_ns).await?;
        self.add_namespace(Side::Foreign, foreign_ns).await?;
        Ok(())
    }

    /// Start the watch pumps for a previously added namespace on one
    /// side, running until `stop` fires.
    ///
    /// Fails if the namespace was never added on that side.
    pub async fn start_namespace(
        &self,
        side: Side,
        namespace: &str,
        stop: CancellationToken,
    ) -> Result<()> {
        self.registry(side)?.start_namespace(namespace, stop).await
    }

    /// Stop caching a namespace on one side
    pub async fn remove_namespace(&self, side: Side, namespace: &str) -> Result<()> {
        self.registry(side)?.remove_namespace(namespace).await;
        Ok(())
    }

    /// Stop caching a home/foreign namespace pair. Best-effort: a
    /// missing side is logged, not propagated, so teardown always runs
    /// on the other side.
    pub async fn remove_namespace_pair(&self, home_ns: &str, foreign_ns: &str) {
        for (side, namespace) in [(Side::Home, home_ns), (Side::Foreign, foreign_ns)] {
            if let Err(err) = self.remove_namespace(side, namespace).await {
                warn!(side = %side, namespace = %namespace, error = %err, "Skipping namespace removal");
            }
        }
    }

    /// Register cache event handlers for one (side, kind, namespace).
    ///
    /// Fails if the namespace is not cached or the kind is not
    /// mirrored.
    pub async fn add_event_handlers(
        &self,
        side: Side,
        kind: ResourceKind,
        namespace: &str,
        handlers: EventHandlers,
    ) -> Result<()> {
        self.registry(side)?
            .namespace(namespace)
            .await?
            .cache(kind)?
            .add_handlers(handlers);
        Ok(())
    }

    /// Whether every kind's watch is established for a cached namespace
    pub async fn namespace_ready(&self, side: Side, namespace: &str) -> Result<bool> {
        let registry = self.registry(side)?;
        let set = registry.namespace(namespace).await?;
        for &kind in registry.kinds() {
            if !set.cache(kind)?.is_started() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Latest cached copy of an object on one side
    pub async fn get_object(
        &self,
        side: Side,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<MirroredObject> {
        self.registry(side)?
            .namespace(namespace)
            .await?
            .get_object(kind, name)
    }

    /// All cached objects of a kind in a namespace on one side
    pub async fn list_objects(
        &self,
        side: Side,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<MirroredObject>> {
        self.registry(side)?
            .namespace(namespace)
            .await?
            .list_objects(kind)
    }

    /// Replay a kind's cached objects through its update handlers
    pub async fn resync(&self, side: Side, kind: ResourceKind, namespace: &str) -> Result<()> {
        self.registry(side)?.namespace(namespace).await?.resync(kind)
    }

    /// Stop all caching on both sides
    pub async fn stop_all(&self) {
        if let Some(home) = &self.home {
            home.stop_all().await;
        }
        if let Some(foreign) = &self.foreign {
            foreign.stop_all().await;
        }
    }
}
