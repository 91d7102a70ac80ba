//! Per-namespace cache set.
//!
//! A [`NamespaceCaches`] owns one [`ResourceCache`] per mirrored kind in
//! a single namespace, plus the watch pump task that feeds each of them.
//! Pumps reconnect with a fixed backoff when a watch stream ends or
//! errors, and stop when the set's cancellation token fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::resource::ResourceCache;
use crate::client::ClusterClient;
use crate::error::{Error, Result};
use crate::resource::{keyer, MirroredObject, ResourceKind, Side};

/// Delay before reconnecting a failed or completed watch
const WATCH_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// All per-kind caches for one namespace on one side
pub struct NamespaceCaches {
    namespace: String,
    side: Side,
    caches: HashMap<ResourceKind, Arc<ResourceCache>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl NamespaceCaches {
    /// Build caches for `kinds` in `namespace`. No watches run until
    /// [`NamespaceCaches::start`].
    pub fn new(namespace: impl Into<String>, side: Side, kinds: &[ResourceKind]) -> Self {
        let namespace = namespace.into();
        let caches = kinds
            .iter()
            .map(|&kind| (kind, Arc::new(ResourceCache::new(kind, namespace.clone()))))
            .collect();
        Self {
            namespace,
            side,
            caches,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Cache for one kind, if this set mirrors it
    pub fn cache(&self, kind: ResourceKind) -> Result<&Arc<ResourceCache>> {
        self.caches.get(&kind).ok_or_else(|| {
            Error::not_found(kind.to_string(), keyer(&self.namespace, "*"))
        })
    }

    /// Latest cached copy of `name` for `kind`
    pub fn get_object(&self, kind: ResourceKind, name: &str) -> Result<MirroredObject> {
        let key = keyer(&self.namespace, name);
        self.cache(kind)?
            .get(&key)
            .ok_or_else(|| Error::not_found(kind.to_string(), key))
    }

    /// All cached objects for `kind`
    pub fn list_objects(&self, kind: ResourceKind) -> Result<Vec<MirroredObject>> {
        Ok(self.cache(kind)?.list())
    }

    /// Replay the cached objects of `kind` through its update handlers
    pub fn resync(&self, kind: ResourceKind) -> Result<()> {
        self.cache(kind)?.resync()
    }

    /// Whether the watch pumps have been spawned
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn one watch pump per kind against `client`, running until
    /// `stop` fires or the set is stopped. Starting a started set is a
    /// no-op.
    pub fn start(&self, client: Arc<dyn ClusterClient>, stop: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        });
        for (&kind, cache) in &self.caches {
            let cache = Arc::clone(cache);
            let client = Arc::clone(&client);
            let cancel = self.cancel.clone();
            let namespace = self.namespace.clone();
            let side = self.side;
            tokio::spawn(async move {
                run_watch_pump(kind, side, namespace, client, cache, cancel).await;
            });
        }
    }

    /// Stop all pumps for this namespace
    pub fn stop(&self) {
        debug!(namespace = %self.namespace, side = %self.side, "Stopping namespace caches");
        self.cancel.cancel();
    }
}

impl Drop for NamespaceCaches {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Feed one cache from the cluster watch, reconnecting until cancelled
async fn run_watch_pump(
    kind: ResourceKind,
    side: Side,
    namespace: String,
    client: Arc<dyn ClusterClient>,
    cache: Arc<ResourceCache>,
    cancel: CancellationToken,
) {
    debug!(kind = %kind, side = %side, namespace = %namespace, "Starting watch pump");
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.watch(kind, &namespace) => result,
        };

        match stream {
            Ok(mut stream) => {
                cache.mark_started();
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => return,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(event)) => {
                            if let Err(err) = cache.apply_event(event) {
                                warn!(kind = %kind, namespace = %namespace, error = %err, "Dropping malformed watch event");
                            }
                        }
                        Some(Err(err)) => {
                            warn!(kind = %kind, namespace = %namespace, error = %err, "Watch stream error, reconnecting");
                            break;
                        }
                        None => {
                            debug!(kind = %kind, namespace = %namespace, "Watch stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(kind = %kind, namespace = %namespace, error = %err, "Failed to establish watch, retrying");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(WATCH_RECONNECT_DELAY) => {}
        }
    }
    debug!(kind = %kind, namespace = %namespace, "Watch pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::EventType;
    use crate::resource::ObjectEvent;
    use k8s_openapi::api::core::v1::Pod;

    fn pod(namespace: &str, name: &str) -> MirroredObject {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        MirroredObject::from(pod)
    }

    #[test]
    fn test_cache_lookup_per_kind() {
        let caches = NamespaceCaches::new("ns", Side::Home, &[ResourceKind::Pods]);
        assert!(caches.cache(ResourceKind::Pods).is_ok());
        let err = caches
            .cache(ResourceKind::Services)
            .err()
            .expect("unmirrored kind has no cache");
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_get_and_list_objects() {
        let caches = NamespaceCaches::new(
            "ns",
            Side::Home,
            &[ResourceKind::Pods, ResourceKind::Services],
        );
        caches
            .cache(ResourceKind::Pods)
            .expect("pods cache exists")
            .apply_event(ObjectEvent {
                event_type: EventType::Added,
                object: pod("ns", "a"),
            })
            .expect("event applies");

        let found = caches
            .get_object(ResourceKind::Pods, "a")
            .expect("cached object is found");
        assert_eq!(found.name(), Some("a"));

        assert!(caches.get_object(ResourceKind::Pods, "missing").is_err());
        assert_eq!(
            caches
                .list_objects(ResourceKind::Services)
                .expect("kind exists")
                .len(),
            0
        );
    }

    #[test]
    fn test_resync_unstarted_kind_fails() {
        let caches = NamespaceCaches::new("ns", Side::Foreign, &[ResourceKind::Pods]);
        let err = caches
            .resync(ResourceKind::Pods)
            .expect_err("resync before watch start must fail");
        assert!(matches!(err, Error::WatchNotEstablished { .. }));
    }
}
