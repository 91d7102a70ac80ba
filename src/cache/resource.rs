//! Per-kind object cache.
//!
//! A [`ResourceCache`] holds the most recently observed copy of every
//! object of one kind in one namespace, keyed by `namespace/name`. Watch
//! pumps feed it events; reflectors read from it and subscribe to its
//! event handlers. Handlers run synchronously outside the store lock and
//! must stay cheap (the reflector handlers just enqueue keys).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::resource::{EventType, MirroredObject, ObjectEvent, ResourceKind};

/// Callbacks fired as the cache applies events.
///
/// Every field is optional; an unset handler is skipped. `on_update`
/// receives the previous cached copy when one exists.
#[derive(Default)]
pub struct EventHandlers {
    pub on_add: Option<Box<dyn Fn(&MirroredObject) + Send + Sync>>,
    pub on_update: Option<Box<dyn Fn(Option<&MirroredObject>, &MirroredObject) + Send + Sync>>,
    pub on_delete: Option<Box<dyn Fn(&MirroredObject) + Send + Sync>>,
}

/// Cache of one resource kind within one namespace
pub struct ResourceCache {
    kind: ResourceKind,
    namespace: String,
    store: RwLock<HashMap<String, MirroredObject>>,
    handlers: RwLock<Vec<EventHandlers>>,
    started: AtomicBool,
    // Bumped on every applied event; lets tests and resync callers
    // observe progress without polling the store.
    generation: AtomicU64,
}

impl ResourceCache {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            store: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register event handlers. Handlers added after events have flowed
    /// only see subsequent events; pair registration with a
    /// [`ResourceCache::resync`] to catch up on existing objects.
    pub fn add_handlers(&self, handlers: EventHandlers) {
        self.handlers
            .write()
            .expect("cache handler lock poisoned")
            .push(handlers);
    }

    /// Mark the backing watch as established
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Whether the backing watch has been established
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Monotonic count of applied events
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Latest cached copy of an object, by `namespace/name` key
    pub fn get(&self, key: &str) -> Option<MirroredObject> {
        self.store
            .read()
            .expect("cache store lock poisoned")
            .get(key)
            .cloned()
    }

    /// All cached objects, in no particular order
    pub fn list(&self) -> Vec<MirroredObject> {
        self.store
            .read()
            .expect("cache store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Keys of all cached objects
    pub fn keys(&self) -> Vec<String> {
        self.store
            .read()
            .expect("cache store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Apply one watch event to the store and fire handlers.
    ///
    /// Objects missing a name or namespace cannot be keyed and are
    /// rejected as malformed rather than silently cached under a bogus
    /// key.
    pub fn apply_event(&self, event: ObjectEvent) -> Result<()> {
        let Some(key) = event.object.key() else {
            return Err(Error::malformed(format!(
                "unkeyable {} object in {} watch event",
                self.kind, self.namespace
            )));
        };
        trace!(kind = %self.kind, key = %key, event = ?event.event_type, "Applying cache event");

        match event.event_type {
            EventType::Added => {
                let previous = {
                    let mut store = self.store.write().expect("cache store lock poisoned");
                    store.insert(key, event.object.clone())
                };
                self.generation.fetch_add(1, Ordering::SeqCst);
                // A re-listed object we already hold is an update, not
                // a second add.
                let handlers = self.handlers.read().expect("cache handler lock poisoned");
                match previous {
                    None => {
                        for h in handlers.iter() {
                            if let Some(on_add) = &h.on_add {
                                on_add(&event.object);
                            }
                        }
                    }
                    Some(old) => {
                        for h in handlers.iter() {
                            if let Some(on_update) = &h.on_update {
                                on_update(Some(&old), &event.object);
                            }
                        }
                    }
                }
            }
            EventType::Modified => {
                let previous = {
                    let mut store = self.store.write().expect("cache store lock poisoned");
                    store.insert(key, event.object.clone())
                };
                self.generation.fetch_add(1, Ordering::SeqCst);
                let handlers = self.handlers.read().expect("cache handler lock poisoned");
                for h in handlers.iter() {
                    if let Some(on_update) = &h.on_update {
                        on_update(previous.as_ref(), &event.object);
                    }
                }
            }
            EventType::Deleted => {
                let removed = {
                    let mut store = self.store.write().expect("cache store lock poisoned");
                    store.remove(&key)
                };
                self.generation.fetch_add(1, Ordering::SeqCst);
                // Prefer the last cached copy so handlers see the state
                // we actually mirrored.
                let object = removed.unwrap_or(event.object);
                let handlers = self.handlers.read().expect("cache handler lock poisoned");
                for h in handlers.iter() {
                    if let Some(on_delete) = &h.on_delete {
                        on_delete(&object);
                    }
                }
            }
        }
        Ok(())
    }

    /// Replay every cached object through the update handlers.
    ///
    /// Fails if the backing watch has never been established, since the
    /// store contents would be meaningless.
    pub fn resync(&self) -> Result<()> {
        if !self.is_started() {
            return Err(Error::WatchNotEstablished {
                namespace: self.namespace.clone(),
                kind: self.kind.to_string(),
            });
        }
        let objects = self.list();
        debug!(kind = %self.kind, namespace = %self.namespace, objects = objects.len(), "Resyncing cache");
        let handlers = self.handlers.read().expect("cache handler lock poisoned");
        for object in &objects {
            for h in handlers.iter() {
                if let Some(on_update) = &h.on_update {
                    on_update(Some(object), object);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn pod(namespace: &str, name: &str) -> MirroredObject {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        MirroredObject::from(pod)
    }

    fn event(event_type: EventType, object: MirroredObject) -> ObjectEvent {
        ObjectEvent { event_type, object }
    }

    #[test]
    fn test_apply_add_modify_delete() {
        let cache = ResourceCache::new(ResourceKind::Pods, "ns");

        cache
            .apply_event(event(EventType::Added, pod("ns", "a")))
            .expect("add applies");
        assert!(cache.get("ns/a").is_some());
        assert_eq!(cache.keys(), vec!["ns/a".to_string()]);

        cache
            .apply_event(event(EventType::Modified, pod("ns", "a")))
            .expect("modify applies");
        assert_eq!(cache.list().len(), 1);

        cache
            .apply_event(event(EventType::Deleted, pod("ns", "a")))
            .expect("delete applies");
        assert!(cache.get("ns/a").is_none());
        assert_eq!(cache.generation(), 3);
    }

    #[test]
    fn test_unnamed_object_rejected_as_malformed() {
        let cache = ResourceCache::new(ResourceKind::Pods, "ns");
        let mut unnamed = Pod::default();
        unnamed.metadata.namespace = Some("ns".to_string());
        let err = cache
            .apply_event(event(EventType::Added, MirroredObject::from(unnamed)))
            .expect_err("unnamed object must not cache");
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert!(cache.list().is_empty());
    }

    #[test]
    fn test_handlers_fire_per_event() {
        let cache = ResourceCache::new(ResourceKind::Pods, "ns");
        let adds = Arc::new(AtomicU32::new(0));
        let updates = Arc::new(AtomicU32::new(0));
        let deletes = Arc::new(AtomicU32::new(0));
        let (a, u, d) = (adds.clone(), updates.clone(), deletes.clone());

        cache.add_handlers(EventHandlers {
            on_add: Some(Box::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            })),
            on_update: Some(Box::new(move |_, _| {
                u.fetch_add(1, Ordering::SeqCst);
            })),
            on_delete: Some(Box::new(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            })),
        });

        cache
            .apply_event(event(EventType::Added, pod("ns", "a")))
            .expect("applies");
        cache
            .apply_event(event(EventType::Modified, pod("ns", "a")))
            .expect("applies");
        cache
            .apply_event(event(EventType::Deleted, pod("ns", "a")))
            .expect("applies");

        assert_eq!(adds.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_re_add_of_cached_object_fires_update() {
        let cache = ResourceCache::new(ResourceKind::Pods, "ns");
        let adds = Arc::new(AtomicU32::new(0));
        let updates = Arc::new(AtomicU32::new(0));
        let (a, u) = (adds.clone(), updates.clone());

        cache.add_handlers(EventHandlers {
            on_add: Some(Box::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            })),
            on_update: Some(Box::new(move |_, _| {
                u.fetch_add(1, Ordering::SeqCst);
            })),
            on_delete: None,
        });

        cache
            .apply_event(event(EventType::Added, pod("ns", "a")))
            .expect("applies");
        cache
            .apply_event(event(EventType::Added, pod("ns", "a")))
            .expect("applies");

        assert_eq!(adds.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resync_requires_started_watch() {
        let cache = ResourceCache::new(ResourceKind::Pods, "ns");
        let err = cache.resync().expect_err("resync before start must fail");
        assert!(matches!(err, Error::WatchNotEstablished { .. }));

        cache.mark_started();
        cache.resync().expect("resync after start succeeds");
    }

    #[test]
    fn test_resync_preserves_the_object_set() {
        let cache = ResourceCache::new(ResourceKind::Pods, "ns");
        cache.mark_started();
        for name in ["a", "b", "c"] {
            cache
                .apply_event(event(EventType::Added, pod("ns", name)))
                .expect("applies");
        }
        let before = cache.list();

        cache.resync().expect("resync succeeds");

        let after = cache.list();
        assert_eq!(before.len(), after.len());
        for obj in &before {
            assert!(after.contains(obj), "resync must not change the store");
        }
        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["ns/a", "ns/b", "ns/c"]);
    }

    #[test]
    fn test_resync_replays_objects_through_update_handlers() {
        let cache = ResourceCache::new(ResourceKind::Pods, "ns");
        cache.mark_started();
        cache
            .apply_event(event(EventType::Added, pod("ns", "a")))
            .expect("applies");
        cache
            .apply_event(event(EventType::Added, pod("ns", "b")))
            .expect("applies");

        let updates = Arc::new(AtomicU32::new(0));
        let u = updates.clone();
        cache.add_handlers(EventHandlers {
            on_add: None,
            on_update: Some(Box::new(move |_, _| {
                u.fetch_add(1, Ordering::SeqCst);
            })),
            on_delete: None,
        });

        cache.resync().expect("resync succeeds");
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }
}
