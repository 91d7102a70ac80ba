//! In-memory cluster client for tests.
//!
//! [`FakeClusterClient`] implements [`ClusterClient`] against a local
//! object store. Watches replay the current store contents as `Added`
//! events and then stream live mutations, which is exactly the shape the
//! watch pumps expect from a real cluster. Write failures can be
//! injected to exercise retry paths.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::client::{ClusterClient, WatchStream};
use crate::error::{Error, Result};
use crate::resource::{keyer, EventType, MirroredObject, ObjectEvent, ResourceKind};

const CHANNEL_CAPACITY: usize = 256;

/// In-memory stand-in for one cluster's API server
pub struct FakeClusterClient {
    store: DashMap<(ResourceKind, String, String), MirroredObject>,
    topics: DashMap<(ResourceKind, String), broadcast::Sender<ObjectEvent>>,
    // Remaining write calls to fail with a retryable error.
    inject_write_failures: AtomicU32,
    creates: AtomicU32,
    updates: AtomicU32,
    deletes: AtomicU32,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
            topics: DashMap::new(),
            inject_write_failures: AtomicU32::new(0),
            creates: AtomicU32::new(0),
            updates: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` create/update/delete calls with a
    /// retryable error
    pub fn inject_write_failures(&self, count: u32) {
        self.inject_write_failures.store(count, Ordering::SeqCst);
    }

    pub fn create_count(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Insert or replace an object as if the cluster changed it,
    /// emitting the matching watch event
    pub fn upsert(&self, object: MirroredObject) {
        let Some((kind, namespace, name)) = identity(&object) else {
            return;
        };
        let previous = self
            .store
            .insert((kind, namespace.clone(), name), object.clone());
        let event_type = if previous.is_some() {
            EventType::Modified
        } else {
            EventType::Added
        };
        self.broadcast(kind, &namespace, event_type, object);
    }

    /// Remove an object as if the cluster deleted it, emitting the
    /// matching watch event
    pub fn remove(&self, kind: ResourceKind, namespace: &str, name: &str) {
        let removed = self
            .store
            .remove(&(kind, namespace.to_string(), name.to_string()));
        if let Some((_, object)) = removed {
            self.broadcast(kind, namespace, EventType::Deleted, object);
        }
    }

    /// Current objects of one kind in one namespace
    pub fn objects_in(&self, kind: ResourceKind, namespace: &str) -> Vec<MirroredObject> {
        self.store
            .iter()
            .filter(|entry| entry.key().0 == kind && entry.key().1 == namespace)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn topic(&self, kind: ResourceKind, namespace: &str) -> broadcast::Sender<ObjectEvent> {
        self.topics
            .entry((kind, namespace.to_string()))
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn broadcast(
        &self,
        kind: ResourceKind,
        namespace: &str,
        event_type: EventType,
        object: MirroredObject,
    ) {
        // Send fails only when nobody is watching, which is fine.
        let _ = self.topic(kind, namespace).send(ObjectEvent { event_type, object });
    }

    fn maybe_fail_write(&self) -> Result<()> {
        let remaining = self.inject_write_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .inject_write_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(Error::Watch("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for FakeClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

fn identity(object: &MirroredObject) -> Option<(ResourceKind, String, String)> {
    match (object.namespace(), object.name()) {
        (Some(ns), Some(name)) => Some((object.kind(), ns.to_string(), name.to_string())),
        _ => None,
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<MirroredObject> {
        self.store
            .get(&(kind, namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found(kind.to_string(), keyer(namespace, name)))
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<MirroredObject>> {
        Ok(self.objects_in(kind, namespace))
    }

    async fn create(&self, obj: &MirroredObject) -> Result<MirroredObject> {
        self.maybe_fail_write()?;
        let (kind, namespace, name) =
            identity(obj).ok_or_else(|| Error::malformed("create: object is unkeyable"))?;
        let key = (kind, namespace.clone(), name.clone());
        if self.store.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: kind.to_string(),
                key: keyer(&namespace, &name),
            });
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.store.insert(key, obj.clone());
        self.broadcast(kind, &namespace, EventType::Added, obj.clone());
        Ok(obj.clone())
    }

    async fn update(&self, obj: &MirroredObject) -> Result<MirroredObject> {
        self.maybe_fail_write()?;
        let (kind, namespace, name) =
            identity(obj).ok_or_else(|| Error::malformed("update: object is unkeyable"))?;
        let key = (kind, namespace.clone(), name.clone());
        if !self.store.contains_key(&key) {
            return Err(Error::not_found(kind.to_string(), keyer(&namespace, &name)));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.store.insert(key, obj.clone());
        self.broadcast(kind, &namespace, EventType::Modified, obj.clone());
        Ok(obj.clone())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.maybe_fail_write()?;
        let removed = self
            .store
            .remove(&(kind, namespace.to_string(), name.to_string()));
        match removed {
            Some((_, object)) => {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                self.broadcast(kind, namespace, EventType::Deleted, object);
                Ok(())
            }
            None => Err(Error::not_found(kind.to_string(), keyer(namespace, name))),
        }
    }

    async fn watch(&self, kind: ResourceKind, namespace: &str) -> Result<WatchStream> {
        let receiver = self.topic(kind, namespace).subscribe();
        let snapshot: Vec<Result<ObjectEvent>> = self
            .objects_in(kind, namespace)
            .into_iter()
            .map(|object| {
                Ok(ObjectEvent {
                    event_type: EventType::Added,
                    object,
                })
            })
            .collect();
        let live = BroadcastStream::new(receiver)
            .map(|item| item.map_err(|e| Error::Watch(format!("fake watch lagged: {e}"))));
        Ok(futures::stream::iter(snapshot).chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;

    fn pod(namespace: &str, name: &str) -> MirroredObject {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        MirroredObject::from(pod)
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let client = FakeClusterClient::new();
        client.create(&pod("ns", "a")).await.expect("creates");
        assert!(client.create(&pod("ns", "a")).await.is_err());

        let fetched = client
            .get(ResourceKind::Pods, "ns", "a")
            .await
            .expect("exists");
        assert_eq!(fetched.name(), Some("a"));

        client.update(&pod("ns", "a")).await.expect("updates");
        client
            .delete(ResourceKind::Pods, "ns", "a")
            .await
            .expect("deletes");
        let err = client
            .get(ResourceKind::Pods, "ns", "a")
            .await
            .expect_err("gone");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_watch_replays_snapshot_then_streams() {
        let client = FakeClusterClient::new();
        client.upsert(pod("ns", "pre"));

        let mut stream = client
            .watch(ResourceKind::Pods, "ns")
            .await
            .expect("watch opens");

        let first = stream.next().await.expect("snapshot event").expect("ok");
        assert_eq!(first.event_type, EventType::Added);
        assert_eq!(first.object.name(), Some("pre"));

        client.upsert(pod("ns", "live"));
        let second = stream.next().await.expect("live event").expect("ok");
        assert_eq!(second.object.name(), Some("live"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let client = FakeClusterClient::new();
        client.inject_write_failures(1);
        assert!(client.create(&pod("ns", "a")).await.is_err());
        client.create(&pod("ns", "a")).await.expect("second try lands");
        assert_eq!(client.create_count(), 1);
    }
}
