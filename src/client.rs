//! Cluster client abstraction
//!
//! The engine talks to each side of the peering through [`ClusterClient`],
//! a capability-typed handle exposing namespaced create/get/update/delete
//! and a watch stream per mirrored kind. Production code uses
//! [`KubeClusterClient`]; tests use the in-memory fake from
//! [`crate::testing`].

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::watcher::{self, Event};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::resource::{EventType, MirroredObject, ObjectEvent, ResourceKind};

/// A live stream of change events for one (kind, namespace) pair
pub type WatchStream = BoxStream<'static, Result<ObjectEvent>>;

/// Capability-typed handle to one side's cluster.
///
/// All operations are namespaced; the engine never performs
/// cluster-scoped reads or writes.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a single object from the cluster
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<MirroredObject>;

    /// List all objects of a kind in a namespace
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<MirroredObject>>;

    /// Create the object in its namespace
    async fn create(&self, obj: &MirroredObject) -> Result<MirroredObject>;

    /// Replace the object in its namespace
    async fn update(&self, obj: &MirroredObject) -> Result<MirroredObject>;

    /// Delete an object; a missing object surfaces as a not-found error
    /// (callers decide whether that is success)
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()>;

    /// Open a watch stream for a kind in a namespace.
    ///
    /// The stream first replays the current state as `Added` events, then
    /// delivers live changes in the order the cluster observed them.
    async fn watch(&self, kind: ResourceKind, namespace: &str) -> Result<WatchStream>;
}

/// [`ClusterClient`] backed by a real `kube::Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
}

impl KubeClusterClient {
    /// Wrap an authenticated kube client for one side of the peering
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_typed<K>(&self, namespace: &str, name: &str) -> Result<MirroredObject>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + Into<MirroredObject>,
        K::DynamicType: Default,
    {
        let obj = self.api::<K>(namespace).get(name).await?;
        Ok(obj.into())
    }

    async fn list_typed<K>(&self, namespace: &str) -> Result<Vec<MirroredObject>>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + Into<MirroredObject>,
        K::DynamicType: Default,
    {
        let list = self.api::<K>(namespace).list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(Into::into).collect())
    }

    async fn create_typed<K>(&self, namespace: &str, obj: K) -> Result<MirroredObject>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug
            + Into<MirroredObject>,
        K::DynamicType: Default,
    {
        let created = self
            .api::<K>(namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        Ok(created.into())
    }

    async fn update_typed<K>(&self, namespace: &str, name: &str, obj: K) -> Result<MirroredObject>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug
            + Into<MirroredObject>,
        K::DynamicType: Default,
    {
        let replaced = self
            .api::<K>(namespace)
            .replace(name, &PostParams::default(), &obj)
            .await?;
        Ok(replaced.into())
    }

    async fn delete_typed<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    fn watch_typed<K>(&self, namespace: &str) -> WatchStream
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Into<MirroredObject>
            + 'static,
        K::DynamicType: Default,
    {
        let api: Api<K> = self.api(namespace);
        watcher::watcher(api, watcher::Config::default())
            .map(|res| match res {
                Ok(Event::InitApply(obj)) => Some(Ok(ObjectEvent {
                    event_type: EventType::Added,
                    object: obj.into(),
                })),
                Ok(Event::Apply(obj)) => Some(Ok(ObjectEvent {
                    event_type: EventType::Modified,
                    object: obj.into(),
                })),
                Ok(Event::Delete(obj)) => Some(Ok(ObjectEvent {
                    event_type: EventType::Deleted,
                    object: obj.into(),
                })),
                // Bookmarks around the initial listing carry no object.
                Ok(Event::Init) | Ok(Event::InitDone) => None,
                Err(e) => Some(Err(Error::Watch(e.to_string()))),
            })
            .filter_map(futures::future::ready)
            .boxed()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<MirroredObject> {
        match kind {
            ResourceKind::Pods => self.get_typed::<Pod>(namespace, name).await,
            ResourceKind::Services => self.get_typed::<Service>(namespace, name).await,
            ResourceKind::ConfigMaps => self.get_typed::<ConfigMap>(namespace, name).await,
            ResourceKind::Secrets => self.get_typed::<Secret>(namespace, name).await,
            ResourceKind::Endpoints => self.get_typed::<Endpoints>(namespace, name).await,
        }
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<MirroredObject>> {
        match kind {
            ResourceKind::Pods => self.list_typed::<Pod>(namespace).await,
            ResourceKind::Services => self.list_typed::<Service>(namespace).await,
            ResourceKind::ConfigMaps => self.list_typed::<ConfigMap>(namespace).await,
            ResourceKind::Secrets => self.list_typed::<Secret>(namespace).await,
            ResourceKind::Endpoints => self.list_typed::<Endpoints>(namespace).await,
        }
    }

    async fn create(&self, obj: &MirroredObject) -> Result<MirroredObject> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::malformed("create: object has no namespace"))?
            .to_string();
        match obj {
            MirroredObject::Pod(p) => self.create_typed(&namespace, (**p).clone()).await,
            MirroredObject::Service(s) => self.create_typed(&namespace, (**s).clone()).await,
            MirroredObject::ConfigMap(c) => self.create_typed(&namespace, (**c).clone()).await,
            MirroredObject::Secret(s) => self.create_typed(&namespace, (**s).clone()).await,
            MirroredObject::Endpoints(e) => self.create_typed(&namespace, (**e).clone()).await,
        }
    }

    async fn update(&self, obj: &MirroredObject) -> Result<MirroredObject> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::malformed("update: object has no namespace"))?
            .to_string();
        let name = obj
            .name()
            .ok_or_else(|| Error::malformed("update: object has no name"))?
            .to_string();
        match obj {
            MirroredObject::Pod(p) => self.update_typed(&namespace, &name, (**p).clone()).await,
            MirroredObject::Service(s) => self.update_typed(&namespace, &name, (**s).clone()).await,
            MirroredObject::ConfigMap(c) => {
                self.update_typed(&namespace, &name, (**c).clone()).await
            }
            MirroredObject::Secret(s) => self.update_typed(&namespace, &name, (**s).clone()).await,
            MirroredObject::Endpoints(e) => {
                self.update_typed(&namespace, &name, (**e).clone()).await
            }
        }
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        match kind {
            ResourceKind::Pods => self.delete_typed::<Pod>(namespace, name).await,
            ResourceKind::Services => self.delete_typed::<Service>(namespace, name).await,
            ResourceKind::ConfigMaps => self.delete_typed::<ConfigMap>(namespace, name).await,
            ResourceKind::Secrets => self.delete_typed::<Secret>(namespace, name).await,
            ResourceKind::Endpoints => self.delete_typed::<Endpoints>(namespace, name).await,
        }
    }

    async fn watch(&self, kind: ResourceKind, namespace: &str) -> Result<WatchStream> {
        Ok(match kind {
            ResourceKind::Pods => self.watch_typed::<Pod>(namespace),
            ResourceKind::Services => self.watch_typed::<Service>(namespace),
            ResourceKind::ConfigMaps => self.watch_typed::<ConfigMap>(namespace),
            ResourceKind::Secrets => self.watch_typed::<Secret>(namespace),
            ResourceKind::Endpoints => self.watch_typed::<Endpoints>(namespace),
        })
    }
}
