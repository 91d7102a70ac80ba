//! Mirrored resource model
//!
//! Objects crossing the cluster boundary are carried in a tagged sum
//! type, [`MirroredObject`], with one variant per mirrored kind. The
//! discriminant travels with the payload, so caches, reflectors, and the
//! queue never downcast: everything dispatches with a `match`.

use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Which cluster role a cache or client belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// The local cluster in the peering
    Home,
    /// The peered remote cluster
    Foreign,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => write!(f, "home"),
            Side::Foreign => write!(f, "foreign"),
        }
    }
}

/// One category of mirrored object, drawn from a fixed enumeration.
///
/// The engine is parameterized over a subset of these; it never decides
/// on its own which kinds to mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Pods
    Pods,
    /// Services
    Services,
    /// ConfigMaps
    ConfigMaps,
    /// Secrets
    Secrets,
    /// Endpoints
    Endpoints,
}

impl ResourceKind {
    /// Every kind the engine knows how to mirror
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Pods,
        ResourceKind::Services,
        ResourceKind::ConfigMaps,
        ResourceKind::Secrets,
        ResourceKind::Endpoints,
    ];

    /// Lowercase plural name, as used in keys and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pods => "pods",
            ResourceKind::Services => "services",
            ResourceKind::ConfigMaps => "configmaps",
            ResourceKind::Secrets => "secrets",
            ResourceKind::Endpoints => "endpoints",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mirrored object with its kind discriminant.
///
/// Payloads are boxed: `Pod` alone is several hundred bytes and these
/// values move through channels and maps constantly.
#[derive(Clone, Debug, PartialEq)]
pub enum MirroredObject {
    /// A pod
    Pod(Box<Pod>),
    /// A service
    Service(Box<Service>),
    /// A config map
    ConfigMap(Box<ConfigMap>),
    /// A secret
    Secret(Box<Secret>),
    /// A service's endpoints
    Endpoints(Box<Endpoints>),
}

impl MirroredObject {
    /// The kind discriminant of this object
    pub fn kind(&self) -> ResourceKind {
        match self {
            MirroredObject::Pod(_) => ResourceKind::Pods,
            MirroredObject::Service(_) => ResourceKind::Services,
            MirroredObject::ConfigMap(_) => ResourceKind::ConfigMaps,
            MirroredObject::Secret(_) => ResourceKind::Secrets,
            MirroredObject::Endpoints(_) => ResourceKind::Endpoints,
        }
    }

    /// Shared metadata of the payload
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            MirroredObject::Pod(p) => &p.metadata,
            MirroredObject::Service(s) => &s.metadata,
            MirroredObject::ConfigMap(c) => &c.metadata,
            MirroredObject::Secret(s) => &s.metadata,
            MirroredObject::Endpoints(e) => &e.metadata,
        }
    }

    /// Mutable shared metadata of the payload
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            MirroredObject::Pod(p) => &mut p.metadata,
            MirroredObject::Service(s) => &mut s.metadata,
            MirroredObject::ConfigMap(c) => &mut c.metadata,
            MirroredObject::Secret(s) => &mut s.metadata,
            MirroredObject::Endpoints(e) => &mut e.metadata,
        }
    }

    /// Object name, or `None` for a malformed payload
    pub fn name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    /// Object namespace, or `None` for a malformed payload
    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    /// Retarget the object into another namespace
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.meta_mut().namespace = Some(namespace.into());
    }

    /// The stable `namespace/name` key of this object, or `None` if
    /// either part is missing
    pub fn key(&self) -> Option<String> {
        match (self.namespace(), self.name()) {
            (Some(ns), Some(name)) => Some(keyer(ns, name)),
            _ => None,
        }
    }
}

impl From<Pod> for MirroredObject {
    fn from(pod: Pod) -> Self {
        MirroredObject::Pod(Box::new(pod))
    }
}

impl From<Service> for MirroredObject {
    fn from(svc: Service) -> Self {
        MirroredObject::Service(Box::new(svc))
    }
}

impl From<ConfigMap> for MirroredObject {
    fn from(cm: ConfigMap) -> Self {
        MirroredObject::ConfigMap(Box::new(cm))
    }
}

impl From<Secret> for MirroredObject {
    fn from(secret: Secret) -> Self {
        MirroredObject::Secret(Box::new(secret))
    }
}

impl From<Endpoints> for MirroredObject {
    fn from(endpoints: Endpoints) -> Self {
        MirroredObject::Endpoints(Box::new(endpoints))
    }
}

/// What happened to a watched object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// Object appeared
    Added,
    /// Object changed
    Modified,
    /// Object went away
    Deleted,
}

/// Statically-typed watch event envelope.
///
/// Carries the kind discriminant inside the payload; consumers match on
/// the variant instead of asserting on an opaque interface.
#[derive(Clone, Debug)]
pub struct ObjectEvent {
    /// What happened
    pub event_type: EventType,
    /// The object as observed on the source side
    pub object: MirroredObject,
}

/// Stable key formatting shared by caches, reflectors, and the queue
pub fn keyer(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Split a `namespace/name` key into its parts
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (ns, name) = key.split_once('/')?;
    if ns.is_empty() || name.is_empty() {
        return None;
    }
    Some((ns, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(namespace: &str, name: &str) -> MirroredObject {
        MirroredObject::Pod(Box::new(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    #[test]
    fn test_keyer_formats_namespace_name() {
        assert_eq!(keyer("ns-a", "p1"), "ns-a/p1");
    }

    #[test]
    fn test_split_key_round_trip() {
        assert_eq!(split_key(&keyer("ns-a", "p1")), Some(("ns-a", "p1")));
        assert_eq!(split_key("no-slash"), None);
        assert_eq!(split_key("/name-only"), None);
        assert_eq!(split_key("ns-only/"), None);
    }

    #[test]
    fn test_object_key_and_kind() {
        let obj = pod("ns-a", "p1");
        assert_eq!(obj.kind(), ResourceKind::Pods);
        assert_eq!(obj.key().as_deref(), Some("ns-a/p1"));
    }

    #[test]
    fn test_key_missing_name_is_none() {
        let obj = MirroredObject::Pod(Box::new(Pod {
            metadata: ObjectMeta {
                namespace: Some("ns-a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }));
        assert_eq!(obj.key(), None);
    }

    #[test]
    fn test_set_namespace_retargets_key() {
        let mut obj = pod("ns-a-peer", "p1");
        obj.set_namespace("ns-a");
        assert_eq!(obj.key().as_deref(), Some("ns-a/p1"));
    }

    #[test]
    fn test_field_for_field_equality() {
        // Skip-if-unchanged relies on structural equality of the payload.
        let a = pod("ns-a", "p1");
        let b = pod("ns-a", "p1");
        assert_eq!(a, b);

        let mut c = pod("ns-a", "p1");
        c.meta_mut().labels =
            Some([("app".to_string(), "web".to_string())].into_iter().collect());
        assert_ne!(a, c);
    }

    #[test]
    fn test_kind_display_matches_as_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }
}
