//! Cross-cluster resource reflection engine.
//!
//! Tether mirrors namespaced Kubernetes objects between a home cluster
//! and a peered foreign cluster. Watches on the source side feed layered
//! caches; cache events enqueue keys onto bounded-retry queues; workers
//! reconcile each key by translating the current source state (namespace
//! NAT, metadata scrubbing, pod IP remapping) and pushing it to the
//! target cluster.
//!
//! # Layers
//!
//! - [`client`] — cluster API access behind the [`client::ClusterClient`]
//!   trait
//! - [`cache`] — per-kind, per-namespace object caches with event
//!   handlers, addressed through [`cache::CacheManager`]
//! - [`queue`] — deduplicating work queue with per-key retry budget
//! - [`reflect`] — the reflection loop and its per-kind hooks
//! - [`nat`], [`translate`] — namespace and payload translation
//! - [`testing`] — in-memory cluster client for tests

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod nat;
pub mod queue;
pub mod reflect;
pub mod resource;
pub mod retry;
pub mod telemetry;
pub mod testing;
pub mod translate;

pub use cache::{CacheManager, CacheRegistry, NamespaceCaches, ResourceCache};
pub use client::{ClusterClient, KubeClusterClient};
pub use config::ReflectionConfig;
pub use error::{Error, Result};
pub use nat::{NamespaceNatting, NattingTable};
pub use reflect::{Direction, PushMode, Reflector, ReflectorHooks};
pub use resource::{EventType, MirroredObject, ObjectEvent, ResourceKind, Side};
