//! Layered object caches for both cluster sides.
//!
//! The hierarchy mirrors the addressing scheme of the reflection engine:
//!
//! - [`resource::ResourceCache`] — one kind in one namespace
//! - [`namespace::NamespaceCaches`] — all kinds in one namespace
//! - [`registry::CacheRegistry`] — all namespaces on one side
//! - [`manager::CacheManager`] — both sides behind one lookup API

pub mod manager;
pub mod namespace;
pub mod registry;
pub mod resource;

pub use manager::CacheManager;
pub use namespace::NamespaceCaches;
pub use registry::CacheRegistry;
pub use resource::{EventHandlers, ResourceCache};
