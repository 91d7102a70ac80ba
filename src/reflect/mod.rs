//! Reflection engine.
//!
//! A [`Reflector`] mirrors one resource kind in one direction between
//! the two cluster sides. Cache event handlers enqueue source-side
//! `namespace/name` keys onto a [`RetryQueue`]; workers reconcile each
//! key by re-reading the current source cache state, translating it
//! through the reflector's hooks, and pushing the result to the target
//! cluster. Because reconciliation always re-reads the cache, a key
//! coalesced while in flight is processed against the newest state.
//!
//! # Architecture
//!
//! ```text
//!   source watch ──> ResourceCache ──(handlers)──> RetryQueue
//!                                                     │
//!                          workers ───────────────────┘
//!                             │ re-read source cache
//!                             │ hooks: pre_add / pre_update / pre_delete
//!                             ▼
//!                       target cluster (create / update / delete)
//! ```

pub mod pods;

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::manager::CacheManager;
use crate::cache::resource::EventHandlers;
use crate::client::ClusterClient;
use crate::error::{Error, Result};
use crate::queue::{spawn_workers, QueueHandler, RetryQueue};
use crate::resource::{keyer, split_key, MirroredObject, ResourceKind, Side};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Which way a reflector mirrors objects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    HomeToForeign,
    ForeignToHome,
}

impl Direction {
    pub fn source(self) -> Side {
        match self {
            Direction::HomeToForeign => Side::Home,
            Direction::ForeignToHome => Side::Foreign,
        }
    }

    pub fn target(self) -> Side {
        match self {
            Direction::HomeToForeign => Side::Foreign,
            Direction::ForeignToHome => Side::Home,
        }
    }
}

/// Whether reconciliation writes to the target cluster or only records
/// what it would push
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushMode {
    /// Track translated objects without touching the target cluster
    CacheOnly,
    /// Push translated objects to the target cluster
    RemoteWrite,
}

/// Kind-specific behavior injected into a [`Reflector`].
///
/// `target_namespace` maps a source namespace to its mirror; the flag
/// controls whether an unknown mapping may be created. `keyer` derives
/// the queue key from a source object. The pre-hooks translate objects
/// at each lifecycle step; `pre_update` additionally sees the
/// previously pushed copy when one exists.
pub struct ReflectorHooks {
    pub target_namespace: Arc<dyn Fn(&str, bool) -> Result<String> + Send + Sync>,
    pub keyer: Arc<dyn Fn(&MirroredObject) -> Option<String> + Send + Sync>,
    pub pre_add: Arc<dyn Fn(&MirroredObject) -> Result<MirroredObject> + Send + Sync>,
    pub pre_update:
        Arc<dyn Fn(&MirroredObject, Option<&MirroredObject>) -> Result<MirroredObject> + Send + Sync>,
    pub pre_delete: Arc<dyn Fn(&MirroredObject) -> Result<MirroredObject> + Send + Sync>,
}

/// One kind, one direction, one queue
pub struct Reflector {
    kind: ResourceKind,
    direction: Direction,
    manager: Arc<CacheManager>,
    target_client: Arc<dyn ClusterClient>,
    hooks: ReflectorHooks,
    queue: Arc<RetryQueue>,
    push_mode: PushMode,
    // Parent of every watch lifecycle this reflector starts; cancelled
    // when the external stop signal fires.
    stop: CancellationToken,
    // Last translated copy pushed per source key; used both to skip
    // no-op pushes and to address deletions on the target.
    pushed: DashMap<String, MirroredObject>,
}

impl Reflector {
    pub fn new(
        kind: ResourceKind,
        direction: Direction,
        manager: Arc<CacheManager>,
        hooks: ReflectorHooks,
        push_mode: PushMode,
    ) -> Result<Arc<Self>> {
        let target_client = Arc::clone(manager.registry(direction.target())?.client());
        Ok(Arc::new(Self {
            kind,
            direction,
            manager,
            target_client,
            hooks,
            queue: Arc::new(RetryQueue::new()),
            push_mode,
            stop: CancellationToken::new(),
            pushed: DashMap::new(),
        }))
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Cache handlers that feed this reflector's queue.
    ///
    /// Handlers only enqueue the source key; whether anything actually
    /// changed is decided at reconcile time against the pushed copy, so
    /// a resync replay converges without duplicate remote writes.
    pub fn event_handlers(&self) -> EventHandlers {
        let enqueue = |queue: Arc<RetryQueue>,
                       keyer: Arc<dyn Fn(&MirroredObject) -> Option<String> + Send + Sync>| {
            move |object: &MirroredObject| {
                // The cache rejects unkeyable objects before handlers run.
                if let Some(key) = keyer(object) {
                    queue.add(key);
                }
            }
        };
        let on_add = enqueue(Arc::clone(&self.queue), Arc::clone(&self.hooks.keyer));
        let on_delete = enqueue(Arc::clone(&self.queue), Arc::clone(&self.hooks.keyer));
        let on_update = enqueue(Arc::clone(&self.queue), Arc::clone(&self.hooks.keyer));
        EventHandlers {
            on_add: Some(Box::new(on_add)),
            on_update: Some(Box::new(move |_old, new: &MirroredObject| on_update(new))),
            on_delete: Some(Box::new(on_delete)),
        }
    }

    /// Begin mirroring a source namespace.
    ///
    /// Caches and starts both the source namespace and its mapped
    /// target namespace (creating the mapping if needed), and wires the
    /// source cache's events into the queue. The post-registration
    /// resync replays objects observed before the handlers were
    /// attached.
    pub async fn register_namespace(&self, namespace: &str) -> Result<()> {
        let target_ns = (self.hooks.target_namespace)(namespace, true)?;
        info!(
            kind = %self.kind,
            source = %namespace,
            target = %target_ns,
            side = %self.direction.source(),
            "Registering namespace for reflection"
        );
        for (side, ns) in [
            (self.direction.source(), namespace),
            (self.direction.target(), target_ns.as_str()),
        ] {
            self.manager.add_namespace(side, ns).await?;
            self.manager
                .start_namespace(side, ns, self.stop.child_token())
                .await?;
        }

        let set = self
            .manager
            .registry(self.direction.source())?
            .namespace(namespace)
            .await?;
        let cache = set.cache(self.kind)?;
        cache.add_handlers(self.event_handlers());
        if cache.is_started() {
            cache.resync()?;
        }
        Ok(())
    }

    /// Spawn `workers` reconcile workers. When `stop` fires the queue
    /// shuts down and every watch this reflector started is cancelled.
    pub fn start(self: &Arc<Self>, workers: usize, stop: CancellationToken) {
        let own_stop = self.stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => own_stop.cancel(),
                _ = own_stop.cancelled() => {}
            }
        });
        let reflector = Arc::clone(self);
        let handler: QueueHandler = Arc::new(move |key: String| {
            let reflector = Arc::clone(&reflector);
            Box::pin(async move { reflector.reconcile_key(&key).await })
        });
        spawn_workers(workers, Arc::clone(&self.queue), handler, self.stop.clone());
    }

    /// Reconcile one source key against the target cluster.
    ///
    /// The source cache, not the triggering event, is the source of
    /// truth: present means create-or-update, absent means delete.
    pub async fn reconcile_key(&self, key: &str) -> Result<()> {
        let (namespace, name) = split_key(key).ok_or_else(|| {
            Error::malformed(format!("queue key {key:?} is not namespace/name"))
        })?;

        match self
            .manager
            .get_object(self.direction.source(), self.kind, namespace, name)
            .await
        {
            Ok(source_obj) => self.push(key, &source_obj).await,
            Err(err) if err.is_not_found() => self.remove(key, namespace, name).await,
            Err(err) => Err(err),
        }
    }

    async fn push(&self, key: &str, source_obj: &MirroredObject) -> Result<()> {
        let previous = self.pushed.get(key).map(|entry| entry.value().clone());
        let translated = match &previous {
            None => (self.hooks.pre_add)(source_obj)?,
            Some(prev) => (self.hooks.pre_update)(source_obj, Some(prev))?,
        };

        if previous.as_ref() == Some(&translated) {
            debug!(kind = %self.kind, key = %key, "Translated object unchanged, skipping push");
            return Ok(());
        }

        let (target_ns, target_name) = match (translated.namespace(), translated.name()) {
            (Some(ns), Some(name)) => (ns.to_string(), name.to_string()),
            _ => {
                return Err(Error::malformed(format!(
                    "translated object for {key} lacks namespace or name"
                )))
            }
        };
        let target_key = keyer(&target_ns, &target_name);
        if self.push_mode == PushMode::RemoteWrite {
            match self.target_client.get(self.kind, &target_ns, &target_name).await {
                Ok(_) => {
                    self.target_client.update(&translated).await?;
                }
                Err(err) if err.is_not_found() => {
                    self.target_client.create(&translated).await?;
                }
                Err(err) => return Err(err),
            }
        }
        debug!(kind = %self.kind, key = %key, target = %target_key, "Pushed mirrored object");
        self.pushed.insert(key.to_string(), translated);
        Ok(())
    }

    async fn remove(&self, key: &str, namespace: &str, name: &str) -> Result<()> {
        let target = match self.pushed.remove(key) {
            Some((_, prev)) => {
                let obj = (self.hooks.pre_delete)(&prev)?;
                match (obj.namespace(), obj.name()) {
                    (Some(ns), Some(n)) => (ns.to_string(), n.to_string()),
                    _ => ((self.hooks.target_namespace)(namespace, false)?, name.to_string()),
                }
            }
            // Never pushed by this process; the mirror may still exist
            // from a previous run, so address it by mapped identity.
            None => ((self.hooks.target_namespace)(namespace, false)?, name.to_string()),
        };

        if self.push_mode == PushMode::RemoteWrite {
            match self
                .target_client
                .delete(self.kind, &target.0, &target.1)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        debug!(kind = %self.kind, key = %key, target_namespace = %target.0, "Removed mirrored object");
        Ok(())
    }

    /// Delete every mirrored object for a source namespace.
    ///
    /// Resyncs the target cache, deletes each listed object with a short
    /// retry budget, and treats already-gone objects as success. Residual
    /// failures are logged and skipped so one stuck object cannot wedge
    /// namespace teardown.
    ///
    /// Teardown walks the target-side cache rather than translating
    /// every source key: each mirror there is already expressed in
    /// target-side terms, so deleting it under its own identity reaches
    /// the same end state, and it also catches mirrors whose source
    /// object is already gone. `pre_delete` still runs per object for
    /// hooks that rewrite the deletion target.
    pub async fn cleanup_namespace(&self, namespace: &str) -> Result<()> {
        let target_ns = (self.hooks.target_namespace)(namespace, false)?;
        info!(
            kind = %self.kind,
            source = %namespace,
            target = %target_ns,
            "Cleaning up mirrored namespace"
        );

        self.manager
            .resync(self.direction.target(), self.kind, &target_ns)
            .await?;
        let objects = self
            .manager
            .list_objects(self.direction.target(), self.kind, &target_ns)
            .await?;

        for object in objects {
            let object = match (self.hooks.pre_delete)(&object) {
                Ok(object) => object,
                Err(err) => {
                    warn!(kind = %self.kind, error = %err, "Skipping cleanup of untranslatable object");
                    continue;
                }
            };
            let Some(name) = object.name().map(str::to_string) else {
                continue;
            };
            let delete_ns = object
                .namespace()
                .map(str::to_string)
                .unwrap_or_else(|| target_ns.clone());
            let outcome = retry_with_backoff(&RetryConfig::cleanup(), "cleanup_delete", || {
                let (delete_ns, name) = (delete_ns.clone(), name.clone());
                async move {
                    match self.target_client.delete(self.kind, &delete_ns, &name).await {
                        Err(err) if err.is_not_found() => Ok(()),
                        other => other,
                    }
                }
            })
            .await;
            if let Err(err) = outcome {
                warn!(kind = %self.kind, object = %keyer(&delete_ns, &name), error = %err, "Leaving object behind after cleanup retries");
            }
        }

        let prefix = format!("{namespace}/");
        self.pushed.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    /// Translated objects this reflector currently believes exist on
    /// the target, for one source namespace
    pub fn list_mirrored(&self, namespace: &str) -> Vec<MirroredObject> {
        let prefix = format!("{namespace}/");
        self.pushed
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect()
    }
}
