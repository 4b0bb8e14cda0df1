//! Kubernetes Pool Store Adapter
//!
//! Implements the `PoolStore` port using MayastorPool custom resources. A
//! watcher keeps a local cache of the objects in the namespace and turns
//! changes into `new`/`mod`/`del` events.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::crd::{MayastorPool, MayastorPoolStatus};
use crate::domain::{Event, PoolResource, PoolStore, POOL_FINALIZER};
use crate::error::{Error, Result};

// =============================================================================
// Cache
// =============================================================================

/// Cached MayastorPool objects plus the event channel fed from them.
///
/// Only a change of `metadata.generation` is reported as `mod`, so status and
/// finalizer writes pass through silently.
pub(crate) struct PoolCache {
    objects: RwLock<BTreeMap<String, MayastorPool>>,
    events: broadcast::Sender<Event<PoolResource>>,
}

impl PoolCache {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    fn validate(obj: &MayastorPool) -> Option<PoolResource> {
        match PoolResource::try_from(obj) {
            Ok(resource) => Some(resource),
            Err(e) => {
                warn!("Ignoring pool resource {}: {}", obj.name_any(), e);
                None
            }
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<PoolResource> {
        self.objects
            .read()
            .get(name)
            .and_then(|obj| PoolResource::try_from(obj).ok())
    }

    pub(crate) fn list(&self) -> Vec<PoolResource> {
        self.objects
            .read()
            .values()
            .filter_map(|obj| PoolResource::try_from(obj).ok())
            .collect()
    }

    /// Load the initial listing without emitting anything
    pub(crate) fn prime(&self, objects: Vec<MayastorPool>) {
        let valid = objects
            .into_iter()
            .filter(|obj| Self::validate(obj).is_some())
            .map(|obj| (obj.name_any(), obj))
            .collect();
        *self.objects.write() = valid;
    }

    /// Store an object written by the operator itself.
    ///
    /// The write response only replaces a cached object of the same
    /// generation that is not newer than it. Deleted objects stay deleted and
    /// spec changes are left for the watcher to report as `mod`.
    pub(crate) fn refresh(&self, obj: MayastorPool) {
        let mut objects = self.objects.write();
        let Some(cached) = objects.get_mut(&obj.name_any()) else {
            debug!("Pool resource {} is gone, dropping write result", obj.name_any());
            return;
        };
        if cached.metadata.generation != obj.metadata.generation
            || !newer_or_same(&obj, cached)
        {
            debug!("Cached pool resource {} is newer than the write result", obj.name_any());
            return;
        }
        *cached = obj;
    }

    pub(crate) fn apply(&self, obj: MayastorPool) {
        let Some(resource) = Self::validate(&obj) else {
            return;
        };

        let mut objects = self.objects.write();
        let generation = obj.metadata.generation;
        let event = match objects.insert(resource.name.clone(), obj) {
            None => Event::new(resource),
            Some(previous) if previous.metadata.generation != generation => {
                Event::modified(resource)
            }
            Some(_) => return,
        };
        debug!("Pool resource {} {}", event.object.name, event.event_type);
        let _ = self.events.send(event);
    }

    pub(crate) fn delete(&self, obj: MayastorPool) {
        let mut objects = self.objects.write();
        if let Some(cached) = objects.remove(&obj.name_any()) {
            if let Some(resource) = Self::validate(&cached) {
                debug!("Pool resource {} del", resource.name);
                let _ = self.events.send(Event::deleted(resource));
            }
        }
    }

    /// Reconcile the cache with a fresh listing after the watch restarted
    pub(crate) fn resync(&self, objects: Vec<MayastorPool>) {
        let listed: std::collections::BTreeSet<String> =
            objects.iter().map(|obj| obj.name_any()).collect();

        let gone: Vec<MayastorPool> = self
            .objects
            .read()
            .values()
            .filter(|obj| !listed.contains(&obj.name_any()))
            .cloned()
            .collect();
        for obj in gone {
            self.delete(obj);
        }

        for obj in objects {
            self.apply(obj);
        }
    }
}

/// Compare resource versions. They are etcd revisions in practice; anything
/// that does not parse as one is taken as newer.
fn newer_or_same(obj: &MayastorPool, cached: &MayastorPool) -> bool {
    let version = |o: &MayastorPool| {
        o.metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
    };
    match (version(obj), version(cached)) {
        (Some(incoming), Some(current)) => incoming >= current,
        _ => true,
    }
}

/// Finalizers to write: the server's list with ours added or removed
fn merge_finalizers(current: &[String], wanted: bool) -> Vec<String> {
    let mut finalizers: Vec<String> = current
        .iter()
        .filter(|f| f.as_str() != POOL_FINALIZER)
        .cloned()
        .collect();
    if wanted {
        finalizers.push(POOL_FINALIZER.to_string());
    }
    finalizers
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

/// Attempts at a finalizer write before giving up on conflicts
const FINALIZER_WRITE_ATTEMPTS: usize = 3;

// =============================================================================
// Store
// =============================================================================

/// MayastorPool-backed desired-state store
pub struct KubePoolStore {
    api: Api<MayastorPool>,
    cache: PoolCache,
}

impl KubePoolStore {
    /// Create a store for the MayastorPool objects in `namespace`
    pub fn new(client: Client, namespace: &str) -> Arc<Self> {
        Arc::new(Self {
            api: Api::namespaced(client, namespace),
            cache: PoolCache::new(),
        })
    }

    /// Start watching. Returns once the initial listing is cached.
    pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move { store.watch(ready_tx, shutdown).await });

        ready_rx.await.map_err(|_| {
            Error::Internal("pool resource watcher stopped before the initial listing".into())
        })?;
        Ok(handle)
    }

    async fn watch(&self, ready: oneshot::Sender<()>, shutdown: CancellationToken) {
        let mut ready = Some(ready);
        let mut listing: Option<Vec<MayastorPool>> = None;
        let mut stream =
            Box::pin(watcher(self.api.clone(), watcher::Config::default()).default_backoff());

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                None => {
                    warn!("Pool resource watch stream ended");
                    break;
                }
                Some(Err(e)) => warn!("Pool resource watch error: {}", e),
                Some(Ok(watcher::Event::Init)) => listing = Some(Vec::new()),
                Some(Ok(watcher::Event::InitApply(obj))) => {
                    listing.get_or_insert_with(Vec::new).push(obj);
                }
                Some(Ok(watcher::Event::InitDone)) => {
                    let objects = listing.take().unwrap_or_default();
                    match ready.take() {
                        Some(tx) => {
                            info!("Loaded {} pool resources", objects.len());
                            self.cache.prime(objects);
                            let _ = tx.send(());
                        }
                        None => {
                            debug!("Pool resource watch restarted, resyncing");
                            self.cache.resync(objects);
                        }
                    }
                }
                Some(Ok(watcher::Event::Apply(obj))) => self.cache.apply(obj),
                Some(Ok(watcher::Event::Delete(obj))) => self.cache.delete(obj),
            }
        }

        info!("Pool resource watcher stopped");
    }
}

impl std::fmt::Debug for KubePoolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePoolStore")
            .field("cached", &self.cache.objects.read().len())
            .finish()
    }
}

#[async_trait]
impl PoolStore for KubePoolStore {
    fn get(&self, name: &str) -> Option<PoolResource> {
        self.cache.get(name)
    }

    fn list(&self) -> Vec<PoolResource> {
        self.cache.list()
    }

    fn subscribe(&self) -> broadcast::Receiver<Event<PoolResource>> {
        self.cache.events.subscribe()
    }

    #[instrument(skip(self, resource), fields(name = %resource.name))]
    async fn create(&self, resource: &PoolResource) -> Result<PoolResource> {
        let created = self
            .api
            .create(&PostParams::default(), &MayastorPool::from(resource))
            .await?;
        Ok(PoolResource::try_from(&created)?)
    }

    /// Only our own finalizer is added or removed. The write carries the
    /// resource version it was computed from, so finalizers added meanwhile by
    /// someone else are never dropped.
    #[instrument(skip(self, resource), fields(name = %resource.name))]
    async fn update(&self, resource: &PoolResource) -> Result<PoolResource> {
        let wanted = resource.has_finalizer();
        let mut attempt = 1;

        loop {
            let current = self.api.get(&resource.name).await?;
            let finalizers = merge_finalizers(current.finalizers(), wanted);
            let patch = json!({
                "metadata": {
                    "resourceVersion": current.resource_version(),
                    "finalizers": finalizers,
                }
            });

            match self
                .api
                .patch(&resource.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(updated) => {
                    debug!("Updated finalizers");
                    let result = PoolResource::try_from(&updated)?;
                    self.cache.refresh(updated);
                    return Ok(result);
                }
                Err(e) if is_conflict(&e) && attempt < FINALIZER_WRITE_ATTEMPTS => {
                    debug!("Finalizer write conflicted, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[instrument(skip(self, status))]
    async fn update_status(&self, name: &str, status: &MayastorPoolStatus) -> Result<()> {
        let updated = self
            .api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&status.to_patch()))
            .await?;
        debug!("Updated status to {}", status.state);

        self.cache.refresh(updated);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::MayastorPoolSpec;
    use crate::domain::EventType;

    fn versioned(name: &str, generation: i64, version: u64) -> MayastorPool {
        let mut obj = object(name, "node-1", generation);
        obj.metadata.resource_version = Some(version.to_string());
        obj
    }

    fn object(name: &str, node: &str, generation: i64) -> MayastorPool {
        let mut obj = MayastorPool::new(
            name,
            MayastorPoolSpec {
                node: node.into(),
                disks: vec!["/dev/sdb".into()],
            },
        );
        obj.metadata.namespace = Some("mayastor".into());
        obj.metadata.generation = Some(generation);
        obj
    }

    #[test]
    fn test_prime_is_silent() {
        let cache = PoolCache::new();
        let mut rx = cache.events.subscribe();

        cache.prime(vec![object("a", "node-1", 1), object("bad", "", 1)]);

        assert!(rx.try_recv().is_err());
        assert_eq!(cache.list().len(), 1);
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn test_generation_change_is_mod() {
        let cache = PoolCache::new();
        let mut rx = cache.events.subscribe();

        cache.apply(object("a", "node-1", 1));
        cache.apply(object("a", "node-1", 1));
        cache.apply(object("a", "node-2", 2));

        assert_eq!(rx.try_recv().unwrap().event_type, EventType::New);
        let modified = rx.try_recv().unwrap();
        assert_eq!(modified.event_type, EventType::Mod);
        assert_eq!(modified.object.spec.node, "node-2");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_refresh_is_silent() {
        let cache = PoolCache::new();
        cache.apply(object("a", "node-1", 1));
        let mut rx = cache.events.subscribe();

        let mut written = object("a", "node-1", 1);
        written.metadata.finalizers = Some(vec![crate::domain::POOL_FINALIZER.into()]);
        cache.refresh(written.clone());
        cache.apply(written);

        assert!(rx.try_recv().is_err());
        assert!(cache.get("a").unwrap().has_finalizer());
    }

    #[test]
    fn test_invalid_object_skipped() {
        let cache = PoolCache::new();
        let mut rx = cache.events.subscribe();

        cache.apply(object("a", "", 1));

        assert!(rx.try_recv().is_err());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_delete() {
        let cache = PoolCache::new();
        cache.apply(object("a", "node-1", 1));
        let mut rx = cache.events.subscribe();

        cache.delete(object("a", "node-1", 1));
        cache.delete(object("a", "node-1", 1));

        assert_eq!(rx.try_recv().unwrap().event_type, EventType::Del);
        assert!(rx.try_recv().is_err());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_resync_diffs_against_cache() {
        let cache = PoolCache::new();
        cache.prime(vec![object("a", "node-1", 1), object("b", "node-1", 1)]);
        let mut rx = cache.events.subscribe();

        cache.resync(vec![object("b", "node-1", 2), object("c", "node-1", 1)]);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.event_type, e.object.name))
            .collect();
        assert_eq!(
            events,
            vec![
                (EventType::Del, "a".to_string()),
                (EventType::Mod, "b".to_string()),
                (EventType::New, "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_refresh_does_not_resurrect_deleted() {
        let cache = PoolCache::new();
        cache.apply(versioned("a", 1, 10));
        cache.delete(versioned("a", 1, 11));

        // A status write that was in flight while the object was deleted
        cache.refresh(versioned("a", 1, 10));

        assert!(cache.get("a").is_none());
        assert!(cache.list().is_empty());
    }

    #[test]
    fn test_refresh_ignores_stale_response() {
        let cache = PoolCache::new();
        cache.apply(versioned("a", 1, 10));

        let mut watched = versioned("a", 1, 12);
        watched.metadata.finalizers = Some(vec![POOL_FINALIZER.into()]);
        cache.apply(watched);

        cache.refresh(versioned("a", 1, 11));
        assert!(cache.get("a").unwrap().has_finalizer());

        let mut newer = versioned("a", 1, 13);
        newer.metadata.finalizers = Some(vec![]);
        cache.refresh(newer);
        assert!(!cache.get("a").unwrap().has_finalizer());
    }

    #[test]
    fn test_refresh_leaves_spec_changes_to_watcher() {
        let cache = PoolCache::new();
        cache.apply(versioned("a", 1, 10));
        let mut rx = cache.events.subscribe();

        let mut changed = versioned("a", 2, 11);
        changed.spec.node = "node-2".into();
        cache.refresh(changed.clone());
        assert_eq!(cache.get("a").unwrap().spec.node, "node-1");

        cache.apply(changed);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::Mod);
        assert_eq!(event.object.spec.node, "node-2");
    }

    #[test]
    fn test_merge_finalizers_keeps_foreign_entries() {
        let current = vec!["other.io/protect".to_string()];

        assert_eq!(
            merge_finalizers(&current, true),
            vec!["other.io/protect".to_string(), POOL_FINALIZER.to_string()]
        );

        let with_ours = merge_finalizers(&current, true);
        assert_eq!(merge_finalizers(&with_ours, false), current);
        assert_eq!(merge_finalizers(&with_ours, true), with_ours);
        assert!(merge_finalizers(&[], false).is_empty());
    }
}
