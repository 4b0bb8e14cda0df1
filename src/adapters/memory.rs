//! In-Memory Pool Store
//!
//! A `PoolStore` kept entirely in memory. Used by tests and for running the
//! operator without a cluster. `insert`, `modify` and `remove` stand in for
//! changes made by users and emit events; the port's `update` and
//! `update_status` do not, the same way status and finalizer writes do not
//! bump the generation of a Kubernetes object.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::crd::MayastorPoolStatus;
use crate::domain::{Event, PoolResource, PoolStore};
use crate::error::{Error, Result};

/// In-memory desired-state store
pub struct InMemoryPoolStore {
    records: RwLock<BTreeMap<String, PoolResource>>,
    events: broadcast::Sender<Event<PoolResource>>,
    status_writes: RwLock<Vec<(String, MayastorPoolStatus)>>,
    update_calls: RwLock<Vec<PoolResource>>,
    fail_status_writes: AtomicBool,
}

impl Default for InMemoryPoolStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
            status_writes: RwLock::new(Vec::new()),
            update_calls: RwLock::new(Vec::new()),
            fail_status_writes: AtomicBool::new(false),
        }
    }

    /// Store a record and announce it as `new`
    pub fn insert(&self, resource: PoolResource) {
        let mut records = self.records.write();
        records.insert(resource.name.clone(), resource.clone());
        let _ = self.events.send(Event::new(resource));
    }

    /// Replace a record and announce it as `mod`
    pub fn modify(&self, resource: PoolResource) {
        let mut records = self.records.write();
        records.insert(resource.name.clone(), resource.clone());
        let _ = self.events.send(Event::modified(resource));
    }

    /// Drop a record and announce it as `del`
    pub fn remove(&self, name: &str) -> Option<PoolResource> {
        let mut records = self.records.write();
        let resource = records.remove(name)?;
        let _ = self.events.send(Event::deleted(resource.clone()));
        Some(resource)
    }

    /// Make every following `update_status` call fail
    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }

    /// Statuses written for a record, oldest first
    pub fn status_writes(&self, name: &str) -> Vec<MayastorPoolStatus> {
        self.status_writes
            .read()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, status)| status.clone())
            .collect()
    }

    /// Every record passed to `update`, oldest first
    pub fn update_calls(&self) -> Vec<PoolResource> {
        self.update_calls.read().clone()
    }
}

#[async_trait]
impl PoolStore for InMemoryPoolStore {
    fn get(&self, name: &str) -> Option<PoolResource> {
        self.records.read().get(name).cloned()
    }

    fn list(&self) -> Vec<PoolResource> {
        self.records.read().values().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<Event<PoolResource>> {
        self.events.subscribe()
    }

    async fn create(&self, resource: &PoolResource) -> Result<PoolResource> {
        if self.get(&resource.name).is_some() {
            return Err(Error::Internal(format!(
                "pool resource {} already exists",
                resource.name
            )));
        }
        self.insert(resource.clone());
        Ok(resource.clone())
    }

    async fn update(&self, resource: &PoolResource) -> Result<PoolResource> {
        self.update_calls.write().push(resource.clone());

        let mut records = self.records.write();
        let stored = records
            .get_mut(&resource.name)
            .ok_or_else(|| Error::ResourceNotFound(resource.name.clone()))?;
        stored.finalizers = resource.finalizers.clone();
        Ok(stored.clone())
    }

    async fn update_status(&self, name: &str, status: &MayastorPoolStatus) -> Result<()> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal(format!("status write for {} rejected", name)));
        }

        let mut records = self.records.write();
        let stored = records
            .get_mut(name)
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))?;
        stored.status = status.clone();
        self.status_writes
            .write()
            .push((name.to_string(), status.clone()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PoolPhase;
    use crate::domain::EventType;

    fn resource(name: &str) -> PoolResource {
        PoolResource::new(name, "mayastor", "node-1", ["/dev/sdb"]).unwrap()
    }

    #[tokio::test]
    async fn test_user_changes_emit_events() {
        let store = InMemoryPoolStore::new();
        let mut rx = store.subscribe();

        store.insert(resource("a"));
        store.modify(resource("a"));
        store.remove("a");

        assert_eq!(rx.recv().await.unwrap().event_type, EventType::New);
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Mod);
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Del);
    }

    #[tokio::test]
    async fn test_operator_writes_are_silent() {
        let store = InMemoryPoolStore::new();
        store.insert(resource("a"));
        let mut rx = store.subscribe();

        store.update(&resource("a").with_finalizer()).await.unwrap();
        let status = MayastorPoolStatus {
            state: PoolPhase::Online,
            ..Default::default()
        };
        store.update_status("a", &status).await.unwrap();

        assert!(rx.try_recv().is_err());
        let stored = store.get("a").unwrap();
        assert!(stored.has_finalizer());
        assert_eq!(stored.status.state, PoolPhase::Online);
        assert_eq!(store.status_writes("a"), vec![status]);
        assert_eq!(store.update_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_status_writes() {
        let store = InMemoryPoolStore::new();
        store.insert(resource("a"));
        store.fail_status_writes(true);

        let result = store
            .update_status("a", &MayastorPoolStatus::default())
            .await;
        assert!(result.is_err());
        assert!(store.status_writes("a").is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let store = InMemoryPoolStore::new();
        let err = store.update(&resource("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
