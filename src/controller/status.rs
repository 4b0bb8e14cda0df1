//! Status Projection
//!
//! Pure functions computing the status a pool resource should carry, and the
//! publisher that writes it back to the store.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::WorkQueue;
use crate::crd::{MayastorPoolStatus, PoolPhase};
use crate::domain::{PoolState, PoolStore};
use crate::metrics;
use crate::registry::Pool;

/// Reason published while a create call is in flight
pub const CREATING_REASON: &str = "Creating the pool";

/// Reason published when the target node is missing or not synced
pub fn node_unavailable_reason(node: &str) -> String {
    format!("mayastor does not run on node \"{}\"", node)
}

/// Pending status with a reason and no pool details
pub fn pending(reason: impl Into<String>) -> MayastorPoolStatus {
    MayastorPoolStatus {
        state: PoolPhase::Pending,
        reason: reason.into(),
        ..Default::default()
    }
}

pub fn creating() -> MayastorPoolStatus {
    pending(CREATING_REASON)
}

/// Error status carrying the failure message
pub fn failed(err: &impl std::fmt::Display) -> MayastorPoolStatus {
    MayastorPoolStatus {
        state: PoolPhase::Error,
        reason: format!("Error: {}", err),
        ..Default::default()
    }
}

/// Status mirroring a pool in the registry
pub fn from_pool(pool: &Pool) -> MayastorPoolStatus {
    let (state, reason) = match pool.state {
        PoolState::Unknown => (PoolPhase::Unknown, String::new()),
        PoolState::Online => (PoolPhase::Online, String::new()),
        PoolState::Degraded => (PoolPhase::Degraded, String::new()),
        PoolState::Faulted => (PoolPhase::Faulted, String::new()),
        PoolState::Offline => (PoolPhase::Offline, node_unavailable_reason(&pool.node)),
    };

    MayastorPoolStatus {
        state,
        reason,
        disks: Some(pool.disks.clone()),
        capacity: Some(pool.capacity),
        used: Some(pool.used),
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Writes statuses to the store in the background.
///
/// Writes for one resource keep their order. A status equal to the cached
/// one is skipped. Failed writes are logged and dropped.
#[derive(Clone)]
pub struct StatusPublisher {
    store: Arc<dyn PoolStore>,
    queue: WorkQueue,
}

impl StatusPublisher {
    pub fn new(store: Arc<dyn PoolStore>) -> Self {
        Self {
            store,
            queue: WorkQueue::new(),
        }
    }

    pub fn publish(&self, name: &str, status: MayastorPoolStatus) {
        let store = Arc::clone(&self.store);
        let name = name.to_string();

        // Completion is not awaited
        let _ = self.queue.push(&name.clone(), async move {
            match store.get(&name) {
                None => {
                    debug!("Pool resource {} is gone, dropping status", name);
                    return;
                }
                Some(resource) if resource.status == status => {
                    trace!("Status of {} unchanged", name);
                    return;
                }
                Some(_) => {}
            }

            match store.update_status(&name, &status).await {
                Ok(()) => debug!("Status of {} set to {} ({})", name, status.state, status.reason),
                Err(e) => {
                    warn!("Failed to update status of {}: {}", name, e);
                    metrics::record_store_write_failure("status");
                }
            }
        });
    }

    /// Wait until every queued write has been attempted
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryPoolStore;
    use crate::domain::PoolResource;
    use std::collections::BTreeSet;

    fn pool(state: PoolState) -> Pool {
        Pool {
            name: "pool".into(),
            node: "node-1".into(),
            disks: vec!["aio:///dev/sdb".into()],
            state,
            capacity: 1000,
            used: 10,
            replicas: BTreeSet::new(),
        }
    }

    #[test]
    fn test_pending_has_no_details() {
        let status = pending(node_unavailable_reason("node-1"));
        assert_eq!(status.state, PoolPhase::Pending);
        assert_eq!(status.reason, "mayastor does not run on node \"node-1\"");
        assert!(status.disks.is_none());
        assert!(status.capacity.is_none());
        assert!(status.used.is_none());
    }

    #[test]
    fn test_failed() {
        let status = failed(&"disk busy");
        assert_eq!(status.state, PoolPhase::Error);
        assert_eq!(status.reason, "Error: disk busy");
    }

    #[test]
    fn test_from_online_pool() {
        let status = from_pool(&pool(PoolState::Online));
        assert_eq!(status.state, PoolPhase::Online);
        assert_eq!(status.reason, "");
        assert_eq!(status.disks, Some(vec!["aio:///dev/sdb".to_string()]));
        assert_eq!(status.capacity, Some(1000));
        assert_eq!(status.used, Some(10));
    }

    #[test]
    fn test_from_offline_pool() {
        let status = from_pool(&pool(PoolState::Offline));
        assert_eq!(status.state, PoolPhase::Offline);
        assert_eq!(status.reason, "mayastor does not run on node \"node-1\"");
    }

    #[tokio::test]
    async fn test_publisher_skips_unchanged() {
        let store = Arc::new(InMemoryPoolStore::new());
        store.insert(PoolResource::new("pool", "ns", "node-1", ["/dev/sdb"]).unwrap());
        let publisher = StatusPublisher::new(store.clone());

        publisher.publish("pool", creating());
        publisher.publish("pool", creating());
        publisher.publish("pool", failed(&"boom"));
        publisher.wait_idle().await;

        assert_eq!(
            store.status_writes("pool"),
            vec![creating(), failed(&"boom")]
        );
    }

    #[tokio::test]
    async fn test_publisher_swallows_failures() {
        let store = Arc::new(InMemoryPoolStore::new());
        store.insert(PoolResource::new("pool", "ns", "node-1", ["/dev/sdb"]).unwrap());
        store.fail_status_writes(true);
        let publisher = StatusPublisher::new(store.clone());

        publisher.publish("pool", creating());
        publisher.wait_idle().await;

        assert!(store.status_writes("pool").is_empty());
    }
}
