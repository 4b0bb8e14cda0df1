//! Registry Sync
//!
//! Periodically pulls nodes, pools and replicas from a [`FleetSource`] and
//! folds them into the [`Registry`]. The registry turns every difference into
//! events, so the poller itself never talks to the reconciler.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::Registry;
use crate::domain::{FleetSource, NodeInfo, PoolInfo, ReplicaInfo};
use crate::error::Result;

/// Poller feeding the registry
pub struct RegistrySync {
    registry: Registry,
    source: Arc<dyn FleetSource>,
    period: Duration,
}

impl RegistrySync {
    pub fn new(registry: Registry, source: Arc<dyn FleetSource>, period: Duration) -> Self {
        Self {
            registry,
            source,
            period,
        }
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Registry sync started, polling every {:?}", self.period);

        loop {
            if let Err(e) = self.poll().await {
                warn!("Failed to poll the control plane: {}", e);
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.period) => {}
            }
        }

        info!("Registry sync stopped");
    }

    /// Fetch the fleet once and apply it.
    ///
    /// Nothing is applied unless all three listings succeed.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<()> {
        let nodes = self.source.list_nodes().await?;
        let pools = self.source.list_pools().await?;
        let replicas = self.source.list_replicas().await?;

        self.apply(nodes, pools, replicas);
        Ok(())
    }

    fn apply(&self, nodes: Vec<NodeInfo>, pools: Vec<PoolInfo>, replicas: Vec<ReplicaInfo>) {
        let reported: BTreeSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();

        for node in self.registry.nodes() {
            if !reported.contains(node.name()) {
                self.registry.remove_node(node.name());
            }
        }

        for node in &nodes {
            self.registry.add_node(&node.name);

            if !node.online {
                // Keep the pools around, marked offline, until the node returns
                if let Err(e) = self.registry.set_node_synced(&node.name, false) {
                    debug!("Node {} vanished during sync: {}", node.name, e);
                }
                continue;
            }

            let node_pools = pools
                .iter()
                .filter(|p| p.node == node.name)
                .cloned()
                .collect();
            let node_replicas = replicas
                .iter()
                .filter(|r| r.node == node.name)
                .cloned()
                .collect();

            let synced = self
                .registry
                .sync_pools(&node.name, node_pools)
                .map(|_| self.registry.sync_replicas(&node.name, node_replicas))
                .and_then(|_| self.registry.set_node_synced(&node.name, true));
            if let Err(e) = synced {
                debug!("Node {} vanished during sync: {}", node.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, NodeClient, PoolState};
    use crate::error::Error;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct NoopClient;

    #[async_trait]
    impl NodeClient for NoopClient {
        async fn create_pool(&self, _node: &str, _pool: &str, _disks: &[String]) -> Result<PoolInfo> {
            Err(Error::Internal("not used".into()))
        }

        async fn destroy_pool(&self, _node: &str, _pool: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSource {
        nodes: Mutex<Vec<NodeInfo>>,
        pools: Mutex<Vec<PoolInfo>>,
        replicas: Mutex<Vec<ReplicaInfo>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl FleetSource for FakeSource {
        async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
            if *self.fail.lock() {
                return Err(Error::Internal("control plane down".into()));
            }
            Ok(self.nodes.lock().clone())
        }

        async fn list_pools(&self) -> Result<Vec<PoolInfo>> {
            Ok(self.pools.lock().clone())
        }

        async fn list_replicas(&self) -> Result<Vec<ReplicaInfo>> {
            Ok(self.replicas.lock().clone())
        }
    }

    fn node(name: &str, online: bool) -> NodeInfo {
        NodeInfo {
            name: name.into(),
            online,
        }
    }

    fn pool(node: &str, name: &str) -> PoolInfo {
        PoolInfo {
            name: name.into(),
            node: node.into(),
            disks: vec!["aio:///dev/sdb".into()],
            state: PoolState::Online,
            capacity: 1024,
            used: 0,
        }
    }

    fn setup() -> (Registry, Arc<FakeSource>, RegistrySync) {
        let registry = Registry::new(Arc::new(NoopClient));
        let source = Arc::new(FakeSource::default());
        let sync = RegistrySync::new(registry.clone(), source.clone(), Duration::from_secs(1));
        (registry, source, sync)
    }

    #[tokio::test]
    async fn test_new_node_is_synced_after_its_pools() {
        let (registry, source, sync) = setup();
        *source.nodes.lock() = vec![node("node-1", true)];
        *source.pools.lock() = vec![pool("node-1", "pool-1")];
        *source.replicas.lock() = vec![ReplicaInfo {
            uuid: "r1".into(),
            pool: "pool-1".into(),
            node: "node-1".into(),
        }];

        let mut nodes = registry.subscribe_nodes();
        let mut pools = registry.subscribe_pools();
        sync.poll().await.unwrap();

        let added = nodes.try_recv().unwrap();
        assert_eq!(added.event_type, EventType::New);
        assert!(!added.object.is_synced());
        assert_eq!(pools.try_recv().unwrap().event_type, EventType::New);
        let synced = nodes.try_recv().unwrap();
        assert_eq!(synced.event_type, EventType::Mod);
        assert!(synced.object.is_synced());

        assert_eq!(registry.get_pool("pool-1").unwrap().replica_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_node_keeps_pools_offline() {
        let (registry, source, sync) = setup();
        *source.nodes.lock() = vec![node("node-1", true)];
        *source.pools.lock() = vec![pool("node-1", "pool-1")];
        sync.poll().await.unwrap();

        *source.nodes.lock() = vec![node("node-1", false)];
        source.pools.lock().clear();
        sync.poll().await.unwrap();

        let pool = registry.get_pool("pool-1").unwrap();
        assert_eq!(pool.state, PoolState::Offline);
        assert!(!registry.get_node("node-1").unwrap().is_synced());
    }

    #[tokio::test]
    async fn test_missing_node_is_removed() {
        let (registry, source, sync) = setup();
        *source.nodes.lock() = vec![node("node-1", true)];
        *source.pools.lock() = vec![pool("node-1", "pool-1")];
        sync.poll().await.unwrap();

        source.nodes.lock().clear();
        source.pools.lock().clear();
        sync.poll().await.unwrap();

        assert!(registry.get_node("node-1").is_none());
        assert!(registry.get_pool("pool-1").is_none());
    }

    #[tokio::test]
    async fn test_failed_poll_leaves_registry_alone() {
        let (registry, source, sync) = setup();
        *source.nodes.lock() = vec![node("node-1", true)];
        sync.poll().await.unwrap();

        *source.fail.lock() = true;
        assert!(sync.poll().await.is_err());
        assert!(registry.get_node("node-1").unwrap().is_synced());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_registry, _source, sync) = setup();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sync.run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
