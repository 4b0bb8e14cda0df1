//! Fleet Registry
//!
//! In-memory view of the nodes, pools and replicas of the storage fleet.
//! Queries are synchronous reads of the current state. Every mutation emits
//! `new`/`mod`/`del` events on per-entity broadcast channels; events are sent
//! while the write lock is held so subscribers observe them in mutation order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{Node, Pool, Replica};
use crate::domain::{Event, NodeClient, PoolInfo, PoolState, ReplicaInfo};
use crate::error::{Error, Result};

/// Default capacity of each event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct NodeEntry {
    synced: bool,
    pools: BTreeMap<String, Pool>,
}

struct Inner {
    nodes: RwLock<BTreeMap<String, NodeEntry>>,
    client: Arc<dyn NodeClient>,
    node_events: broadcast::Sender<Event<Node>>,
    pool_events: broadcast::Sender<Event<Pool>>,
    replica_events: broadcast::Sender<Event<Replica>>,
}

/// Shared registry of the fleet
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Create an empty registry running pool operations through `client`
    pub fn new(client: Arc<dyn NodeClient>) -> Self {
        Self::with_capacity(client, DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty registry with the given event channel capacity
    pub fn with_capacity(client: Arc<dyn NodeClient>, capacity: usize) -> Self {
        let (node_events, _) = broadcast::channel(capacity);
        let (pool_events, _) = broadcast::channel(capacity);
        let (replica_events, _) = broadcast::channel(capacity);

        Self {
            inner: Arc::new(Inner {
                nodes: RwLock::new(BTreeMap::new()),
                client,
                node_events,
                pool_events,
                replica_events,
            }),
        }
    }

    pub(super) fn client(&self) -> &Arc<dyn NodeClient> {
        &self.inner.client
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn subscribe_nodes(&self) -> broadcast::Receiver<Event<Node>> {
        self.inner.node_events.subscribe()
    }

    pub fn subscribe_pools(&self) -> broadcast::Receiver<Event<Pool>> {
        self.inner.pool_events.subscribe()
    }

    pub fn subscribe_replicas(&self) -> broadcast::Receiver<Event<Replica>> {
        self.inner.replica_events.subscribe()
    }

    // A send only fails when nobody listens, which is fine.
    fn emit_node(&self, event: Event<Node>) {
        let _ = self.inner.node_events.send(event);
    }

    fn emit_pool(&self, event: Event<Pool>) {
        let _ = self.inner.pool_events.send(event);
    }

    fn emit_replica(&self, event: Event<Replica>) {
        let _ = self.inner.replica_events.send(event);
    }

    fn handle(&self, name: &str, entry: &NodeEntry) -> Node {
        Node::new(name, entry.synced, self.clone())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Get a node by name
    pub fn get_node(&self, name: &str) -> Option<Node> {
        let nodes = self.inner.nodes.read();
        nodes.get(name).map(|entry| self.handle(name, entry))
    }

    /// All registered nodes
    pub fn nodes(&self) -> Vec<Node> {
        let nodes = self.inner.nodes.read();
        nodes
            .iter()
            .map(|(name, entry)| self.handle(name, entry))
            .collect()
    }

    /// Find a pool by name on any node
    pub fn get_pool(&self, name: &str) -> Option<Pool> {
        let nodes = self.inner.nodes.read();
        nodes
            .values()
            .find_map(|entry| entry.pools.get(name))
            .cloned()
    }

    /// All pools across the fleet
    pub fn pools(&self) -> Vec<Pool> {
        let nodes = self.inner.nodes.read();
        nodes
            .values()
            .flat_map(|entry| entry.pools.values().cloned())
            .collect()
    }

    pub(super) fn node_pools(&self, node: &str) -> Vec<Pool> {
        let nodes = self.inner.nodes.read();
        nodes
            .get(node)
            .map(|entry| entry.pools.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn node_pool(&self, node: &str, pool: &str) -> Option<Pool> {
        let nodes = self.inner.nodes.read();
        nodes.get(node).and_then(|entry| entry.pools.get(pool)).cloned()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Register a node. An already known node is left alone.
    pub fn add_node(&self, name: &str) -> Node {
        let mut nodes = self.inner.nodes.write();
        if let Some(entry) = nodes.get(name) {
            return self.handle(name, entry);
        }

        let entry = NodeEntry::default();
        let node = self.handle(name, &entry);
        nodes.insert(name.to_string(), entry);
        info!("Node {} registered", name);
        self.emit_node(Event::new(node.clone()));
        node
    }

    /// Change the synced flag of a node.
    ///
    /// Losing sync marks every pool on the node `Offline`.
    pub fn set_node_synced(&self, name: &str, synced: bool) -> Result<()> {
        let mut nodes = self.inner.nodes.write();
        let entry = nodes
            .get_mut(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;

        if entry.synced == synced {
            return Ok(());
        }
        entry.synced = synced;

        if !synced {
            for pool in entry.pools.values_mut() {
                if pool.state != PoolState::Offline {
                    pool.state = PoolState::Offline;
                    self.emit_pool(Event::modified(pool.clone()));
                }
            }
        }

        info!("Node {} is {}", name, if synced { "synced" } else { "unsynced" });
        let node = self.handle(name, entry);
        self.emit_node(Event::modified(node));
        Ok(())
    }

    /// Unregister a node together with its pools and replicas
    pub fn remove_node(&self, name: &str) -> Option<Node> {
        let mut nodes = self.inner.nodes.write();
        let entry = nodes.remove(name)?;

        for pool in entry.pools.values() {
            self.release_pool(pool);
        }

        info!("Node {} removed", name);
        let node = self.handle(name, &entry);
        self.emit_node(Event::deleted(node.clone()));
        Some(node)
    }

    // =========================================================================
    // Pools
    // =========================================================================

    /// Add or refresh a pool reported by its node
    pub fn apply_pool(&self, info: PoolInfo) -> Result<Pool> {
        let mut nodes = self.inner.nodes.write();
        let entry = nodes
            .get_mut(&info.node)
            .ok_or_else(|| Error::NodeNotFound(info.node.clone()))?;

        if let Some(pool) = entry.pools.get_mut(&info.name) {
            if pool.refresh(&info) {
                debug!("Pool {} on node {} changed", info.name, info.node);
                self.emit_pool(Event::modified(pool.clone()));
            }
            return Ok(pool.clone());
        }

        let pool = Pool::from(info);
        debug!("Pool {} on node {} added", pool.name, pool.node);
        entry.pools.insert(pool.name.clone(), pool.clone());
        self.emit_pool(Event::new(pool.clone()));
        Ok(pool)
    }

    /// Remove a pool, releasing its replicas first
    pub fn remove_pool(&self, node: &str, name: &str) -> Option<Pool> {
        let mut nodes = self.inner.nodes.write();
        let pool = nodes.get_mut(node)?.pools.remove(name)?;
        self.release_pool(&pool);
        Some(pool)
    }

    fn release_pool(&self, pool: &Pool) {
        for uuid in &pool.replicas {
            self.emit_replica(Event::deleted(Replica {
                uuid: uuid.clone(),
                pool: pool.name.clone(),
                node: pool.node.clone(),
            }));
        }
        debug!("Pool {} on node {} removed", pool.name, pool.node);
        self.emit_pool(Event::deleted(pool.clone()));
    }

    /// Make the pools of a node match a full report
    pub fn sync_pools(&self, node: &str, pools: Vec<PoolInfo>) -> Result<()> {
        let reported: BTreeSet<String> = pools.iter().map(|p| p.name.clone()).collect();

        let stale: Vec<String> = self
            .node_pools(node)
            .into_iter()
            .filter(|p| !reported.contains(&p.name))
            .map(|p| p.name)
            .collect();
        for name in stale {
            self.remove_pool(node, &name);
        }

        for mut info in pools {
            info.node = node.to_string();
            self.apply_pool(info)?;
        }
        Ok(())
    }

    // =========================================================================
    // Replicas
    // =========================================================================

    /// Add a replica to its pool. Returns false if it was already known.
    pub fn add_replica(&self, info: ReplicaInfo) -> Result<bool> {
        let mut nodes = self.inner.nodes.write();
        let pool = nodes
            .get_mut(&info.node)
            .ok_or_else(|| Error::NodeNotFound(info.node.clone()))?
            .pools
            .get_mut(&info.pool)
            .ok_or_else(|| Error::Internal(format!("pool {} is not registered", info.pool)))?;

        if !pool.replicas.insert(info.uuid.clone()) {
            return Ok(false);
        }
        self.emit_replica(Event::new(Replica::from(info)));
        Ok(true)
    }

    /// Remove a replica from its pool. Returns false if it was not known.
    pub fn remove_replica(&self, node: &str, pool: &str, uuid: &str) -> bool {
        let mut nodes = self.inner.nodes.write();
        let removed = nodes
            .get_mut(node)
            .and_then(|entry| entry.pools.get_mut(pool))
            .map(|p| p.replicas.remove(uuid))
            .unwrap_or(false);

        if removed {
            self.emit_replica(Event::deleted(Replica {
                uuid: uuid.to_string(),
                pool: pool.to_string(),
                node: node.to_string(),
            }));
        }
        removed
    }

    /// Make the replicas of a node's pools match a full report.
    ///
    /// Replicas on pools the registry does not know are skipped.
    pub fn sync_replicas(&self, node: &str, replicas: Vec<ReplicaInfo>) {
        for pool in self.node_pools(node) {
            let reported: BTreeSet<&str> = replicas
                .iter()
                .filter(|r| r.pool == pool.name)
                .map(|r| r.uuid.as_str())
                .collect();
            for uuid in pool.replicas.iter().filter(|u| !reported.contains(u.as_str())) {
                self.remove_replica(node, &pool.name, uuid);
            }
        }

        for mut info in replicas {
            info.node = node.to_string();
            if let Err(e) = self.add_replica(info) {
                debug!("Skipping replica: {}", e);
            }
        }
    }
}
