//! Pool and replica entities

use std::collections::BTreeSet;

use crate::domain::{PoolInfo, PoolState, ReplicaInfo};

/// A pool as currently known to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    /// Name of the node hosting the pool
    pub node: String,
    pub disks: Vec<String>,
    pub state: PoolState,
    pub capacity: u64,
    pub used: u64,
    /// UUIDs of the replicas on this pool
    pub replicas: BTreeSet<String>,
}

impl Pool {
    /// Number of replicas on the pool
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Whether the pool holds data
    pub fn in_use(&self) -> bool {
        !self.replicas.is_empty()
    }

    /// Fold a fresh report into the pool. Returns true if anything changed.
    pub(crate) fn refresh(&mut self, info: &PoolInfo) -> bool {
        let changed = self.disks != info.disks
            || self.state != info.state
            || self.capacity != info.capacity
            || self.used != info.used;
        if changed {
            self.disks = info.disks.clone();
            self.state = info.state;
            self.capacity = info.capacity;
            self.used = info.used;
        }
        changed
    }
}

impl From<PoolInfo> for Pool {
    fn from(info: PoolInfo) -> Self {
        Self {
            name: info.name,
            node: info.node,
            disks: info.disks,
            state: info.state,
            capacity: info.capacity,
            used: info.used,
            replicas: BTreeSet::new(),
        }
    }
}

/// A replica living on a pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Replica {
    pub uuid: String,
    pub pool: String,
    pub node: String,
}

impl From<ReplicaInfo> for Replica {
    fn from(info: ReplicaInfo) -> Self {
        Self {
            uuid: info.uuid,
            pool: info.pool,
            node: info.node,
        }
    }
}
