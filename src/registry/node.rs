//! Node handle
//!
//! A [`Node`] is a snapshot of a registered node together with the means to
//! run pool operations on it. Successful operations are folded back into the
//! registry, which emits the matching pool events.

use tracing::{debug, instrument};

use super::{Pool, Registry};
use crate::error::Result;

/// Handle to a node known to the registry
#[derive(Clone)]
pub struct Node {
    name: String,
    synced: bool,
    registry: Registry,
}

impl Node {
    pub(super) fn new(name: impl Into<String>, synced: bool, registry: Registry) -> Self {
        Self {
            name: name.into(),
            synced,
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the node is reachable and its pools have been pulled in
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Pools hosted by the node
    pub fn pools(&self) -> Vec<Pool> {
        self.registry.node_pools(&self.name)
    }

    /// Pool with the given name on this node
    pub fn pool(&self, name: &str) -> Option<Pool> {
        self.registry.node_pool(&self.name, name)
    }

    /// Create a pool on the node and register it
    #[instrument(skip(self, disks), fields(node = %self.name))]
    pub async fn create_pool(&self, name: &str, disks: &[String]) -> Result<Pool> {
        let mut info = self
            .registry
            .client()
            .create_pool(&self.name, name, disks)
            .await?;
        info.node = self.name.clone();
        debug!("Pool {} created", name);
        self.registry.apply_pool(info)
    }

    /// Destroy a pool on the node and unregister it
    #[instrument(skip(self), fields(node = %self.name))]
    pub async fn destroy_pool(&self, name: &str) -> Result<()> {
        self.registry
            .client()
            .destroy_pool(&self.name, name)
            .await?;
        debug!("Pool {} destroyed", name);
        self.registry.remove_pool(&self.name, name);
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("synced", &self.synced)
            .finish()
    }
}
