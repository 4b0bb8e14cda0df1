//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the abstractions the reconciler depends on.
//! Infrastructure adapters implement these traits to provide concrete
//! implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │      PoolStore │ NodeClient │ FleetSource            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  KubePoolStore │ InMemoryPoolStore │ RestControlPlane│    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::crd::MayastorPoolStatus;
use crate::domain::events::Event;
use crate::domain::resource::PoolResource;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Runtime state of a pool as reported by its node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PoolState {
    #[default]
    Unknown,
    Online,
    Degraded,
    Faulted,
    /// The node hosting the pool is not reachable
    Offline,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolState::Unknown => write!(f, "unknown"),
            PoolState::Online => write!(f, "online"),
            PoolState::Degraded => write!(f, "degraded"),
            PoolState::Faulted => write!(f, "faulted"),
            PoolState::Offline => write!(f, "offline"),
        }
    }
}

/// Pool as reported by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub name: String,
    pub node: String,
    /// Disk URIs, e.g. `aio:///dev/sdb`
    pub disks: Vec<String>,
    pub state: PoolState,
    /// Capacity in bytes
    pub capacity: u64,
    /// Used bytes
    pub used: u64,
}

/// Node as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    /// Whether the node is reachable
    pub online: bool,
}

/// Replica as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    pub uuid: String,
    pub pool: String,
    pub node: String,
}

// =============================================================================
// Port Traits
// =============================================================================

/// Port for pool operations on storage nodes.
///
/// Calls are not retried by the caller. A failure is reported back to the
/// pool resource and left for the next event.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Create a pool on a node out of the given disks
    async fn create_pool(&self, node: &str, pool: &str, disks: &[String]) -> Result<PoolInfo>;

    /// Destroy a pool on a node
    async fn destroy_pool(&self, node: &str, pool: &str) -> Result<()>;
}

/// Port for reading the actual state of the fleet.
#[async_trait]
pub trait FleetSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    async fn list_pools(&self) -> Result<Vec<PoolInfo>>;

    async fn list_replicas(&self) -> Result<Vec<ReplicaInfo>>;
}

/// Port for the desired-state store of pool resources.
///
/// `get` and `list` read a local cache and never block. Changes made by
/// others arrive through [`PoolStore::subscribe`]; the operator's own
/// finalizer and status writes do not produce events.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Get a pool resource by name
    fn get(&self, name: &str) -> Option<PoolResource>;

    /// List all pool resources
    fn list(&self) -> Vec<PoolResource>;

    /// Subscribe to `new`/`mod`/`del` events
    fn subscribe(&self) -> broadcast::Receiver<Event<PoolResource>>;

    /// Create a pool resource
    async fn create(&self, resource: &PoolResource) -> Result<PoolResource>;

    /// Update the finalizers of a pool resource
    async fn update(&self, resource: &PoolResource) -> Result<PoolResource>;

    /// Replace the status of a pool resource
    async fn update_status(&self, name: &str, status: &MayastorPoolStatus) -> Result<()>;

    /// Delete a pool resource
    async fn delete(&self, name: &str) -> Result<()>;
}
