//! Fleet Registry
//!
//! Actual state of the storage fleet: which nodes exist and are synced, which
//! pools they host and which replicas live on those pools.
//!
//! # Components
//!
//! - [`Registry`] - In-memory state with `new`/`mod`/`del` event streams
//! - [`Node`] - Handle for running pool operations on a node
//! - [`RegistrySync`] - Poller that feeds the registry from the control plane

mod fleet;
mod node;
mod pool;
mod sync;

pub use crate::domain::PoolState;
pub use fleet::{Registry, DEFAULT_EVENT_CAPACITY};
pub use node::Node;
pub use pool::{Pool, Replica};
pub use sync::RegistrySync;
