//! Mayastor Pool Operator
//!
//! Keeps `MayastorPool` resources and the storage pools running on Mayastor
//! nodes in sync. A resource names a node and a set of disks; the operator
//! creates the pool there, reports its state back into the resource status,
//! protects the resource with a finalizer while the pool holds replicas and
//! destroys the pool when the resource goes away.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   new/mod/del    ┌──────────────┐  create/destroy  ┌────────────┐
//! │  PoolStore  │─────────────────▶│ PoolOperator │─────────────────▶│  Registry  │
//! │ (resources) │◀─────────────────│              │◀─────────────────│  (nodes)   │
//! └─────────────┘ status/finalizer └──────────────┘   new/mod/del    └────────────┘
//!                                                                         ▲
//!                                                                   RegistrySync
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Kubernetes, in-memory and REST implementations of the ports
//! - [`controller`] - The reconciler, its work queue and status projection
//! - [`crd`] - The MayastorPool custom resource
//! - [`domain`] - Ports, events and the validated pool record
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus counters
//! - [`registry`] - Nodes, pools and replicas as seen on the fleet

pub mod adapters;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use controller::PoolOperator;
pub use crd::{MayastorPool, MayastorPoolSpec, MayastorPoolStatus, PoolPhase};
pub use domain::{PoolResource, PoolStore, POOL_FINALIZER};
pub use error::{Error, Result};
pub use registry::{Registry, RegistrySync};
