//! Domain Layer
//!
//! This module contains the core domain types of the pool operator.
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for the store, nodes and fleet
//! - **Events** (`events.rs`) - `new`/`mod`/`del` change events
//! - **Resource** (`resource.rs`) - Validated desired-state pool records
//!
//! # Usage
//!
//! ```ignore
//! use pool_operator::domain::{PoolResource, PoolStore};
//!
//! async fn protect<S: PoolStore>(store: &S, name: &str) -> Result<()> {
//!     if let Some(resource) = store.get(name) {
//!         store.update(&resource.with_finalizer()).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod events;
pub mod ports;
pub mod resource;

// Re-export commonly used types
pub use events::{Event, EventType};
pub use ports::{
    // Port traits
    FleetSource,
    NodeClient,
    // Value objects
    NodeInfo,
    PoolInfo,
    PoolState,
    PoolStore,
    ReplicaInfo,
};
pub use resource::{PoolResource, PoolSpec, POOL_FINALIZER};
