//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │          PoolStore │ NodeClient │ FleetSource               │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ KubePoolStore │ InMemoryPoolStore │ RestControlPlane       │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pool_operator::adapters::{KubePoolStore, RestConfig, RestControlPlane};
//!
//! let store = KubePoolStore::new(client, "mayastor");
//! store.start(shutdown.clone()).await?;
//!
//! let rest = Arc::new(RestControlPlane::new(RestConfig::default())?);
//! let pools = rest.list_pools().await?;
//! ```

mod kubernetes;
mod memory;
mod rest;

pub use kubernetes::KubePoolStore;
pub use memory::InMemoryPoolStore;
pub use rest::{RestConfig, RestControlPlane};
