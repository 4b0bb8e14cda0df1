//! Custom Resource Definitions
//!
//! This module contains the CRD definitions used by the operator.

mod mayastor_pool;

pub use mayastor_pool::{MayastorPool, MayastorPoolSpec, MayastorPoolStatus, PoolPhase};
