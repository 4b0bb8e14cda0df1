//! MayastorPool Custom Resource Definition
//!
//! One resource per storage pool. The spec pins the pool to a node and a set
//! of disks; the status mirrors what the pool operator last observed.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

// =============================================================================
// MayastorPool CRD
// =============================================================================

/// MayastorPool declares a storage pool on a Mayastor node
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "MayastorPool",
    plural = "mayastorpools",
    shortname = "msp",
    status = "MayastorPoolStatus",
    namespaced,
    printcolumn = r#"{"name":"Node", "type":"string", "description":"Node where the storage pool is located", "jsonPath":".spec.node"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "description":"State of the storage pool", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Capacity", "type":"integer", "format":"int64", "description":"Capacity of the pool in bytes", "jsonPath":".status.capacity"}"#,
    printcolumn = r#"{"name":"Used", "type":"integer", "format":"int64", "description":"How many bytes are used in the pool", "jsonPath":".status.used"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MayastorPoolSpec {
    /// Name of the k8s node where the storage pool is located
    #[serde(default)]
    pub node: String,

    /// Disk devices (paths or URIs) that should be used for the pool
    #[serde(default)]
    pub disks: Vec<String>,
}

/// MayastorPool status, owned by the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MayastorPoolStatus {
    /// Pool state
    #[serde(default)]
    pub state: PoolPhase,

    /// Reason for the state, empty when there is nothing to say
    #[serde(default)]
    pub reason: String,

    /// Disk URIs as reported by the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disks: Option<Vec<String>>,

    /// Capacity of the pool in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,

    /// Used bytes in the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<u64>,
}

impl MayastorPoolStatus {
    /// Merge patch body for the status subresource.
    ///
    /// Absent optional fields are sent as `null` so that stale values left by
    /// an earlier status are removed.
    pub fn to_patch(&self) -> serde_json::Value {
        json!({
            "status": {
                "state": self.state,
                "reason": self.reason,
                "disks": self.disks,
                "capacity": self.capacity,
                "used": self.used,
            }
        })
    }
}

/// Pool state as published in the resource status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PoolPhase {
    #[default]
    Unknown,
    Pending,
    Online,
    Degraded,
    Faulted,
    Offline,
    Error,
}

impl std::fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolPhase::Unknown => write!(f, "unknown"),
            PoolPhase::Pending => write!(f, "pending"),
            PoolPhase::Online => write!(f, "online"),
            PoolPhase::Degraded => write!(f, "degraded"),
            PoolPhase::Faulted => write!(f, "faulted"),
            PoolPhase::Offline => write!(f, "offline"),
            PoolPhase::Error => write!(f, "error"),
        }
    }
}
