//! Desired-state pool record
//!
//! [`PoolResource`] is the validated form of a `MayastorPool` object. Only
//! records that pass [`PoolResource::new`] enter the reconciliation pipeline.

use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{MayastorPool, MayastorPoolSpec, MayastorPoolStatus};
use crate::error::ValidationError;

/// Finalizer held on a record while its pool has replicas
pub const POOL_FINALIZER: &str = "finalizer.mayastor.openebs.io";

/// Placement of a pool. Set once at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub node: String,
    /// Sorted, so that two specs listing the same disks compare equal
    pub disks: Vec<String>,
}

/// A validated desired-state record for one pool
#[derive(Debug, Clone, PartialEq)]
pub struct PoolResource {
    pub name: String,
    pub namespace: String,
    pub spec: PoolSpec,
    pub status: MayastorPoolStatus,
    pub finalizers: Vec<String>,
}

impl PoolResource {
    /// Create a record, rejecting it when the name or node is missing
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        node: impl Into<String>,
        disks: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let node = node.into();

        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if node.is_empty() {
            return Err(ValidationError::MissingNode(name));
        }

        let mut disks: Vec<String> = disks.into_iter().map(Into::into).collect();
        disks.sort();

        Ok(Self {
            name,
            namespace: namespace.into(),
            spec: PoolSpec { node, disks },
            status: MayastorPoolStatus::default(),
            finalizers: Vec::new(),
        })
    }

    /// Replace the status the record was built with
    pub fn with_status(mut self, status: MayastorPoolStatus) -> Self {
        self.status = status;
        self
    }

    /// Check whether the pool finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers.iter().any(|f| f == POOL_FINALIZER)
    }

    /// Copy of the record with the pool finalizer present
    pub fn with_finalizer(&self) -> Self {
        let mut resource = self.clone();
        if !resource.has_finalizer() {
            resource.finalizers.push(POOL_FINALIZER.to_string());
        }
        resource
    }

    /// Copy of the record with the pool finalizer removed
    pub fn without_finalizer(&self) -> Self {
        let mut resource = self.clone();
        resource.finalizers.retain(|f| f != POOL_FINALIZER);
        resource
    }
}

impl TryFrom<&MayastorPool> for PoolResource {
    type Error = ValidationError;

    fn try_from(pool: &MayastorPool) -> Result<Self, Self::Error> {
        let mut resource = PoolResource::new(
            pool.name_any(),
            pool.namespace().unwrap_or_default(),
            pool.spec.node.clone(),
            pool.spec.disks.iter().cloned(),
        )?;
        resource.status = pool.status.clone().unwrap_or_default();
        resource.finalizers = pool.finalizers().to_vec();
        Ok(resource)
    }
}

impl From<&PoolResource> for MayastorPool {
    fn from(resource: &PoolResource) -> Self {
        MayastorPool {
            metadata: ObjectMeta {
                name: Some(resource.name.clone()),
                namespace: Some(resource.namespace.clone()),
                finalizers: if resource.finalizers.is_empty() {
                    None
                } else {
                    Some(resource.finalizers.clone())
                },
                ..Default::default()
            },
            spec: MayastorPoolSpec {
                node: resource.spec.node.clone(),
                disks: resource.spec.disks.clone(),
            },
            status: Some(resource.status.clone()),
        }
    }
}
