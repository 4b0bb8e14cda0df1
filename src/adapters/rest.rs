//! Control Plane REST Adapter
//!
//! Implements the `NodeClient` and `FleetSource` ports on top of the Mayastor
//! control-plane REST API (v0).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{FleetSource, NodeClient, NodeInfo, PoolInfo, PoolState, ReplicaInfo};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST adapter
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL of the control-plane REST service
    pub url: String,

    /// Timeout for every request
    pub request_timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            url: "http://rest.mayastor.svc.cluster.local:8080".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum RestNodeState {
    #[default]
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestNode {
    id: String,
    #[serde(default)]
    state: RestNodeState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum RestPoolState {
    #[default]
    Unknown,
    Online,
    Degraded,
    Faulted,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestPool {
    node: String,
    id: String,
    #[serde(default)]
    disks: Vec<String>,
    #[serde(default)]
    state: RestPoolState,
    #[serde(default)]
    capacity: u64,
    #[serde(default)]
    used: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestReplica {
    node: String,
    uuid: String,
    pool: String,
}

#[derive(Debug, Serialize)]
struct CreatePoolBody<'a> {
    disks: &'a [String],
}

impl From<RestNode> for NodeInfo {
    fn from(node: RestNode) -> Self {
        Self {
            name: node.id,
            online: node.state == RestNodeState::Online,
        }
    }
}

impl From<RestPool> for PoolInfo {
    fn from(pool: RestPool) -> Self {
        let state = match pool.state {
            RestPoolState::Unknown => PoolState::Unknown,
            RestPoolState::Online => PoolState::Online,
            RestPoolState::Degraded => PoolState::Degraded,
            RestPoolState::Faulted => PoolState::Faulted,
        };
        Self {
            name: pool.id,
            node: pool.node,
            disks: pool.disks,
            state,
            capacity: pool.capacity,
            used: pool.used,
        }
    }
}

impl From<RestReplica> for ReplicaInfo {
    fn from(replica: RestReplica) -> Self {
        Self {
            uuid: replica.uuid,
            pool: replica.pool,
            node: replica.node,
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Client for the control-plane REST API
#[derive(Clone)]
pub struct RestControlPlane {
    config: RestConfig,
    client: Client,
}

impl RestControlPlane {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v0/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn pool_url(&self, node: &str, pool: &str) -> String {
        self.url(&format!(
            "nodes/{}/pools/{}",
            urlencoding::encode(node),
            urlencoding::encode(pool)
        ))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = Self::check(response, "list", path).await?;
        Ok(response.json().await?)
    }

    /// Turn a non-2xx response into a node operation error carrying its body
    async fn check(response: Response, operation: &str, target: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body.trim())
        };
        Err(Error::node_operation(target, operation, reason))
    }
}

#[async_trait]
impl NodeClient for RestControlPlane {
    #[instrument(skip(self, disks))]
    async fn create_pool(&self, node: &str, pool: &str, disks: &[String]) -> Result<PoolInfo> {
        debug!("Creating pool {} on node {} with disks {:?}", pool, node, disks);

        let response = self
            .client
            .put(self.pool_url(node, pool))
            .json(&CreatePoolBody { disks })
            .send()
            .await?;
        let response = Self::check(response, "create pool", node).await?;

        let created: RestPool = response.json().await?;
        Ok(created.into())
    }

    #[instrument(skip(self))]
    async fn destroy_pool(&self, node: &str, pool: &str) -> Result<()> {
        debug!("Destroying pool {} on node {}", pool, node);

        let response = self.client.delete(self.pool_url(node, pool)).send().await?;
        Self::check(response, "destroy pool", node).await?;
        Ok(())
    }
}

#[async_trait]
impl FleetSource for RestControlPlane {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let nodes: Vec<RestNode> = self.get("nodes").await?;
        Ok(nodes.into_iter().map(Into::into).collect())
    }

    async fn list_pools(&self) -> Result<Vec<PoolInfo>> {
        let pools: Vec<RestPool> = self.get("pools").await?;
        Ok(pools.into_iter().map(Into::into).collect())
    }

    async fn list_replicas(&self) -> Result<Vec<ReplicaInfo>> {
        let replicas: Vec<RestReplica> = self.get("replicas").await?;
        Ok(replicas.into_iter().map(Into::into).collect())
    }
}
