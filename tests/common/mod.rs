//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pool_operator::adapters::InMemoryPoolStore;
use pool_operator::domain::{NodeClient, PoolInfo, PoolResource, PoolState, ReplicaInfo};
use pool_operator::error::{Error, Result};
use pool_operator::registry::DEFAULT_EVENT_CAPACITY;
use pool_operator::{PoolOperator, Registry};

// =============================================================================
// Mock node client
// =============================================================================

/// A call made to the mock node client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        node: String,
        pool: String,
        disks: Vec<String>,
    },
    Destroy {
        node: String,
        pool: String,
    },
}

/// Node client recording every call, with switchable failures
#[derive(Default)]
pub struct MockNodeClient {
    calls: Mutex<Vec<Call>>,
    create_error: Mutex<Option<String>>,
    destroy_error: Mutex<Option<String>>,
    unresponsive: Mutex<Vec<String>>,
}

impl MockNodeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn creates(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .collect()
    }

    pub fn destroys(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Destroy { .. }))
            .collect()
    }

    /// Make create calls fail with `reason`, or succeed again with `None`
    pub fn fail_create(&self, reason: Option<&str>) {
        *self.create_error.lock() = reason.map(str::to_string);
    }

    pub fn fail_destroy(&self, reason: Option<&str>) {
        *self.destroy_error.lock() = reason.map(str::to_string);
    }

    /// Make create calls on `node` never return
    pub fn hang_creates_on(&self, node: &str) {
        self.unresponsive.lock().push(node.to_string());
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn create_pool(&self, node: &str, pool: &str, disks: &[String]) -> Result<PoolInfo> {
        self.calls.lock().push(Call::Create {
            node: node.to_string(),
            pool: pool.to_string(),
            disks: disks.to_vec(),
        });

        let hangs = self.unresponsive.lock().iter().any(|n| n == node);
        if hangs {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = self.create_error.lock().clone() {
            return Err(Error::node_operation(node, "create pool", reason));
        }
        Ok(pool_info(
            node,
            pool,
            disks.iter().map(|d| format!("aio://{}", d)).collect(),
        ))
    }

    async fn destroy_pool(&self, node: &str, pool: &str) -> Result<()> {
        self.calls.lock().push(Call::Destroy {
            node: node.to_string(),
            pool: pool.to_string(),
        });

        if let Some(reason) = self.destroy_error.lock().clone() {
            return Err(Error::node_operation(node, "destroy pool", reason));
        }
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn pool_info(node: &str, pool: &str, disks: Vec<String>) -> PoolInfo {
    PoolInfo {
        name: pool.to_string(),
        node: node.to_string(),
        disks,
        state: PoolState::Online,
        capacity: 100 << 20,
        used: 0,
    }
}

pub fn resource(name: &str, node: &str) -> PoolResource {
    PoolResource::new(name, "mayastor", node, ["/dev/sdb"]).unwrap()
}

pub fn replica(node: &str, pool: &str) -> ReplicaInfo {
    ReplicaInfo {
        uuid: uuid::Uuid::new_v4().to_string(),
        pool: pool.to_string(),
        node: node.to_string(),
    }
}

/// Operator wired to an in-memory store and a mock node client
pub struct Harness {
    pub store: Arc<InMemoryPoolStore>,
    pub client: Arc<MockNodeClient>,
    pub registry: Registry,
    pub operator: PoolOperator,
    pub shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Harness whose registry event channels hold only `capacity` events
    pub fn with_event_capacity(capacity: usize) -> Self {
        let store = Arc::new(InMemoryPoolStore::new());
        let client = MockNodeClient::new();
        let registry = Registry::with_capacity(client.clone(), capacity);
        let operator = PoolOperator::new(store.clone(), registry.clone());

        Self {
            store,
            client,
            registry,
            operator,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }

    /// Start the operator; existing resources are replayed
    pub fn start(&mut self) {
        self.handle = Some(self.operator.start(self.shutdown.clone()));
    }

    /// Stop the operator and wait for its task
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("operator did not stop")
                .expect("operator task failed");
        }
    }

    pub fn online_node(&self, name: &str) {
        self.registry.add_node(name);
        self.registry.set_node_synced(name, true).unwrap();
    }

    pub fn existing_pool(&self, node: &str, name: &str) {
        self.registry
            .apply_pool(pool_info(node, name, vec!["aio:///dev/sdb".into()]))
            .unwrap();
    }

    /// Give queued events time to be handled
    pub async fn settle(&self) {
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.operator.wait_idle().await;
        }
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
