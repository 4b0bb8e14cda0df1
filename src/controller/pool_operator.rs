//! Pool Operator
//!
//! Reconciles pool resources (desired state) with the pools found on storage
//! nodes (actual state). Both sides produce `new`/`mod`/`del` events; every
//! event is turned into a job on the per-name work queue, and each job
//! re-reads the registry and the store before deciding anything.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::finalizer::sync_finalizer;
use super::status::{self, StatusPublisher};
use super::WorkQueue;
use crate::domain::{Event, EventType, PoolResource, PoolStore};
use crate::metrics;
use crate::registry::{Node, Pool, Registry, Replica};

/// Receivers for every event stream the operator follows
struct Subscriptions {
    resources: broadcast::Receiver<Event<PoolResource>>,
    nodes: broadcast::Receiver<Event<Node>>,
    pools: broadcast::Receiver<Event<Pool>>,
    replicas: broadcast::Receiver<Event<Replica>>,
}

/// Reconciler for MayastorPool resources
#[derive(Clone)]
pub struct PoolOperator {
    store: Arc<dyn PoolStore>,
    registry: Registry,
    queue: WorkQueue,
    status: StatusPublisher,
}

impl PoolOperator {
    pub fn new(store: Arc<dyn PoolStore>, registry: Registry) -> Self {
        Self {
            status: StatusPublisher::new(Arc::clone(&store)),
            store,
            registry,
            queue: WorkQueue::new(),
        }
    }

    /// Subscribe to all streams now and handle them in a background task.
    ///
    /// The task first replays every existing pool resource through
    /// [`reconcile_new`](Self::reconcile_new), then follows live events until
    /// `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let subscriptions = self.subscribe();
        let operator = self.clone();
        tokio::spawn(async move { operator.serve(subscriptions, shutdown).await })
    }

    /// Subscribe, replay and follow events until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let subscriptions = self.subscribe();
        self.serve(subscriptions, shutdown).await;
    }

    /// Wait until all queued reconciliation and status work is done
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
        self.status.wait_idle().await;
    }

    fn subscribe(&self) -> Subscriptions {
        Subscriptions {
            nodes: self.registry.subscribe_nodes(),
            pools: self.registry.subscribe_pools(),
            replicas: self.registry.subscribe_replicas(),
            resources: self.store.subscribe(),
        }
    }

    async fn serve(self, mut subs: Subscriptions, shutdown: CancellationToken) {
        self.replay();
        info!("Pool operator is watching for changes");

        loop {
            let flow = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = subs.resources.recv() => {
                    self.dispatch("resource", received, Self::on_resource_event)
                }
                received = subs.nodes.recv() => {
                    self.dispatch("node", received, Self::on_node_event)
                }
                received = subs.pools.recv() => {
                    self.dispatch("pool", received, Self::on_pool_event)
                }
                received = subs.replicas.recv() => {
                    self.dispatch("replica", received, Self::on_replica_event)
                }
            };
            if flow.is_break() {
                break;
            }
        }

        info!("Pool operator stopped");
    }

    fn replay(&self) {
        let resources = self.store.list();
        info!("Replaying {} pool resources", resources.len());

        // Not awaited: a slow node only holds up its own records, and live
        // events for a name still queue behind its replay job.
        for resource in resources {
            let _ = self.queue_new(resource);
        }
    }

    fn dispatch<T>(
        &self,
        source: &str,
        received: Result<Event<T>, RecvError>,
        handler: fn(&Self, Event<T>),
    ) -> ControlFlow<()> {
        match received {
            Ok(event) => {
                metrics::record_event(source, &event.event_type.to_string());
                handler(self, event);
                ControlFlow::Continue(())
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} {} events, resyncing everything", missed, source);
                self.resync();
                ControlFlow::Continue(())
            }
            Err(RecvError::Closed) => {
                error!("The {} event stream closed", source);
                ControlFlow::Break(())
            }
        }
    }

    fn queue_new(&self, resource: PoolResource) -> oneshot::Receiver<()> {
        let operator = self.clone();
        let name = resource.name.clone();
        self.queue
            .push(&name, async move { operator.reconcile_new(resource).await })
    }

    /// Run every resource and every known pool through the `new` path
    fn resync(&self) {
        for resource in self.store.list() {
            let _ = self.queue_new(resource);
        }
        for pool in self.registry.pools() {
            self.on_pool_event(Event::new(pool));
        }
    }

    // =========================================================================
    // Desired state
    // =========================================================================

    fn on_resource_event(&self, event: Event<PoolResource>) {
        let operator = self.clone();
        let name = event.object.name.clone();

        let _ = self.queue.push(&name, async move {
            match event.event_type {
                EventType::New => operator.reconcile_new(event.object).await,
                EventType::Mod => operator.reconcile_mod(event.object).await,
                EventType::Del => operator.reconcile_del(event.object).await,
            }
        });
    }

    /// Make sure the pool of a resource exists, creating it if needed
    #[instrument(skip(self, resource), fields(pool = %resource.name))]
    pub async fn reconcile_new(&self, resource: PoolResource) {
        let name = resource.name.as_str();
        let node_name = resource.spec.node.as_str();

        let node = match self.registry.get_node(node_name) {
            Some(node) if node.is_synced() => node,
            _ => {
                debug!("Node {} is not available", node_name);
                self.status
                    .publish(name, status::pending(status::node_unavailable_reason(node_name)));
                return;
            }
        };

        if let Some(pool) = self.registry.get_pool(name) {
            if pool.node == node_name {
                debug!("Pool already exists");
                self.status.publish(name, status::from_pool(&pool));
                let _ = sync_finalizer(self.store.as_ref(), &self.registry, name).await;
            } else {
                warn!(
                    "Pool exists on node {} instead of {}, leaving it alone",
                    pool.node, node_name
                );
                self.status.publish(name, status::from_pool(&pool));
            }
            return;
        }

        info!("Creating pool on node {}", node_name);
        self.status.publish(name, status::creating());

        match node.create_pool(name, &resource.spec.disks).await {
            Ok(pool) => {
                metrics::record_pool_operation("create", true);
                info!("Pool created, state {}", pool.state);
            }
            Err(e) => {
                metrics::record_pool_operation("create", false);
                error!("Failed to create pool: {}", e);
                self.status.publish(name, status::failed(&e));
            }
        }
    }

    /// Re-publish the status of a changed resource. Never touches the pool.
    #[instrument(skip(self, resource), fields(pool = %resource.name))]
    pub async fn reconcile_mod(&self, resource: PoolResource) {
        let name = resource.name.as_str();

        if let Some(pool) = self.registry.get_pool(name) {
            if pool.node != resource.spec.node {
                warn!(
                    "Pool lives on node {}, ignoring the request to place it on {}",
                    pool.node, resource.spec.node
                );
            }
            self.status.publish(name, status::from_pool(&pool));
            return;
        }

        match self.registry.get_node(&resource.spec.node) {
            Some(node) if node.is_synced() => debug!("No pool and nothing to report"),
            _ => self.status.publish(
                name,
                status::pending(status::node_unavailable_reason(&resource.spec.node)),
            ),
        }
    }

    /// Destroy the pool of a deleted resource
    #[instrument(skip(self, resource), fields(pool = %resource.name))]
    pub async fn reconcile_del(&self, resource: PoolResource) {
        let name = resource.name.as_str();

        let Some(node) = self.registry.get_node(&resource.spec.node) else {
            debug!("Node {} is unknown, nothing to destroy", resource.spec.node);
            return;
        };
        if node.pool(name).is_none() {
            debug!("No pool to destroy");
            return;
        }

        info!("Destroying pool on node {}", node.name());
        match node.destroy_pool(name).await {
            Ok(()) => {
                metrics::record_pool_operation("destroy", true);
                info!("Pool destroyed");
            }
            Err(e) => {
                metrics::record_pool_operation("destroy", false);
                error!("Failed to destroy pool: {}", e);
            }
        }
    }

    // =========================================================================
    // Actual state
    // =========================================================================

    fn on_node_event(&self, event: Event<Node>) {
        let node = event.object;
        let available = event.event_type != EventType::Del && node.is_synced();
        debug!(
            "Node {} {} (available: {})",
            node.name(),
            event.event_type,
            available
        );

        let affected = self
            .store
            .list()
            .into_iter()
            .filter(|resource| resource.spec.node == node.name());

        for resource in affected {
            let operator = self.clone();
            let name = resource.name.clone();

            let _ = self.queue.push(&name, async move {
                if operator.registry.get_pool(&resource.name).is_some() {
                    return;
                }
                if available {
                    operator.reconcile_new(resource).await;
                } else {
                    operator.status.publish(
                        &resource.name,
                        status::pending(status::node_unavailable_reason(&resource.spec.node)),
                    );
                }
            });
        }
    }

    fn on_pool_event(&self, event: Event<Pool>) {
        let operator = self.clone();
        let name = event.object.name.clone();

        let _ = self.queue.push(&name, async move {
            operator.handle_pool_event(event).await;
        });
    }

    #[instrument(skip(self, event), fields(pool = %event.object.name, event = %event.event_type))]
    async fn handle_pool_event(&self, event: Event<Pool>) {
        let pool = event.object;
        let resource = self.store.get(&pool.name);

        match (event.event_type, resource) {
            (EventType::New, None) => self.destroy_orphan(&pool).await,
            (EventType::New | EventType::Mod, Some(_)) => {
                // Publish what the registry holds now; the event may be stale
                if let Some(current) = self.registry.get_pool(&pool.name) {
                    self.status.publish(&pool.name, status::from_pool(&current));
                }
            }
            (EventType::Del, Some(resource)) => {
                info!("Pool disappeared from node {}, recreating it", pool.node);
                self.reconcile_new(resource).await;
            }
            (_, None) => debug!("Pool has no resource, ignoring"),
        }
    }

    async fn destroy_orphan(&self, pool: &Pool) {
        let Some(node) = self.registry.get_node(&pool.node) else {
            return;
        };
        if node.pool(&pool.name).is_none() {
            return;
        }

        warn!("Destroying pool on node {} without a pool resource", pool.node);
        match node.destroy_pool(&pool.name).await {
            Ok(()) => metrics::record_pool_operation("destroy", true),
            Err(e) => {
                metrics::record_pool_operation("destroy", false);
                error!("Failed to destroy orphaned pool: {}", e);
            }
        }
    }

    fn on_replica_event(&self, event: Event<Replica>) {
        let operator = self.clone();
        let pool = event.object.pool;
        let key = pool.clone();

        let _ = self.queue.push(&key, async move {
            // Failures are logged by sync_finalizer
            let _ = sync_finalizer(operator.store.as_ref(), &operator.registry, &pool).await;
        });
    }
}
