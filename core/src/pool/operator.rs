//! Pool Operator (§4.5): reconciles declarative pool resources with agent
//! state, the way the teacher's `pool::service` reconciles CRUD calls onto
//! `NodeWrapper`, but driven by a declarative spec instead of one-shot
//! commands, and with the startup ordering and sweeper spec.md adds.

use crate::core::{Registry, WorkQueue};
use crate::pool::resource::{validate_disks, NodeLifecycleEvent, PoolStatusSink};
use common::{
    ids::{NodeId, PoolId},
    transport::{PoolResourceSpec, PoolResourceStatus, PoolStatus},
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub struct PoolOperator {
    registry: Arc<Registry>,
    status_sink: Arc<dyn PoolStatusSink>,
    resources: RwLock<HashMap<PoolId, PoolResourceSpec>>,
    queue: WorkQueue,
    starting: std::sync::atomic::AtomicBool,
    queued_node_events: Mutex<Vec<NodeLifecycleEvent>>,
}

impl PoolOperator {
    pub fn new(registry: Arc<Registry>, status_sink: Arc<dyn PoolStatusSink>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            status_sink,
            resources: RwLock::new(HashMap::new()),
            queue: WorkQueue::new(),
            starting: std::sync::atomic::AtomicBool::new(true),
            queued_node_events: Mutex::new(Vec::new()),
        })
    }

    /// Startup sequence (§4.5): cache resources with status stripped, queue
    /// node events, sync every currently-known node, replay the queue, then
    /// begin the periodic sweeper. Returns once the operator is ready to
    /// accept `create`/`destroy`/`modify` calls from the resource watcher.
    pub async fn start(self: &Arc<Self>, initial_resources: Vec<PoolResourceSpec>) {
        {
            let mut resources = self.resources.write();
            for spec in initial_resources {
                resources.insert(spec.name.clone(), spec);
            }
        }
        let nodes = self.registry.get_nodes().await;
        for node in nodes {
            self.sync_node(&node.id).await;
        }
        let queued = std::mem::take(&mut *self.queued_node_events.lock());
        for event in queued {
            self.queue.run(|| self.apply_node_event(event)).await;
        }
        self.starting.store(false, std::sync::atomic::Ordering::SeqCst);

        let this = self.clone();
        tokio::spawn(async move {
            this.sweep_loop().await;
        });
    }

    async fn sweep_loop(self: Arc<Self>) {
        let sweep_period = self.registry.config().sweep_period;
        let stale_after = self.registry.config().stale_after;
        let mut interval = tokio::time::interval(sweep_period);
        loop {
            interval.tick().await;
            let nodes = self.registry.get_nodes().await;
            for node in nodes {
                let stale = match self.registry.last_sync(&node.id).await {
                    Some(last) => last.elapsed() >= stale_after,
                    None => true,
                };
                if stale {
                    let _ = self.registry.sync_node_now(&node.id).await;
                    self.sync_node(&node.id).await;
                }
            }
        }
    }

    /// Node add/remove (§6 node-discovery surface, as seen by the operator).
    /// Queued verbatim while starting up (§4.5, step 2); applied immediately
    /// afterwards.
    pub async fn on_node_event(&self, event: NodeLifecycleEvent) {
        if self.starting.load(std::sync::atomic::Ordering::SeqCst) {
            self.queued_node_events.lock().push(event);
            return;
        }
        self.queue.run(|| self.apply_node_event(event)).await;
    }

    /// Callers must already hold the work queue slot - call via
    /// `self.queue.run(|| self.apply_node_event(event))`, never directly.
    async fn apply_node_event(&self, event: NodeLifecycleEvent) {
        match event {
            NodeLifecycleEvent::Add { id, .. } => self.sync_node_inner(&id).await,
            NodeLifecycleEvent::Remove { id } => {
                let orphaned: Vec<PoolId> = self
                    .resources
                    .read()
                    .values()
                    .filter(|r| r.node == id)
                    .map(|r| r.name.clone())
                    .collect();
                for name in orphaned {
                    self.publish_status(
                        &name,
                        PoolResourceStatus {
                            state: PoolStatus::Pending,
                            reason: format!("node '{id}' removed"),
                            capacity: 0,
                            used: 0,
                        },
                    )
                    .await;
                }
            }
        }
    }

    /// `create` (§4.5.1).
    pub async fn create(&self, spec: PoolResourceSpec) {
        self.queue
            .run(|| async {
                self.resources.write().insert(spec.name.clone(), spec.clone());
                self.reconcile_one(&spec).await;
            })
            .await
    }

    /// `destroy` (§4.5.1): removed from the internal map first so a
    /// concurrent sync can't recreate it from observed-but-undesired state.
    pub async fn destroy(&self, name: &PoolId) {
        self.queue
            .run(|| async {
                let spec = self.resources.write().remove(name);
                let Some(spec) = spec else { return };
                let Some(node) = self.registry.get_node(&spec.node).await else {
                    // node unknown: nothing to destroy agent-side; a future
                    // node-join sync will find no matching resource and
                    // destroy the foreign pool itself.
                    return;
                };
                match self.registry.destroy_pool(&node.id, name.clone()).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => tracing::warn!(pool = %name, error = %err, "destroy_pool failed"),
                }
            })
            .await
    }

    /// `modify` (§4.5.1): disk changes are rejected as a no-op; a node
    /// change is a destroy on the old node followed by a create on the new.
    pub async fn modify(&self, spec: PoolResourceSpec) {
        self.queue
            .run(|| async {
                let previous = self.resources.read().get(&spec.name).cloned();
                let Some(previous) = previous else {
                    self.resources.write().insert(spec.name.clone(), spec.clone());
                    self.reconcile_one(&spec).await;
                    return;
                };
                if previous.disks != spec.disks {
                    tracing::warn!(pool = %spec.name, "disk list change rejected, pool disks are immutable");
                }
                if previous.node != spec.node {
                    if let Some(node) = self.registry.get_node(&previous.node).await {
                        let _ = self.registry.destroy_pool(&node.id, spec.name.clone()).await;
                    }
                    let mut moved = spec.clone();
                    moved.disks = previous.disks.clone();
                    self.resources.write().insert(spec.name.clone(), moved.clone());
                    self.reconcile_one(&moved).await;
                }
            })
            .await
    }

    /// Create-path reconciliation for one resource (§4.5.1), shared by
    /// `create`, `modify`'s node-move path and node sync's "desired pool
    /// absent from node" case.
    async fn reconcile_one(&self, spec: &PoolResourceSpec) {
        if let Err(reason) = validate_disks(&spec.disks) {
            self.publish_status(
                &spec.name,
                PoolResourceStatus {
                    state: PoolStatus::Pending,
                    reason,
                    capacity: 0,
                    used: 0,
                },
            )
            .await;
            return;
        }
        let Some(node) = self.registry.get_node(&spec.node).await else {
            self.publish_status(
                &spec.name,
                PoolResourceStatus {
                    state: PoolStatus::Pending,
                    reason: format!("node '{}' unknown", spec.node),
                    capacity: 0,
                    used: 0,
                },
            )
            .await;
            return;
        };
        let create_result = self.registry.create_pool(&node.id, spec.name.clone(), spec.disks.clone()).await;
        if let Err(err) = create_result {
            if !err.is_already_exists() {
                self.publish_status(
                    &spec.name,
                    PoolResourceStatus {
                        state: PoolStatus::Offline,
                        reason: err.to_string(),
                        capacity: 0,
                        used: 0,
                    },
                )
                .await;
                return;
            }
        }
        match self.registry.list_pools_now(&node.id).await {
            Ok(pools) => match pools.into_iter().find(|p| p.id == spec.name) {
                Some(pool) if pool.disks == spec.disks => {
                    self.publish_status(
                        &spec.name,
                        PoolResourceStatus {
                            state: pool.status,
                            reason: String::new(),
                            capacity: pool.capacity,
                            used: pool.used,
                        },
                    )
                    .await;
                }
                Some(_) => {
                    self.publish_status(
                        &spec.name,
                        PoolResourceStatus {
                            state: PoolStatus::Pending,
                            reason: "A different pool with the same name already exists".to_string(),
                            capacity: 0,
                            used: 0,
                        },
                    )
                    .await;
                }
                None => {
                    self.publish_status(
                        &spec.name,
                        PoolResourceStatus {
                            state: PoolStatus::Pending,
                            reason: "pool not yet observed on node".to_string(),
                            capacity: 0,
                            used: 0,
                        },
                    )
                    .await;
                }
            },
            Err(err) => {
                self.publish_status(
                    &spec.name,
                    PoolResourceStatus {
                        state: PoolStatus::Offline,
                        reason: err.to_string(),
                        capacity: 0,
                        used: 0,
                    },
                )
                .await;
            }
        }
    }

    /// Node synchronization (§4.5.2), serialized through the operator's work
    /// queue alongside `create`/`destroy`/`modify` (§5: at most one
    /// `create|destroy|modify|sync|remove` in flight cluster-wide) - without
    /// this, a sweeper sync could interleave with a concurrent `destroy` on
    /// the same pool and re-publish status the destroy had already retracted.
    async fn sync_node(&self, node: &NodeId) {
        self.queue.run(|| self.sync_node_inner(node)).await
    }

    /// List the node's pools, destroy foreign ones, create missing desired
    /// ones, update matching ones. Callers must already hold the work queue
    /// slot - call via [`Self::sync_node`], never directly.
    async fn sync_node_inner(&self, node: &NodeId) {
        let desired: Vec<PoolResourceSpec> = self
            .resources
            .read()
            .values()
            .filter(|r| &r.node == node)
            .cloned()
            .collect();

        let observed = match self.registry.list_pools_now(node).await {
            Ok(pools) => pools,
            Err(err) => {
                for spec in &desired {
                    self.publish_status(
                        &spec.name,
                        PoolResourceStatus {
                            state: PoolStatus::Offline,
                            reason: err.to_string(),
                            capacity: 0,
                            used: 0,
                        },
                    )
                    .await;
                }
                return;
            }
        };

        let desired_names: std::collections::HashSet<&PoolId> = desired.iter().map(|r| &r.name).collect();
        for pool in &observed {
            if !desired_names.contains(&pool.id) {
                if let Err(err) = self.registry.destroy_pool(node, pool.id.clone()).await {
                    tracing::warn!(pool = %pool.id, error = %err, "failed destroying foreign pool");
                }
            }
        }

        for spec in &desired {
            match observed.iter().find(|p| p.id == spec.name) {
                None => self.reconcile_one(spec).await,
                Some(pool) if pool.disks == spec.disks => {
                    self.publish_status(
                        &spec.name,
                        PoolResourceStatus {
                            state: pool.status,
                            reason: String::new(),
                            capacity: pool.capacity,
                            used: pool.used,
                        },
                    )
                    .await;
                }
                Some(pool) => {
                    tracing::warn!(pool = %spec.name, "observed disks differ from resource, replacing cached disk list with what sync observed");
                    if let Some(cached) = self.resources.write().get_mut(&spec.name) {
                        cached.disks = pool.disks.clone();
                    }
                    self.publish_status(
                        &spec.name,
                        PoolResourceStatus {
                            state: pool.status,
                            reason: String::new(),
                            capacity: pool.capacity,
                            used: pool.used,
                        },
                    )
                    .await;
                }
            }
        }
    }

    async fn publish_status(&self, name: &PoolId, status: PoolResourceStatus) {
        self.status_sink.write_status(name, status).await;
    }
}
