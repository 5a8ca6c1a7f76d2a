//! The Registry (§4.2): an in-memory object graph of Nodes and, through
//! them, Pools/Replicas/Nexuses, built by giving each Node its own periodic
//! sync task - the same shape as the teacher's `Registry::poller()`, just
//! one task per node instead of one task walking all of them, since each
//! node's sync must serialize independently of the others (§5).

use crate::core::events::{Event, EventBus, EventKind, EventType, EventStream, ObjectRef};
use crate::core::scheduler::{self, PoolCandidate};
use crate::node::NodeWrapper;
use common::{
    errors::SvcError,
    ids::{NodeId, PoolId, VolumeId},
    transport::{Nexus, Node, Pool, Protocol, Replica},
};
use crate::config::Config;
use parking_lot::RwLock;
use rpc::{handle::HandleFactory, request::ChildOp};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct NodeEntry {
    wrapper: Arc<Mutex<NodeWrapper>>,
    sync_task: JoinHandle<()>,
}

pub struct Registry {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    bus: EventBus,
    factory: Arc<dyn HandleFactory>,
    config: Config,
}

impl Registry {
    pub fn new(factory: Arc<dyn HandleFactory>, config: Config) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            bus: EventBus::new(1024),
            factory,
            config,
        }
    }

    /// Clone of the publish side of the event bus, handed to components
    /// (Pool Operator, Volume Manager) that need to subscribe themselves.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn wrapper(&self, id: &NodeId) -> Option<Arc<Mutex<NodeWrapper>>> {
        self.nodes.read().get(id).map(|e| e.wrapper.clone())
    }

    /// Register a node and start its periodic sync loop (§4.1). The
    /// node-discovery adapter is authoritative for membership; a duplicate
    /// `add_node` for a live name just restarts the loop against the new
    /// endpoint.
    pub async fn add_node(&self, id: NodeId, endpoint: String) {
        if let Some(existing) = self.nodes.write().remove(&id) {
            existing.sync_task.abort();
        }
        let wrapper = Arc::new(Mutex::new(NodeWrapper::new(
            id.clone(),
            endpoint,
            self.factory.clone(),
            self.config.rpc_deadline,
        )));
        self.bus.publish(Event::new(
            EventKind::Node,
            EventType::New,
            ObjectRef::Node(id.clone()),
        ));
        let task = {
            let wrapper = wrapper.clone();
            let bus = self.bus.clone();
            let period = self.config.sync_period;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    wrapper.lock().await.sync(&bus).await;
                }
            })
        };
        self.nodes.write().insert(id, NodeEntry { wrapper, sync_task: task });
    }

    /// Deregister a node. Per §3, the node and everything it owned is torn
    /// down from the Registry's point of view; agent-side cleanup is the
    /// Pool Operator's and the Volume state machine's job, triggered by the
    /// `Del` event this publishes.
    pub fn remove_node(&self, id: &NodeId) {
        if let Some(entry) = self.nodes.write().remove(id) {
            entry.sync_task.abort();
            self.bus.publish(Event::new(EventKind::Node, EventType::Del, ObjectRef::Node(id.clone())));
        }
    }

    pub async fn get_node(&self, id: &NodeId) -> Option<Node> {
        let wrapper = self.wrapper(id)?;
        Some(wrapper.lock().await.node())
    }

    pub async fn get_nodes(&self) -> Vec<Node> {
        let wrappers: Vec<_> = self.nodes.read().values().map(|e| e.wrapper.clone()).collect();
        let mut out = Vec::with_capacity(wrappers.len());
        for w in wrappers {
            out.push(w.lock().await.node());
        }
        out
    }

    /// Trigger an out-of-cycle sync, used by the Pool Operator right after
    /// `create_pool`/`destroy_pool` so status reflects the mutation without
    /// waiting for the next periodic tick.
    pub async fn sync_node_now(&self, id: &NodeId) -> Result<(), SvcError> {
        let wrapper = self.wrapper(id).ok_or_else(|| SvcError::NodeNotFound { node: id.clone() })?;
        wrapper.lock().await.sync(&self.bus).await;
        Ok(())
    }

    /// When this node's wrapper last completed a sync, used by the Pool
    /// Operator's sweeper (§4.5, step 6) to find stale nodes.
    pub async fn last_sync(&self, id: &NodeId) -> Option<std::time::Instant> {
        let wrapper = self.wrapper(id)?;
        wrapper.lock().await.last_sync()
    }

    pub async fn get_pool(&self, id: &PoolId) -> Option<Pool> {
        let wrappers: Vec<_> = self.nodes.read().values().map(|e| e.wrapper.clone()).collect();
        for w in wrappers {
            if let Some(pool) = w.lock().await.pool(id) {
                return Some(pool.clone());
            }
        }
        None
    }

    pub async fn get_pools(&self, node: Option<&NodeId>) -> Vec<Pool> {
        let entries: Vec<_> = match node {
            Some(id) => self.wrapper(id).into_iter().collect(),
            None => self.nodes.read().values().map(|e| e.wrapper.clone()).collect(),
        };
        let mut out = Vec::new();
        for w in entries {
            out.extend(w.lock().await.pools().cloned());
        }
        out
    }

    pub async fn get_nexus(&self, uuid: VolumeId) -> Option<Nexus> {
        let wrappers: Vec<_> = self.nodes.read().values().map(|e| e.wrapper.clone()).collect();
        for w in wrappers {
            if let Some(nexus) = w.lock().await.nexus(uuid) {
                return Some(nexus.clone());
            }
        }
        None
    }

    /// All replicas sharing `uuid`, one per pool that hosts one (§4.2).
    pub async fn get_replica_set(&self, uuid: VolumeId) -> Vec<Replica> {
        let wrappers: Vec<_> = self.nodes.read().values().map(|e| e.wrapper.clone()).collect();
        let mut out = Vec::new();
        for w in wrappers {
            out.extend(w.lock().await.replicas_of(uuid).cloned());
        }
        out
    }

    /// Sum of `capacity - used` over accessible pools (§4.2).
    pub async fn get_capacity(&self, node: Option<&NodeId>) -> u64 {
        self.get_pools(node)
            .await
            .iter()
            .filter(|p| p.is_accessible())
            .map(|p| p.free_space())
            .sum()
    }

    /// `choosePools` (§4.2.1), extended with the §12 `exclude_nodes` set.
    pub async fn choose_pools(
        &self,
        required_bytes: u64,
        must_nodes: &[NodeId],
        should_nodes: &[NodeId],
        exclude_nodes: &HashSet<NodeId>,
    ) -> Vec<Pool> {
        let wrappers: Vec<_> = self.nodes.read().values().map(|e| e.wrapper.clone()).collect();
        let mut candidates = Vec::new();
        for w in wrappers {
            let guard = w.lock().await;
            for pool in guard.pools() {
                candidates.push(PoolCandidate {
                    pool: pool.clone(),
                    replica_count: guard.replica_count(&pool.id),
                });
            }
        }
        scheduler::choose_pools(&candidates, required_bytes, must_nodes, should_nodes, exclude_nodes)
    }

    /// Subscribe to the Event Stream, synthesizing a catch-up batch in
    /// dependency order (node -> pool -> replica -> nexus) ahead of live
    /// events (§4.3).
    pub async fn subscribe(&self) -> EventStream {
        let live = self.bus.subscribe();
        let wrappers: Vec<_> = self.nodes.read().values().map(|e| e.wrapper.clone()).collect();
        let mut catch_up = Vec::new();
        let mut pool_events = Vec::new();
        let mut replica_events = Vec::new();
        let mut nexus_events = Vec::new();
        for w in &wrappers {
            let guard = w.lock().await;
            catch_up.push(Event::new(EventKind::Node, EventType::Sync, ObjectRef::Node(guard.id().clone())));
            for pool in guard.pools() {
                pool_events.push(Event::new(EventKind::Pool, EventType::Sync, ObjectRef::Pool(pool.id.clone())));
            }
            for replica in guard.replicas() {
                replica_events.push(Event::new(
                    EventKind::Replica,
                    EventType::Sync,
                    ObjectRef::Replica(replica.uuid, replica.pool.clone()),
                ));
            }
            for nexus in guard.nexuses() {
                nexus_events.push(Event::new(EventKind::Nexus, EventType::Sync, ObjectRef::Nexus(nexus.uuid)));
            }
        }
        catch_up.extend(pool_events);
        catch_up.extend(replica_events);
        catch_up.extend(nexus_events);
        EventStream::new(catch_up, live)
    }

    // -- mutating passthroughs, used by the Pool Operator and the Volume fsa --

    pub async fn create_pool(&self, node: &NodeId, pool: PoolId, disks: Vec<String>) -> Result<Pool, SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.create_pool(pool, disks).await
    }

    pub async fn destroy_pool(&self, node: &NodeId, pool: PoolId) -> Result<(), SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.destroy_pool(pool).await
    }

    pub async fn list_pools_now(&self, node: &NodeId) -> Result<Vec<Pool>, SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.list_pools_now().await
    }

    pub async fn create_replica(
        &self,
        node: &NodeId,
        pool: PoolId,
        uuid: VolumeId,
        size: u64,
    ) -> Result<Replica, SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.create_replica(pool, uuid, size).await
    }

    pub async fn destroy_replica(&self, node: &NodeId, pool: PoolId, uuid: VolumeId) -> Result<(), SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.destroy_replica(pool, uuid).await
    }

    pub async fn share_replica(
        &self,
        node: &NodeId,
        pool: PoolId,
        uuid: VolumeId,
        protocol: Protocol,
    ) -> Result<String, SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.share_replica(pool, uuid, protocol).await
    }

    pub async fn unshare_replica(&self, node: &NodeId, pool: PoolId, uuid: VolumeId) -> Result<(), SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.unshare_replica(pool, uuid).await
    }

    pub async fn create_nexus(
        &self,
        node: &NodeId,
        uuid: VolumeId,
        size: u64,
        children: Vec<String>,
    ) -> Result<Nexus, SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.create_nexus(uuid, size, children).await
    }

    pub async fn destroy_nexus(&self, node: &NodeId, uuid: VolumeId) -> Result<(), SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.destroy_nexus(uuid).await
    }

    pub async fn publish_nexus(&self, node: &NodeId, uuid: VolumeId, protocol: Protocol) -> Result<String, SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.publish_nexus(uuid, protocol).await
    }

    pub async fn unpublish_nexus(&self, node: &NodeId, uuid: VolumeId) -> Result<(), SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.unpublish_nexus(uuid).await
    }

    pub async fn child_operation(
        &self,
        node: &NodeId,
        nexus: VolumeId,
        uri: String,
        op: ChildOp,
    ) -> Result<(), SvcError> {
        let wrapper = self.wrapper(node).ok_or_else(|| SvcError::NodeNotFound { node: node.clone() })?;
        wrapper.lock().await.child_operation(nexus, uri, op).await
    }

    /// §5/§12: stop every node's sync loop. Components built on the Event
    /// Stream (Pool Operator sweeper, Volume Manager event loop) own their
    /// own cancellation and drain their work queues independently - this
    /// only tears down the Registry's half.
    pub fn shutdown(&self) {
        for (_, entry) in self.nodes.write().drain() {
            entry.sync_task.abort();
        }
    }
}
