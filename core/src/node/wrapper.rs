//! A Node wraps a Handle with a polling loop (§4.1). `NodeWrapper` owns the
//! observed Pools and Nexuses (and, indirectly, Replicas) for one agent,
//! connecting a fresh [`NodeHandle`] for every RPC the way
//! `core::grpc::GrpcContext` in the teacher opens a channel per call rather
//! than holding one open indefinitely.

use crate::core::events::{Event, EventBus, EventKind, EventType, ObjectRef};
use common::{
    errors::SvcError,
    ids::{NodeId, PoolId, VolumeId},
    transport::{Nexus, Node, NodeStatus, Pool, PoolStatus, Protocol, Replica},
};
use rpc::{handle::HandleFactory, request::*};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct NodeWrapper {
    id: NodeId,
    endpoint: String,
    factory: Arc<dyn HandleFactory>,
    deadline: Duration,
    status: NodeStatus,
    last_sync: Option<Instant>,
    pools: HashMap<PoolId, Pool>,
    replicas: HashMap<(PoolId, VolumeId), Replica>,
    nexuses: HashMap<VolumeId, Nexus>,
}

impl NodeWrapper {
    pub fn new(id: NodeId, endpoint: String, factory: Arc<dyn HandleFactory>, deadline: Duration) -> Self {
        Self {
            id,
            endpoint,
            factory,
            deadline,
            status: NodeStatus::Init,
            last_sync: None,
            pools: HashMap::new(),
            replicas: HashMap::new(),
            nexuses: HashMap::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: String) {
        self.endpoint = endpoint;
    }

    pub fn node(&self) -> Node {
        Node {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            status: self.status,
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn last_sync(&self) -> Option<Instant> {
        self.last_sync
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn pool(&self, id: &PoolId) -> Option<&Pool> {
        self.pools.get(id)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.values()
    }

    pub fn replicas_of(&self, uuid: VolumeId) -> impl Iterator<Item = &Replica> {
        self.replicas.values().filter(move |r| r.uuid == uuid)
    }

    pub fn replica_count(&self, pool: &PoolId) -> usize {
        self.replicas.keys().filter(|(p, _)| p == pool).count()
    }

    pub fn nexuses(&self) -> impl Iterator<Item = &Nexus> {
        self.nexuses.values()
    }

    pub fn nexus(&self, uuid: VolumeId) -> Option<&Nexus> {
        self.nexuses.get(&uuid)
    }

    async fn connect(&self) -> Result<Box<dyn rpc::handle::NodeHandle>, SvcError> {
        self.factory.connect(&self.endpoint).await
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, SvcError>>,
    ) -> Result<T, SvcError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(SvcError::Unavailable {
                node: self.id.clone(),
                reason: "rpc deadline exceeded".to_string(),
            }),
        }
    }

    /// Full `listPools + listReplicas + listNexus` pass (§4.1), merging
    /// observed objects by identity and publishing `new|mod|del` per object,
    /// then a `Sync` event for the node itself (consumed by §4.7's
    /// `node:<synced>` routing).
    #[tracing::instrument(level = "debug", skip(self, bus), fields(node.id = %self.id))]
    pub async fn sync(&mut self, bus: &EventBus) {
        let result = self.try_sync().await;
        match result {
            Ok((pools, replicas, nexus)) => {
                let was_offline = self.status != NodeStatus::Online;
                self.status = NodeStatus::Online;
                self.last_sync = Some(Instant::now());
                if was_offline {
                    bus.publish(Event::new(
                        EventKind::Node,
                        EventType::Mod,
                        ObjectRef::Node(self.id.clone()),
                    ));
                }
                // dependency order (node -> pool -> replica -> nexus), per §4.3.
                self.merge_pools(pools, bus);
                self.merge_replicas(replicas, bus);
                self.merge_nexus(nexus, bus);
                bus.publish(Event::new(
                    EventKind::Node,
                    EventType::Sync,
                    ObjectRef::Node(self.id.clone()),
                ));
            }
            Err(err) => {
                tracing::warn!(error = %err, "node sync failed");
                let was_online = self.status == NodeStatus::Online || self.status == NodeStatus::Init;
                self.status = NodeStatus::Offline;
                if was_online {
                    bus.publish(Event::new(
                        EventKind::Node,
                        EventType::Mod,
                        ObjectRef::Node(self.id.clone()),
                    ));
                }
                self.mark_pools_offline(&err.to_string(), bus);
            }
        }
    }

    /// `listPools + listReplicas + listNexus` over one connection, returned
    /// to the caller unmerged - merging happens only after all three
    /// succeed, so a partial failure never leaves a half-updated view.
    async fn try_sync(&mut self) -> Result<(Vec<Pool>, Vec<Replica>, Vec<Nexus>), SvcError> {
        let handle = self.connect().await?;
        let pools = self.with_deadline(handle.list_pools()).await?;
        let replicas = self.with_deadline(handle.list_replicas()).await?;
        let nexus = self.with_deadline(handle.list_nexus()).await?;
        Ok((pools, replicas, nexus))
    }

    fn mark_pools_offline(&mut self, reason: &str, bus: &EventBus) {
        for pool in self.pools.values_mut() {
            if pool.status != PoolStatus::Offline {
                pool.status = PoolStatus::Offline;
                pool.reason = reason.to_string();
                bus.publish(Event::new(
                    EventKind::Pool,
                    EventType::Mod,
                    ObjectRef::Pool(pool.id.clone()),
                ));
            }
        }
    }

    fn merge_pools(&mut self, observed: Vec<Pool>, bus: &EventBus) {
        let mut seen = std::collections::HashSet::new();
        for pool in observed {
            seen.insert(pool.id.clone());
            match self.pools.get(&pool.id) {
                None => {
                    bus.publish(Event::new(
                        EventKind::Pool,
                        EventType::New,
                        ObjectRef::Pool(pool.id.clone()),
                    ));
                    self.pools.insert(pool.id.clone(), pool);
                }
                Some(existing) => {
                    if existing != &pool {
                        bus.publish(Event::new(
                            EventKind::Pool,
                            EventType::Mod,
                            ObjectRef::Pool(pool.id.clone()),
                        ));
                    }
                    self.pools.insert(pool.id.clone(), pool);
                }
            }
        }
        let removed: Vec<PoolId> = self
            .pools
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in removed {
            self.pools.remove(&id);
            bus.publish(Event::new(EventKind::Pool, EventType::Del, ObjectRef::Pool(id)));
        }
    }

    fn merge_replicas(&mut self, observed: Vec<Replica>, bus: &EventBus) {
        let mut seen = std::collections::HashSet::new();
        for replica in observed {
            let key = (replica.pool.clone(), replica.uuid);
            seen.insert(key.clone());
            match self.replicas.get(&key) {
                None => {
                    bus.publish(Event::new(
                        EventKind::Replica,
                        EventType::New,
                        ObjectRef::Replica(replica.uuid, replica.pool.clone()),
                    ));
                    self.replicas.insert(key, replica);
                }
                Some(existing) => {
                    if existing != &replica {
                        bus.publish(Event::new(
                            EventKind::Replica,
                            EventType::Mod,
                            ObjectRef::Replica(replica.uuid, replica.pool.clone()),
                        ));
                    }
                    self.replicas.insert(key, replica);
                }
            }
        }
        let removed: Vec<(PoolId, VolumeId)> = self
            .replicas
            .keys()
            .filter(|k| !seen.contains(*k))
            .cloned()
            .collect();
        for (pool, uuid) in removed {
            self.replicas.remove(&(pool.clone(), uuid));
            bus.publish(Event::new(
                EventKind::Replica,
                EventType::Del,
                ObjectRef::Replica(uuid, pool),
            ));
        }
    }

    fn merge_nexus(&mut self, observed: Vec<Nexus>, bus: &EventBus) {
        let mut seen = std::collections::HashSet::new();
        for nexus in observed {
            seen.insert(nexus.uuid);
            match self.nexuses.get(&nexus.uuid) {
                None => {
                    bus.publish(Event::new(
                        EventKind::Nexus,
                        EventType::New,
                        ObjectRef::Nexus(nexus.uuid),
                    ));
                    self.nexuses.insert(nexus.uuid, nexus);
                }
                Some(existing) => {
                    if existing != &nexus {
                        bus.publish(Event::new(
                            EventKind::Nexus,
                            EventType::Mod,
                            ObjectRef::Nexus(nexus.uuid),
                        ));
                    }
                    self.nexuses.insert(nexus.uuid, nexus);
                }
            }
        }
        let removed: Vec<VolumeId> = self
            .nexuses
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for uuid in removed {
            self.nexuses.remove(&uuid);
            bus.publish(Event::new(EventKind::Nexus, EventType::Del, ObjectRef::Nexus(uuid)));
        }
    }

    // -- mutating calls, each a scoped connect + deadline (§4.1) --

    pub async fn create_pool(&self, pool: PoolId, disks: Vec<String>) -> Result<Pool, SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.create_pool(&CreatePool {
            node: self.id.clone(),
            pool,
            disks,
        }))
        .await
    }

    pub async fn destroy_pool(&self, pool: PoolId) -> Result<(), SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.destroy_pool(&DestroyPool {
            node: self.id.clone(),
            pool,
        }))
        .await
    }

    pub async fn list_pools_now(&self) -> Result<Vec<Pool>, SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.list_pools()).await
    }

    pub async fn create_replica(&self, pool: PoolId, uuid: VolumeId, size: u64) -> Result<Replica, SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.create_replica(&CreateReplica {
            node: self.id.clone(),
            pool,
            uuid,
            size,
        }))
        .await
    }

    pub async fn destroy_replica(&self, pool: PoolId, uuid: VolumeId) -> Result<(), SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.destroy_replica(&DestroyReplica {
            node: self.id.clone(),
            pool,
            uuid,
        }))
        .await
    }

    pub async fn share_replica(&self, pool: PoolId, uuid: VolumeId, protocol: Protocol) -> Result<String, SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.share_replica(&ShareReplica {
            node: self.id.clone(),
            pool,
            uuid,
            protocol,
        }))
        .await
    }

    pub async fn unshare_replica(&self, pool: PoolId, uuid: VolumeId) -> Result<(), SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.unshare_replica(&UnshareReplica {
            node: self.id.clone(),
            pool,
            uuid,
        }))
        .await
    }

    pub async fn create_nexus(&self, uuid: VolumeId, size: u64, children: Vec<String>) -> Result<Nexus, SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.create_nexus(&CreateNexus {
            node: self.id.clone(),
            uuid,
            size,
            children,
        }))
        .await
    }

    pub async fn destroy_nexus(&self, uuid: VolumeId) -> Result<(), SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.destroy_nexus(&DestroyNexus {
            node: self.id.clone(),
            uuid,
        }))
        .await
    }

    pub async fn publish_nexus(&self, uuid: VolumeId, protocol: Protocol) -> Result<String, SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.publish_nexus(&PublishNexus {
            node: self.id.clone(),
            uuid,
            protocol,
        }))
        .await
    }

    pub async fn unpublish_nexus(&self, uuid: VolumeId) -> Result<(), SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.unpublish_nexus(&UnpublishNexus {
            node: self.id.clone(),
            uuid,
        }))
        .await
    }

    pub async fn child_operation(&self, nexus: VolumeId, uri: String, op: ChildOp) -> Result<(), SvcError> {
        let handle = self.connect().await?;
        self.with_deadline(handle.child_operation(&ChildOperation {
            node: self.id.clone(),
            nexus,
            uri,
            op,
        }))
        .await
    }
}
