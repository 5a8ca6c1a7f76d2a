//! The Volume entity and its state machine (§4.6). This is the hardest
//! subsystem in the spec: each volume advances via an idempotent `fsa`
//! ("finite state advance", §9) driven by registry events and by the
//! explicit operator actions in §4.6.1. The public operations are written
//! out directly, the way `volume::service::Service::create_volume` drives
//! its own allocation loop in the teacher rather than going through a
//! generic action dispatcher; the reactive half (§4.6.2-§4.6.4) is expressed
//! as the small `Action` sum type the design notes call for, since that part
//! really is "compute the next action, apply it, re-evaluate".

use crate::core::{Registry, WorkQueue};
use crate::volume::store::VolumeStatusStore;
use common::{
    errors::SvcError,
    ids::{NodeId, PoolId, VolumeId},
    transport::{
        Child, ChildStatus, NodeStatus, Protocol, Replica, ReplicaStatus, VolumeResourceStatus,
        VolumeSpec, VolumeState, VolumeStatus,
    },
};
use rpc::request::ChildOp;
use std::collections::HashSet;
use std::sync::Arc;

/// One unit of reconciliation work (§9): `fsa` computes this from
/// `(spec, observed)`, applies it via one agent RPC, then re-evaluates.
/// Only the reactive half of the state machine (degraded healing, node-join
/// rebind) goes through this enum; `create`/`publish`/`unpublish`/`destroy`/
/// `update` are themselves the "operator actions" the design note
/// distinguishes from fsa's own driver loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateReplica { pool: PoolId },
    AddChild { node: NodeId, uri: String },
    Noop,
}

#[derive(Default)]
struct FsaGate {
    running: bool,
    pending: bool,
}

struct VolumeData {
    spec: VolumeSpec,
    status: VolumeStatus,
}

/// Per-volume finite-state automaton (§4.6) plus the entity data it guards.
/// `queue` serializes every mutating entry point - the public operations and
/// `fsa`'s own action application - against each other (§5, "per-volume fsa:
/// re-entrancy is suppressed"); `fsa_gate` additionally coalesces concurrent
/// *triggers* of `fsa` itself so a burst of events collapses into one extra
/// pass rather than queueing one per event.
pub struct Volume {
    uuid: VolumeId,
    registry: Arc<Registry>,
    status_store: Arc<dyn VolumeStatusStore>,
    queue: WorkQueue,
    fsa_gate: parking_lot::Mutex<FsaGate>,
    state: tokio::sync::Mutex<VolumeData>,
}

impl Volume {
    /// A freshly declared volume, not yet allocated (state Pending, no
    /// replicas, no nexus). `create()` is expected to be called next.
    pub fn new(
        uuid: VolumeId,
        spec: VolumeSpec,
        registry: Arc<Registry>,
        status_store: Arc<dyn VolumeStatusStore>,
    ) -> Arc<Self> {
        let status = VolumeStatus {
            state: VolumeState::Pending,
            size: 0,
            published_on: None,
            replicas: Vec::new(),
            nexus: None,
        };
        Arc::new(Self {
            uuid,
            registry,
            status_store,
            queue: WorkQueue::new(),
            fsa_gate: parking_lot::Mutex::new(FsaGate::default()),
            state: tokio::sync::Mutex::new(VolumeData { spec, status }),
        })
    }

    /// Reconstruct a volume from persisted status without allocating new
    /// components (§4.7, §12). `state` starts `Unknown` until the next
    /// `fsa` refreshes it against what the registry actually observes -
    /// `Unknown` is reserved for exactly this case (§4.6.2).
    pub fn import(
        uuid: VolumeId,
        spec: VolumeSpec,
        persisted: VolumeResourceStatus,
        registry: Arc<Registry>,
        status_store: Arc<dyn VolumeStatusStore>,
    ) -> Arc<Self> {
        let status = VolumeStatus {
            state: VolumeState::Unknown,
            size: persisted.size,
            published_on: persisted.target_nodes.first().cloned(),
            replicas: Vec::new(),
            nexus: None,
        };
        Arc::new(Self {
            uuid,
            registry,
            status_store,
            queue: WorkQueue::new(),
            fsa_gate: parking_lot::Mutex::new(FsaGate::default()),
            state: tokio::sync::Mutex::new(VolumeData { spec, status }),
        })
    }

    pub fn uuid(&self) -> VolumeId {
        self.uuid
    }

    pub async fn spec(&self) -> VolumeSpec {
        self.state.lock().await.spec.clone()
    }

    pub async fn status(&self) -> VolumeStatus {
        self.state.lock().await.status.clone()
    }

    async fn persist(&self, status: &VolumeStatus) {
        let resource = VolumeResourceStatus {
            state: status.state,
            size: status.size,
            target_nodes: status.published_on.clone().into_iter().collect(),
        };
        self.status_store.write_status(self.uuid, resource).await;
    }

    async fn node_online(&self, node: &NodeId) -> bool {
        self.registry
            .get_node(node)
            .await
            .map(|n| n.status == NodeStatus::Online)
            .unwrap_or(false)
    }

    /// Force the Registry to refresh its cached view of `node` right after a
    /// mutation, the way the Pool Operator does after `create_pool`/
    /// `destroy_pool` (see `Registry::sync_node_now`'s doc comment) - without
    /// this, `get_replica_set`/`get_nexus` would keep returning whatever the
    /// node's last periodic sync observed, not what was just created.
    async fn touch(&self, node: &NodeId) {
        if let Err(err) = self.registry.sync_node_now(node).await {
            tracing::warn!(volume.uuid = %self.uuid, node = %node, error = %err, "post-mutation sync failed");
        }
    }

    // -- §4.6.1 public operations --

    /// `create()`: allocate replicas until `|replicas| = replicaCount`, on
    /// distinct nodes, via the scheduler. Idempotent - a volume that already
    /// has replicas is left alone.
    #[tracing::instrument(level = "debug", skip(self), fields(volume.uuid = %self.uuid), err)]
    pub async fn create(&self) -> Result<(), SvcError> {
        self.queue.run(|| self.create_inner()).await
    }

    async fn create_inner(&self) -> Result<(), SvcError> {
        let spec = {
            let data = self.state.lock().await;
            if !data.status.replicas.is_empty() {
                return Ok(());
            }
            data.spec.clone()
        };
        let pools = self
            .registry
            .choose_pools(
                spec.required_bytes,
                &spec.required_nodes,
                &spec.preferred_nodes,
                &HashSet::new(),
            )
            .await;
        if (pools.len() as u8) < spec.replica_count {
            return Err(SvcError::NotEnoughPools {
                have: pools.len(),
                need: spec.replica_count as usize,
            });
        }
        let mut created: Vec<Replica> = Vec::new();
        for pool in pools.into_iter().take(spec.replica_count as usize) {
            match self
                .registry
                .create_replica(&pool.node, pool.id.clone(), self.uuid, spec.required_bytes)
                .await
            {
                Ok(replica) => {
                    self.touch(&replica.node).await;
                    created.push(replica);
                }
                Err(err) => {
                    for r in &created {
                        let _ = self.registry.destroy_replica(&r.node, r.pool.clone(), self.uuid).await;
                        self.touch(&r.node).await;
                    }
                    return Err(err);
                }
            }
        }
        let status_snapshot = {
            let mut data = self.state.lock().await;
            data.status.size = spec.required_bytes;
            data.status.replicas = created.iter().map(|r| r.pool.clone()).collect();
            data.status.state = if created.len() as u8 == spec.replica_count {
                VolumeState::Healthy
            } else {
                VolumeState::Degraded
            };
            data.status.clone()
        };
        self.persist(&status_snapshot).await;
        Ok(())
    }

    /// `publish(protocol)` (§4.6.1): pick the nexus host, share every remote
    /// replica to match the nexus's transport, create the nexus if needed,
    /// then publish it. Idempotent across an already-published volume with
    /// the same children.
    #[tracing::instrument(level = "debug", skip(self), fields(volume.uuid = %self.uuid), err)]
    pub async fn publish(&self, protocol: Protocol) -> Result<String, SvcError> {
        self.queue.run(|| self.publish_inner(protocol)).await
    }

    async fn publish_inner(&self, protocol: Protocol) -> Result<String, SvcError> {
        let status = { self.state.lock().await.status.clone() };
        let replicas = self.registry.get_replica_set(self.uuid).await;
        let host = self.pick_nexus_host(&status, &replicas).await?;

        let share_protocol = match protocol {
            Protocol::None => Protocol::Nvmf,
            other => other,
        };
        let mut children = Vec::with_capacity(replicas.len());
        for replica in &replicas {
            let uri = if replica.node == host {
                replica.uri.clone()
            } else {
                let uri = self
                    .registry
                    .share_replica(&replica.node, replica.pool.clone(), self.uuid, share_protocol)
                    .await?;
                self.touch(&replica.node).await;
                uri
            };
            children.push(uri);
        }

        match self.registry.get_nexus(self.uuid).await {
            Some(nexus) if nexus.node == host => {}
            _ => {
                match self
                    .registry
                    .create_nexus(&host, self.uuid, status.size, children)
                    .await
                {
                    Ok(_) => self.touch(&host).await,
                    Err(err) if err.is_already_exists() => {}
                    Err(err) => return Err(err),
                }
            }
        }

        let uri = match self.registry.publish_nexus(&host, self.uuid, protocol).await {
            Ok(uri) => {
                self.touch(&host).await;
                uri
            }
            Err(err) if err.is_already_exists() => match self.registry.get_nexus(self.uuid).await {
                Some(nexus) => nexus.device_path.unwrap_or_default(),
                None => return Err(err),
            },
            Err(err) => return Err(err),
        };

        let status_snapshot = {
            let mut data = self.state.lock().await;
            data.status.published_on = Some(host);
            data.status.nexus = Some(self.uuid);
            data.status.clone()
        };
        self.persist(&status_snapshot).await;
        Ok(uri)
    }

    /// Host preference order (§4.6.1): (a) current `publishedOn` if still
    /// reachable, (b) a node hosting a local replica, preferring ONLINE
    /// pools, (c) any node with a reachable replica.
    async fn pick_nexus_host(&self, status: &VolumeStatus, replicas: &[Replica]) -> Result<NodeId, SvcError> {
        if let Some(node) = &status.published_on {
            if self.node_online(node).await {
                return Ok(node.clone());
            }
        }
        let mut reachable: Vec<&Replica> = Vec::new();
        for replica in replicas {
            if self.node_online(&replica.node).await {
                reachable.push(replica);
            }
        }
        if reachable.is_empty() {
            return Err(SvcError::NoReachableReplica { uuid: self.uuid });
        }
        let mut best: Option<(&Replica, bool)> = None;
        for replica in &reachable {
            let pool_online = self
                .registry
                .get_pool(&replica.pool)
                .await
                .map(|p| p.status == common::transport::PoolStatus::Online)
                .unwrap_or(false);
            match best {
                Some((_, best_online)) if best_online && !pool_online => {}
                _ => best = Some((replica, pool_online)),
            }
        }
        Ok(best.expect("reachable is non-empty").0.node.clone())
    }

    /// `unpublish()` (§4.6.1): tear down the nexus and unshare its remote
    /// replicas. Idempotent across a missing nexus/host.
    #[tracing::instrument(level = "debug", skip(self), fields(volume.uuid = %self.uuid), err)]
    pub async fn unpublish(&self) -> Result<(), SvcError> {
        self.queue.run(|| self.unpublish_inner()).await
    }

    async fn unpublish_inner(&self) -> Result<(), SvcError> {
        let host = { self.state.lock().await.status.published_on.clone() };
        let Some(host) = host else { return Ok(()) };

        if let Err(err) = self.registry.unpublish_nexus(&host, self.uuid).await {
            if !err.is_not_found() {
                return Err(err);
            }
        }
        if let Err(err) = self.registry.destroy_nexus(&host, self.uuid).await {
            if !err.is_not_found() {
                return Err(err);
            }
        }
        self.touch(&host).await;
        let replicas = self.registry.get_replica_set(self.uuid).await;
        for replica in replicas {
            if replica.node != host {
                let _ = self
                    .registry
                    .unshare_replica(&replica.node, replica.pool.clone(), self.uuid)
                    .await;
                self.touch(&replica.node).await;
            }
        }
        let status_snapshot = {
            let mut data = self.state.lock().await;
            data.status.published_on = None;
            data.status.nexus = None;
            data.status.clone()
        };
        self.persist(&status_snapshot).await;
        Ok(())
    }

    /// `destroy()` (§4.6.1): unpublish (tolerant), then destroy every
    /// replica. Terminal - transitions the volume to `Destroyed`.
    #[tracing::instrument(level = "debug", skip(self), fields(volume.uuid = %self.uuid), err)]
    pub async fn destroy(&self) -> Result<(), SvcError> {
        self.queue.run(|| self.destroy_inner()).await
    }

    async fn destroy_inner(&self) -> Result<(), SvcError> {
        if self.unpublish_inner().await.is_err() {
            tracing::warn!(volume.uuid = %self.uuid, "unpublish during destroy failed, continuing");
        }
        let replicas = self.registry.get_replica_set(self.uuid).await;
        for replica in replicas {
            match self.registry.destroy_replica(&replica.node, replica.pool.clone(), self.uuid).await {
                Ok(()) => self.touch(&replica.node).await,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        let status_snapshot = {
            let mut data = self.state.lock().await;
            data.status.state = VolumeState::Destroyed;
            data.status.replicas.clear();
            data.status.clone()
        };
        self.persist(&status_snapshot).await;
        Ok(())
    }

    /// `update(spec)` (§4.6.1): recompute desired state. `requiredBytes`
    /// cannot shrink; a replica-count change scales up (new replicas,
    /// scheduled away from nodes that already host one) or down (dropping
    /// least-preferred replicas: non-local to the nexus host first, then
    /// DEGRADED, then whatever remains).
    #[tracing::instrument(level = "debug", skip(self, spec), fields(volume.uuid = %self.uuid), err)]
    pub async fn update(&self, spec: VolumeSpec) -> Result<(), SvcError> {
        self.queue.run(|| self.update_inner(spec)).await
    }

    async fn update_inner(&self, spec: VolumeSpec) -> Result<(), SvcError> {
        let old_count = {
            let mut data = self.state.lock().await;
            if spec.required_bytes < data.spec.required_bytes {
                return Err(SvcError::VolumeSizeShrink {
                    uuid: self.uuid,
                    from: data.spec.required_bytes,
                    to: spec.required_bytes,
                });
            }
            let old_count = data.spec.replica_count;
            data.spec = spec.clone();
            old_count
        };
        if spec.replica_count > old_count {
            self.scale_up(spec.replica_count - old_count).await?;
        } else if spec.replica_count < old_count {
            self.scale_down(old_count - spec.replica_count).await?;
        }
        Ok(())
    }

    async fn scale_up(&self, additional: u8) -> Result<(), SvcError> {
        let (spec, host) = {
            let data = self.state.lock().await;
            (data.spec.clone(), data.status.published_on.clone())
        };
        let replicas = self.registry.get_replica_set(self.uuid).await;
        let exclude: HashSet<NodeId> = replicas.iter().map(|r| r.node.clone()).collect();
        let pools = self
            .registry
            .choose_pools(spec.required_bytes, &spec.required_nodes, &spec.preferred_nodes, &exclude)
            .await;
        if (pools.len() as u8) < additional {
            return Err(SvcError::NotEnoughPools {
                have: pools.len(),
                need: additional as usize,
            });
        }
        for pool in pools.into_iter().take(additional as usize) {
            let replica = self
                .registry
                .create_replica(&pool.node, pool.id.clone(), self.uuid, spec.required_bytes)
                .await?;
            self.touch(&replica.node).await;
            if let Some(host) = &host {
                let uri = if replica.node == *host {
                    replica.uri.clone()
                } else {
                    let uri = self
                        .registry
                        .share_replica(&replica.node, replica.pool.clone(), self.uuid, Protocol::Nvmf)
                        .await?;
                    self.touch(&replica.node).await;
                    uri
                };
                self.registry.child_operation(host, self.uuid, uri, ChildOp::OnlineChild).await?;
                self.touch(host).await;
            }
        }
        self.recompute_status().await;
        Ok(())
    }

    async fn scale_down(&self, excess: u8) -> Result<(), SvcError> {
        let host = { self.state.lock().await.status.published_on.clone() };
        let mut replicas = self.registry.get_replica_set(self.uuid).await;
        replicas.sort_by_key(|r| {
            let local_to_host = host.as_ref().map(|h| &r.node == h).unwrap_or(false);
            let healthy = r.status != ReplicaStatus::Degraded;
            (local_to_host, healthy)
        });
        for replica in replicas.into_iter().take(excess as usize) {
            if let Some(host) = &host {
                let _ = self
                    .registry
                    .child_operation(host, self.uuid, replica.uri.clone(), ChildOp::RemoveChild)
                    .await;
                self.touch(host).await;
            }
            match self.registry.destroy_replica(&replica.node, replica.pool.clone(), self.uuid).await {
                Ok(()) => self.touch(&replica.node).await,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        self.recompute_status().await;
        Ok(())
    }

    // -- §4.6.2-§4.6.4 reactive state machine, driven by `fsa` --

    /// Idempotent reconciliation step (§9 "fsa"). Safe to call as often as
    /// registry events arrive: re-entrancy is suppressed - a call arriving
    /// while one is already running just marks it dirty for one more pass.
    pub async fn fsa(&self) {
        {
            let mut gate = self.fsa_gate.lock();
            if gate.running {
                gate.pending = true;
                return;
            }
            gate.running = true;
        }
        loop {
            let progressed = self.queue.run(|| self.fsa_step()).await;
            if progressed {
                continue;
            }
            let mut gate = self.fsa_gate.lock();
            if gate.pending {
                gate.pending = false;
                continue;
            }
            gate.running = false;
            break;
        }
    }

    /// One pass: recompute observed state (§4.6.2), then - if Degraded and
    /// short of `replicaCount` - attempt to heal (§4.6.3). Returns whether an
    /// action was applied, so the `fsa` driver loop knows to re-evaluate
    /// immediately rather than wait for the next external trigger.
    async fn fsa_step(&self) -> bool {
        self.recompute_status().await;
        let action = self.next_action().await;
        if action == Action::Noop {
            return false;
        }
        self.apply_action(action).await;
        self.recompute_status().await;
        true
    }

    async fn next_action(&self) -> Action {
        let (spec, status) = {
            let data = self.state.lock().await;
            (data.spec.clone(), data.status.clone())
        };
        if status.state != VolumeState::Degraded {
            return Action::Noop;
        }
        let replicas = self.registry.get_replica_set(self.uuid).await;
        if replicas.len() as u8 >= spec.replica_count {
            // enough replicas exist already; waiting on a node to come back,
            // not on a new one to be scheduled.
            return Action::Noop;
        }
        let exclude: HashSet<NodeId> = replicas.iter().map(|r| r.node.clone()).collect();
        let candidates = self
            .registry
            .choose_pools(spec.required_bytes, &spec.required_nodes, &spec.preferred_nodes, &exclude)
            .await;
        match candidates.into_iter().next() {
            Some(pool) => Action::CreateReplica { pool: pool.id },
            None => Action::Noop,
        }
    }

    async fn apply_action(&self, action: Action) {
        match action {
            Action::CreateReplica { pool } => {
                let spec = { self.state.lock().await.spec.clone() };
                let pool_entity = match self.registry.get_pool(&pool).await {
                    Some(p) => p,
                    None => return,
                };
                let replica = match self
                    .registry
                    .create_replica(&pool_entity.node, pool, self.uuid, spec.required_bytes)
                    .await
                {
                    Ok(replica) => replica,
                    Err(err) => {
                        tracing::warn!(volume.uuid = %self.uuid, error = %err, "healing replica creation failed");
                        return;
                    }
                };
                self.touch(&replica.node).await;
                let host = { self.state.lock().await.status.published_on.clone() };
                let Some(host) = host else { return };
                if self.registry.get_nexus(self.uuid).await.is_none() {
                    return;
                }
                let uri = if replica.node == host {
                    replica.uri.clone()
                } else {
                    match self
                        .registry
                        .share_replica(&replica.node, replica.pool.clone(), self.uuid, Protocol::Nvmf)
                        .await
                    {
                        Ok(uri) => {
                            self.touch(&replica.node).await;
                            uri
                        }
                        Err(err) => {
                            tracing::warn!(volume.uuid = %self.uuid, error = %err, "healing replica share failed");
                            return;
                        }
                    }
                };
                self.apply_add_child(&host, uri).await;
            }
            Action::AddChild { node, uri } => self.apply_add_child(&node, uri).await,
            Action::Noop => {}
        }
    }

    async fn apply_add_child(&self, host: &NodeId, uri: String) {
        if let Err(err) = self.registry.child_operation(host, self.uuid, uri, ChildOp::OnlineChild).await {
            tracing::warn!(volume.uuid = %self.uuid, error = %err, "failed adding healed replica to nexus");
        }
    }

    /// Recompute `state`/`replicas`/`nexus` from what the registry currently
    /// observes (§4.6.2). `nexus` is an identity reference only, so a node
    /// coming back online needs no special "rebind" step (§4.6.4): the next
    /// lookup through the registry already finds the live object. Also
    /// reconciles nexus child status against replica reachability (§3
    /// invariant (d), §4.6.3): an unreachable replica's child is marked down
    /// via `OFFLINE_CHILD`, never removed, and brought back with
    /// `ONLINE_CHILD` once its node rejoins.
    async fn recompute_status(&self) {
        let spec = { self.state.lock().await.spec.clone() };
        let replicas = self.registry.get_replica_set(self.uuid).await;
        let mut reachable = 0usize;
        let mut reachability = Vec::with_capacity(replicas.len());
        for replica in &replicas {
            let online = self.node_online(&replica.node).await;
            if online {
                reachable += 1;
            }
            reachability.push(online);
        }
        let total = replicas.len();
        let nexus = self.registry.get_nexus(self.uuid).await;

        if let Some(nexus) = &nexus {
            self.sync_nexus_children(&nexus.node, &nexus.children, &replicas, &reachability).await;
        }

        let status_snapshot = {
            let mut data = self.state.lock().await;
            if data.status.state != VolumeState::Destroyed {
                data.status.state = if total == 0 {
                    VolumeState::Pending
                } else if reachable == 0 {
                    VolumeState::Faulted
                } else if total as u8 == spec.replica_count && reachable == total {
                    VolumeState::Healthy
                } else {
                    VolumeState::Degraded
                };
                data.status.replicas = replicas.iter().map(|r| r.pool.clone()).collect();
                data.status.nexus = if nexus.is_some() { Some(self.uuid) } else { None };
            }
            data.status.clone()
        };
        self.persist(&status_snapshot).await;
    }

    /// Bring each nexus child's status in line with its replica's current
    /// reachability (§3 invariant (d), §4.6.3): never remove a child just
    /// because its node went offline, only flip it between online/faulted.
    async fn sync_nexus_children(
        &self,
        host: &NodeId,
        children: &[Child],
        replicas: &[Replica],
        reachability: &[bool],
    ) {
        for (replica, &online) in replicas.iter().zip(reachability) {
            let Some(child) = children.iter().find(|c| c.uri == replica.uri) else {
                continue;
            };
            let is_online = child.status == ChildStatus::Online;
            if online && !is_online {
                match self
                    .registry
                    .child_operation(host, self.uuid, replica.uri.clone(), ChildOp::OnlineChild)
                    .await
                {
                    Ok(()) => self.touch(host).await,
                    Err(err) => {
                        tracing::warn!(volume.uuid = %self.uuid, error = %err, "failed onlining rejoined child")
                    }
                }
            } else if !online && is_online {
                match self
                    .registry
                    .child_operation(host, self.uuid, replica.uri.clone(), ChildOp::OfflineChild)
                    .await
                {
                    Ok(()) => self.touch(host).await,
                    Err(err) => {
                        tracing::warn!(volume.uuid = %self.uuid, error = %err, "failed offlining unreachable child")
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::volume::store::InMemoryVolumeStatusStore;
    use common::ids::PoolId;
    use common::transport::PoolStatus;
    use rpc::fake::{FakeAgent, FakeFactory};

    fn spec(replica_count: u8, required_bytes: u64) -> VolumeSpec {
        VolumeSpec {
            uuid: VolumeId::new(),
            replica_count,
            preferred_nodes: vec![],
            required_nodes: vec![],
            required_bytes,
            limit_bytes: 0,
            protocol: Protocol::Nvmf,
        }
    }

    async fn single_node_registry() -> (Arc<Registry>, FakeAgent) {
        let factory = FakeFactory::new();
        let agent = FakeAgent::new(NodeId::from("n1"));
        factory.register("n1:10124", agent.clone());
        let registry = Arc::new(Registry::new(Arc::new(factory), Config::default()));
        registry.add_node(NodeId::from("n1"), "n1:10124".to_string()).await;
        registry.sync_node_now(&NodeId::from("n1")).await.unwrap();
        (registry, agent)
    }

    #[tokio::test]
    async fn create_allocates_replica_and_goes_healthy() {
        let (registry, agent) = single_node_registry().await;
        agent.seed_pool(common::transport::Pool {
            id: PoolId::from("p1"),
            node: NodeId::from("n1"),
            disks: vec!["/dev/sda".into()],
            status: PoolStatus::Online,
            reason: String::new(),
            capacity: 100,
            used: 0,
        });
        registry.sync_node_now(&NodeId::from("n1")).await.unwrap();

        let store = Arc::new(InMemoryVolumeStatusStore::new());
        let s = spec(1, 10);
        let volume = Volume::new(s.uuid, s, registry.clone(), store);
        volume.create().await.unwrap();

        let status = volume.status().await;
        assert_eq!(status.state, VolumeState::Healthy);
        assert_eq!(status.replicas.len(), 1);
        assert_eq!(status.size, 10);
    }

    #[tokio::test]
    async fn create_fails_resource_exhausted_with_no_matching_pool() {
        let (registry, _agent) = single_node_registry().await;
        let store = Arc::new(InMemoryVolumeStatusStore::new());
        let mut s = spec(1, 10);
        s.required_nodes = vec![NodeId::from("n2")];
        let volume = Volume::new(s.uuid, s, registry, store);
        let err = volume.create().await.unwrap_err();
        assert_eq!(err.code(), common::errors::StatusCode::ResourceExhausted);
    }

    #[tokio::test]
    async fn publish_then_publish_again_is_idempotent() {
        let (registry, agent) = single_node_registry().await;
        agent.seed_pool(common::transport::Pool {
            id: PoolId::from("p1"),
            node: NodeId::from("n1"),
            disks: vec!["/dev/sda".into()],
            status: PoolStatus::Online,
            reason: String::new(),
            capacity: 100,
            used: 0,
        });
        registry.sync_node_now(&NodeId::from("n1")).await.unwrap();

        let store = Arc::new(InMemoryVolumeStatusStore::new());
        let s = spec(1, 10);
        let volume = Volume::new(s.uuid, s, registry.clone(), store);
        volume.create().await.unwrap();

        let uri1 = volume.publish(Protocol::Nvmf).await.unwrap();
        let uri2 = volume.publish(Protocol::Nvmf).await.unwrap();
        assert_eq!(uri1, uri2);
        let nexuses = registry.get_nexus(volume.uuid()).await;
        assert!(nexuses.is_some());
    }

    #[tokio::test]
    async fn destroy_then_destroy_again_is_idempotent() {
        let (registry, agent) = single_node_registry().await;
        agent.seed_pool(common::transport::Pool {
            id: PoolId::from("p1"),
            node: NodeId::from("n1"),
            disks: vec!["/dev/sda".into()],
            status: PoolStatus::Online,
            reason: String::new(),
            capacity: 100,
            used: 0,
        });
        registry.sync_node_now(&NodeId::from("n1")).await.unwrap();

        let store = Arc::new(InMemoryVolumeStatusStore::new());
        let s = spec(1, 10);
        let volume = Volume::new(s.uuid, s, registry.clone(), store);
        volume.create().await.unwrap();
        volume.destroy().await.unwrap();
        volume.destroy().await.unwrap();
        assert_eq!(volume.status().await.state, VolumeState::Destroyed);
    }
}
