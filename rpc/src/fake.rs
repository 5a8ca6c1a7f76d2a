//! An in-memory stand-in for a storage agent, used by `core`'s tests instead
//! of a real tonic transport. Mirrors the method surface of [`NodeHandle`]
//! against a small piece of shared state a test can mutate directly (e.g.
//! to simulate the node going offline).

use crate::{handle::*, request::*};
use async_trait::async_trait;
use common::{
    errors::SvcError,
    ids::{NodeId, PoolId, VolumeId},
    transport::{Child, ChildStatus, Nexus, NexusStatus, Pool, PoolStatus, Protocol, Replica, ReplicaStatus},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

#[derive(Default)]
struct State {
    online: bool,
    pools: HashMap<PoolId, Pool>,
    replicas: HashMap<(PoolId, VolumeId), Replica>,
    nexuses: HashMap<VolumeId, Nexus>,
}

/// Shared, clonable handle onto one fake agent's state.
#[derive(Clone)]
pub struct FakeAgent {
    node: NodeId,
    state: Arc<Mutex<State>>,
}

impl FakeAgent {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            state: Arc::new(Mutex::new(State {
                online: true,
                ..Default::default()
            })),
        }
    }

    /// Simulate the agent becoming unreachable; every subsequent call fails
    /// with `SvcError::Unavailable` until [`Self::set_online`] is called.
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Seed a pool directly, bypassing `create_pool`, to set up scenarios.
    pub fn seed_pool(&self, pool: Pool) {
        self.state.lock().pools.insert(pool.id.clone(), pool);
    }

    fn unavailable(&self) -> SvcError {
        SvcError::Unavailable {
            node: self.node.clone(),
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl NodeHandle for FakeAgent {
    async fn create_pool(&self, req: &CreatePool) -> Result<Pool, SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        if let Some(existing) = state.pools.get(&req.pool) {
            if existing.disks == req.disks {
                return Ok(existing.clone());
            }
            return Err(SvcError::PoolSpecConflict {
                pool: req.pool.clone(),
            });
        }
        let pool = Pool {
            id: req.pool.clone(),
            node: req.node.clone(),
            disks: req.disks.clone(),
            status: PoolStatus::Online,
            reason: String::new(),
            capacity: 100 * 1024 * 1024 * 1024,
            used: 0,
        };
        state.pools.insert(pool.id.clone(), pool.clone());
        Ok(pool)
    }

    async fn destroy_pool(&self, req: &DestroyPool) -> Result<(), SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        match state.pools.remove(&req.pool) {
            Some(_) => Ok(()),
            None => Err(SvcError::PoolNotFound {
                pool: req.pool.clone(),
            }),
        }
    }

    async fn list_pools(&self) -> Result<Vec<Pool>, SvcError> {
        let state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        Ok(state.pools.values().cloned().collect())
    }

    async fn create_replica(&self, req: &CreateReplica) -> Result<Replica, SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        let pool = state
            .pools
            .get_mut(&req.pool)
            .ok_or_else(|| SvcError::PoolNotFound {
                pool: req.pool.clone(),
            })?;
        if pool.free_space() < req.size {
            return Err(SvcError::NotEnoughPools { have: 0, need: 1 });
        }
        let key = (req.pool.clone(), req.uuid);
        if let Some(existing) = state.replicas.get(&key) {
            return Ok(existing.clone());
        }
        pool.used += req.size;
        let replica = Replica {
            uuid: req.uuid,
            pool: req.pool.clone(),
            node: req.node.clone(),
            size: req.size,
            share: Protocol::None,
            uri: format!("bdev:///{}", req.uuid),
            status: ReplicaStatus::Online,
        };
        state.replicas.insert(key, replica.clone());
        Ok(replica)
    }

    async fn destroy_replica(&self, req: &DestroyReplica) -> Result<(), SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        match state.replicas.remove(&(req.pool.clone(), req.uuid)) {
            Some(replica) => {
                if let Some(pool) = state.pools.get_mut(&req.pool) {
                    pool.used = pool.used.saturating_sub(replica.size);
                }
                Ok(())
            }
            None => Err(SvcError::ReplicaNotFound {
                uuid: req.uuid,
                pool: req.pool.clone(),
            }),
        }
    }

    async fn list_replicas(&self) -> Result<Vec<Replica>, SvcError> {
        let state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        Ok(state.replicas.values().cloned().collect())
    }

    async fn stat_replicas(&self) -> Result<Vec<ReplicaStats>, SvcError> {
        let state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        Ok(state
            .replicas
            .values()
            .map(|r| ReplicaStats {
                uuid: r.uuid,
                pool: r.pool.clone(),
                num_read_ops: 0,
                num_write_ops: 0,
                bytes_read: 0,
                bytes_written: 0,
            })
            .collect())
    }

    async fn share_replica(&self, req: &ShareReplica) -> Result<String, SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        let key = (req.pool.clone(), req.uuid);
        let replica = state
            .replicas
            .get_mut(&key)
            .ok_or_else(|| SvcError::ReplicaNotFound {
                uuid: req.uuid,
                pool: req.pool.clone(),
            })?;
        replica.share = req.protocol;
        replica.uri = match req.protocol {
            Protocol::None => format!("bdev:///{}", req.uuid),
            Protocol::Iscsi => format!("iscsi://{}/{}", req.node, req.uuid),
            Protocol::Nvmf => format!("nvmf://{}/{}", req.node, req.uuid),
        };
        Ok(replica.uri.clone())
    }

    async fn unshare_replica(&self, req: &UnshareReplica) -> Result<(), SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        let key = (req.pool.clone(), req.uuid);
        let replica = state
            .replicas
            .get_mut(&key)
            .ok_or_else(|| SvcError::ReplicaNotFound {
                uuid: req.uuid,
                pool: req.pool.clone(),
            })?;
        replica.share = Protocol::None;
        replica.uri = format!("bdev:///{}", req.uuid);
        Ok(())
    }

    async fn create_nexus(&self, req: &CreateNexus) -> Result<Nexus, SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        if let Some(existing) = state.nexuses.get(&req.uuid) {
            return Ok(existing.clone());
        }
        let nexus = Nexus {
            uuid: req.uuid,
            node: req.node.clone(),
            size: req.size,
            status: NexusStatus::Online,
            children: req
                .children
                .iter()
                .map(|uri| Child {
                    uri: uri.clone(),
                    status: ChildStatus::Online,
                })
                .collect(),
            device_path: None,
        };
        state.nexuses.insert(req.uuid, nexus.clone());
        Ok(nexus)
    }

    async fn destroy_nexus(&self, req: &DestroyNexus) -> Result<(), SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        match state.nexuses.remove(&req.uuid) {
            Some(_) => Ok(()),
            None => Err(SvcError::NexusNotFound { uuid: req.uuid }),
        }
    }

    async fn list_nexus(&self) -> Result<Vec<Nexus>, SvcError> {
        let state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        Ok(state.nexuses.values().cloned().collect())
    }

    async fn publish_nexus(&self, req: &PublishNexus) -> Result<String, SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        let nexus = state
            .nexuses
            .get_mut(&req.uuid)
            .ok_or(SvcError::NexusNotFound { uuid: req.uuid })?;
        let uri = match req.protocol {
            Protocol::None => format!("bdev:///{}", req.uuid),
            Protocol::Iscsi => format!("iscsi://{}/{}", req.node, req.uuid),
            Protocol::Nvmf => format!("nvmf://{}/{}", req.node, req.uuid),
        };
        nexus.device_path = Some(uri.clone());
        Ok(uri)
    }

    async fn unpublish_nexus(&self, req: &UnpublishNexus) -> Result<(), SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        let nexus = state
            .nexuses
            .get_mut(&req.uuid)
            .ok_or(SvcError::NexusNotFound { uuid: req.uuid })?;
        nexus.device_path = None;
        Ok(())
    }

    async fn child_operation(&self, req: &ChildOperation) -> Result<(), SvcError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(self.unavailable());
        }
        let nexus = state
            .nexuses
            .get_mut(&req.nexus)
            .ok_or(SvcError::NexusNotFound { uuid: req.nexus })?;
        match req.op {
            ChildOp::Add => nexus.children.push(Child {
                uri: req.uri.clone(),
                status: ChildStatus::Online,
            }),
            // ONLINE_CHILD doubles as the healing-path add (§4.6.3): a
            // replica rejoining the nexus after being newly created, or an
            // existing child coming back online, both land here.
            ChildOp::OnlineChild => match nexus.children.iter_mut().find(|c| c.uri == req.uri) {
                Some(child) => child.status = ChildStatus::Online,
                None => nexus.children.push(Child {
                    uri: req.uri.clone(),
                    status: ChildStatus::Online,
                }),
            },
            ChildOp::OfflineChild => {
                if let Some(child) = nexus.children.iter_mut().find(|c| c.uri == req.uri) {
                    child.status = ChildStatus::Faulted;
                }
            }
            ChildOp::RemoveChild => nexus.children.retain(|c| c.uri != req.uri),
        }
        Ok(())
    }
}

/// A [`HandleFactory`] over a fixed set of [`FakeAgent`]s, keyed by endpoint.
#[derive(Clone, Default)]
pub struct FakeFactory {
    agents: Arc<Mutex<HashMap<String, FakeAgent>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: &str, agent: FakeAgent) {
        self.agents.lock().insert(endpoint.to_string(), agent);
    }
}

#[async_trait]
impl HandleFactory for FakeFactory {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn NodeHandle>, SvcError> {
        let agent = self.agents.lock().get(endpoint).cloned();
        match agent {
            Some(agent) => Ok(Box::new(agent)),
            None => Err(SvcError::Internal {
                details: format!("no fake agent registered at '{endpoint}'"),
            }),
        }
    }
}
