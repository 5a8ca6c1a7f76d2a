//! Wire-shape entities from the data model (§3) and the resource/status
//! records exchanged with the external CRD/CSI adapters (§6).

use crate::ids::{NodeId, PoolId, VolumeId};
use serde::{Deserialize, Serialize};

/// Connection state of a [`Node`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum NodeStatus {
    /// Registered but not yet synced.
    Init,
    Online,
    Offline,
}

/// A storage node (agent).
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// `host:port` of the agent's RPC endpoint.
    pub endpoint: String,
    pub status: NodeStatus,
}

/// Accessibility of a [`Pool`]. Ordered so that `Online > Degraded > Pending
/// > Offline`, used directly by the scheduler's ordering rule (§4.2.1).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum PoolStatus {
    Offline,
    Pending,
    Degraded,
    Online,
}

/// A pool, exclusively owned by one node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Pool {
    pub id: PoolId,
    pub node: NodeId,
    pub disks: Vec<String>,
    pub status: PoolStatus,
    pub reason: String,
    pub capacity: u64,
    pub used: u64,
}

impl Pool {
    /// `capacity - used`, saturating at zero (never negative; see invariant 1).
    pub fn free_space(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
    /// ONLINE or DEGRADED pools are usable for scheduling and capacity math.
    pub fn is_accessible(&self) -> bool {
        matches!(self.status, PoolStatus::Online | PoolStatus::Degraded)
    }
}

/// Replica share transport.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Protocol {
    #[default]
    None,
    Iscsi,
    Nvmf,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReplicaStatus {
    Online,
    Degraded,
    Faulted,
    Unknown,
}

/// A replica, identified by the uuid of the volume it belongs to.
/// Exclusively owned by one pool; at most one replica of a given volume
/// exists per pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Replica {
    pub uuid: VolumeId,
    pub pool: PoolId,
    pub node: NodeId,
    pub size: u64,
    pub share: Protocol,
    pub uri: String,
    pub status: ReplicaStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub enum NexusStatus {
    Online,
    Degraded,
    Faulted,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChildStatus {
    Online,
    Degraded,
    Faulted,
}

/// One replica URI attached to a nexus.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Child {
    pub uri: String,
    pub status: ChildStatus,
}

/// A nexus, identified by the volume's uuid, exclusively owned by one node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Nexus {
    pub uuid: VolumeId,
    pub node: NodeId,
    pub size: u64,
    pub status: NexusStatus,
    pub children: Vec<Child>,
    pub device_path: Option<String>,
}

/// Desired state of a volume (§3, §6).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub uuid: VolumeId,
    pub replica_count: u8,
    pub preferred_nodes: Vec<NodeId>,
    pub required_nodes: Vec<NodeId>,
    pub required_bytes: u64,
    pub limit_bytes: u64,
    pub protocol: Protocol,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub enum VolumeState {
    Pending,
    Healthy,
    Degraded,
    Faulted,
    Destroyed,
    Unknown,
}

/// Observed state of a volume. `replicas` names the pools currently hosting
/// a replica of this volume; the replica's own identity is always the
/// volume's uuid, so no separate replica id is tracked here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeStatus {
    pub state: VolumeState,
    pub size: u64,
    pub published_on: Option<NodeId>,
    pub replicas: Vec<PoolId>,
    pub nexus: Option<VolumeId>,
}

/// Declarative pool resource consumed by the Pool Operator (§6).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoolResourceSpec {
    pub name: PoolId,
    pub node: NodeId,
    pub disks: Vec<String>,
}

/// Status sub-object the Pool Operator writes back to the resource backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoolResourceStatus {
    pub state: PoolStatus,
    pub reason: String,
    pub capacity: u64,
    pub used: u64,
}

/// Status sub-object the Volume Manager writes back, used by `import_volume`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeResourceStatus {
    pub state: VolumeState,
    pub size: u64,
    pub target_nodes: Vec<NodeId>,
}
