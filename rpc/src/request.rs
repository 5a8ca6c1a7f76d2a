//! Request/response shapes for every [`crate::NodeHandle`] method (§4.1).

use common::{
    ids::{NodeId, PoolId, VolumeId},
    transport::Protocol,
};

#[derive(Debug, Clone)]
pub struct CreatePool {
    pub node: NodeId,
    pub pool: PoolId,
    pub disks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DestroyPool {
    pub node: NodeId,
    pub pool: PoolId,
}

#[derive(Debug, Clone)]
pub struct CreateReplica {
    pub node: NodeId,
    pub pool: PoolId,
    pub uuid: VolumeId,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct DestroyReplica {
    pub node: NodeId,
    pub pool: PoolId,
    pub uuid: VolumeId,
}

#[derive(Debug, Clone)]
pub struct ShareReplica {
    pub node: NodeId,
    pub pool: PoolId,
    pub uuid: VolumeId,
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct UnshareReplica {
    pub node: NodeId,
    pub pool: PoolId,
    pub uuid: VolumeId,
}

#[derive(Debug, Clone)]
pub struct CreateNexus {
    pub node: NodeId,
    pub uuid: VolumeId,
    pub size: u64,
    /// One child URI per replica, in the order they should be attached.
    pub children: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DestroyNexus {
    pub node: NodeId,
    pub uuid: VolumeId,
}

#[derive(Debug, Clone)]
pub struct PublishNexus {
    pub node: NodeId,
    pub uuid: VolumeId,
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct UnpublishNexus {
    pub node: NodeId,
    pub uuid: VolumeId,
}

/// A child is added or marked online/offline without being removed, per
/// §4.6.3/§3's invariant that an unreachable child is marked down, not
/// dropped.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChildOp {
    Add,
    OnlineChild,
    OfflineChild,
    RemoveChild,
}

#[derive(Debug, Clone)]
pub struct ChildOperation {
    pub node: NodeId,
    pub nexus: VolumeId,
    pub uri: String,
    pub op: ChildOp,
}

#[derive(Debug, Clone)]
pub struct ReplicaStats {
    pub uuid: VolumeId,
    pub pool: PoolId,
    pub num_read_ops: u64,
    pub num_write_ops: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}
