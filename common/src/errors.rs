//! Error handling per §7: every error carries a [`StatusCode`] modeled on
//! the agent's RPC status enumeration, and the propagation policy described
//! there (idempotent ALREADY_EXISTS/NOT_FOUND, no inline retry on
//! UNAVAILABLE) is implemented by the call sites in `core`, not by this
//! module - this module only supplies the vocabulary.

use crate::ids::{NodeId, PoolId, VolumeId};
use snafu::Snafu;

/// Status code modeled on the agent's RPC enumeration (§7).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    ResourceExhausted,
    Internal,
    Unavailable,
}

/// Control plane error type. Every variant carries enough context to be
/// mapped back to a [`StatusCode`] via [`SvcError::code`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SvcError {
    #[snafu(display("Node '{}' not found", node))]
    NodeNotFound { node: NodeId },

    #[snafu(display("Node '{}' is not online", node))]
    NodeNotOnline { node: NodeId },

    #[snafu(display("Pool '{}' not found", pool))]
    PoolNotFound { pool: PoolId },

    #[snafu(display("Replica '{}' not found on pool '{}'", uuid, pool))]
    ReplicaNotFound { uuid: VolumeId, pool: PoolId },

    #[snafu(display("Nexus '{}' not found", uuid))]
    NexusNotFound { uuid: VolumeId },

    #[snafu(display("Volume '{}' has no reachable replica", uuid))]
    NoReachableReplica { uuid: VolumeId },

    #[snafu(display("Volume '{}' not found", uuid))]
    VolumeNotFound { uuid: VolumeId },

    #[snafu(display("Volume '{}' already exists", uuid))]
    VolumeAlreadyExists { uuid: VolumeId },

    #[snafu(display(
        "Disk path(s) invalid for pool '{}': {}",
        pool,
        reason
    ))]
    InvalidDiskPath { pool: PoolId, reason: String },

    #[snafu(display(
        "A different pool named '{}' already exists with different disks",
        pool
    ))]
    PoolSpecConflict { pool: PoolId },

    #[snafu(display("Not enough suitable pools available, {}/{}", have, need))]
    NotEnoughPools { have: usize, need: usize },

    #[snafu(display(
        "Volume '{}' required_bytes cannot shrink from {} to {}",
        uuid,
        from,
        to
    ))]
    VolumeSizeShrink { uuid: VolumeId, from: u64, to: u64 },

    #[snafu(display("Invalid arguments: {}", details))]
    InvalidArguments { details: String },

    #[snafu(display(
        "gRPC request '{}' to node '{}' failed: {}",
        request,
        node,
        source
    ))]
    GrpcRequest {
        node: NodeId,
        request: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("Node '{}' is unreachable: {}", node, reason))]
    Unavailable { node: NodeId, reason: String },

    #[snafu(display("Internal error: {}", details))]
    Internal { details: String },
}

impl SvcError {
    /// Map this error onto the §7 status code vocabulary.
    pub fn code(&self) -> StatusCode {
        match self {
            SvcError::NodeNotFound { .. }
            | SvcError::PoolNotFound { .. }
            | SvcError::ReplicaNotFound { .. }
            | SvcError::NexusNotFound { .. }
            | SvcError::VolumeNotFound { .. } => StatusCode::NotFound,
            SvcError::VolumeAlreadyExists { .. } => StatusCode::AlreadyExists,
            SvcError::InvalidDiskPath { .. }
            | SvcError::InvalidArguments { .. }
            | SvcError::VolumeSizeShrink { .. } => StatusCode::InvalidArgument,
            SvcError::PoolSpecConflict { .. }
            | SvcError::NodeNotOnline { .. }
            | SvcError::NoReachableReplica { .. } => StatusCode::FailedPrecondition,
            SvcError::NotEnoughPools { .. } => StatusCode::ResourceExhausted,
            SvcError::Unavailable { .. } => StatusCode::Unavailable,
            SvcError::GrpcRequest { .. } => StatusCode::Unknown,
            SvcError::Internal { .. } => StatusCode::Internal,
        }
    }

    /// §7: `ALREADY_EXISTS` on create paths is success with a warning.
    pub fn is_already_exists(&self) -> bool {
        self.code() == StatusCode::AlreadyExists
    }

    /// §7: `NOT_FOUND` on destroy paths is success.
    pub fn is_not_found(&self) -> bool {
        self.code() == StatusCode::NotFound
    }

    pub fn is_unavailable(&self) -> bool {
        self.code() == StatusCode::Unavailable
    }
}

/// Render the full causal chain of an error, one line per `source`, the way
/// the teacher's `ErrorChain` trait does for log messages.
pub trait ErrorChain {
    fn full_string(&self) -> String;
}

impl ErrorChain for SvcError {
    fn full_string(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}
