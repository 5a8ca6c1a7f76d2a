//! The agent RPC surface (§4.1). A [`Handle`] is a scoped acquisition of a
//! connection to one agent: obtain it via [`HandleFactory::connect`], issue
//! one or more typed calls, and drop it when done - the concrete transport
//! (tonic, in production) tears down the underlying channel on `Drop`, the
//! same way `core::grpc::GrpcClient` in the teacher owns its channel for the
//! lifetime of the wrapper that created it.

use crate::request::*;
use async_trait::async_trait;
use common::{
    errors::SvcError,
    transport::{Nexus, Pool, Replica},
};
use std::time::Duration;

/// Default per-call RPC deadline (§5).
pub const DEFAULT_RPC_DEADLINE: Duration = Duration::from_secs(10);

/// Typed request/response surface of one agent, mapping 1:1 onto the
/// service methods named in §4.1. Every call fails with an [`SvcError`]
/// carrying a status code (§7).
#[async_trait]
pub trait NodeHandle: Send + Sync {
    async fn create_pool(&self, req: &CreatePool) -> Result<Pool, SvcError>;
    async fn destroy_pool(&self, req: &DestroyPool) -> Result<(), SvcError>;
    async fn list_pools(&self) -> Result<Vec<Pool>, SvcError>;

    async fn create_replica(&self, req: &CreateReplica) -> Result<Replica, SvcError>;
    async fn destroy_replica(&self, req: &DestroyReplica) -> Result<(), SvcError>;
    async fn list_replicas(&self) -> Result<Vec<Replica>, SvcError>;
    async fn stat_replicas(&self) -> Result<Vec<ReplicaStats>, SvcError>;
    async fn share_replica(&self, req: &ShareReplica) -> Result<String, SvcError>;
    async fn unshare_replica(&self, req: &UnshareReplica) -> Result<(), SvcError>;

    async fn create_nexus(&self, req: &CreateNexus) -> Result<Nexus, SvcError>;
    async fn destroy_nexus(&self, req: &DestroyNexus) -> Result<(), SvcError>;
    async fn list_nexus(&self) -> Result<Vec<Nexus>, SvcError>;
    async fn publish_nexus(&self, req: &PublishNexus) -> Result<String, SvcError>;
    async fn unpublish_nexus(&self, req: &UnpublishNexus) -> Result<(), SvcError>;
    async fn child_operation(&self, req: &ChildOperation) -> Result<(), SvcError>;
}

/// Opens a [`Handle`] (here, a `dyn NodeHandle`) to an agent at `endpoint`.
/// Production code implements this against `tonic::transport::Channel`, the
/// way `core::grpc::GrpcContext::connect` does in the teacher; tests use
/// [`crate::fake::FakeAgent`].
#[async_trait]
pub trait HandleFactory: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn NodeHandle>, SvcError>;
}
