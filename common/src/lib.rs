//! Shared identifiers, wire-shape entities and error types for the MOAC
//! control plane. Kept dependency-light so both the `rpc` and `core` crates
//! can build on it without pulling in a transport stack.

pub mod errors;
pub mod ids;
pub mod transport;

pub use errors::{ErrorChain, SvcError};
pub use ids::{NodeId, PoolId, ReplicaId, VolumeId};
