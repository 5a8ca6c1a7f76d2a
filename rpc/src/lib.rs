//! Wire contract between the control plane and the per-node storage agent
//! (§4.1). This crate only defines the typed request/response surface and
//! the [`handle::NodeHandle`]/[`handle::HandleFactory`] traits; `core` is
//! the only caller of production note, and tests drive it against
//! [`fake::FakeAgent`] instead of a real transport.

pub mod fake;
pub mod handle;
pub mod request;

pub use handle::{HandleFactory, NodeHandle, DEFAULT_RPC_DEADLINE};
