//! Pool Operator: reconciles declarative pool resources with agent state
//! (§4.5). Pool/Replica entity projections themselves live on
//! [`crate::node::NodeWrapper`], which is where the agent-observed truth is
//! merged (§4.1, §3).

pub mod operator;
pub mod resource;

pub use operator::PoolOperator;
pub use resource::{validate_disks, NodeLifecycleEvent, NullStatusSink, PoolStatusSink};
