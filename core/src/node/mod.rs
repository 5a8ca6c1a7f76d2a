//! Node and its observed Pool/Replica/Nexus projections (§4.1, §3).

pub mod wrapper;

pub use wrapper::NodeWrapper;
