//! Contracts and validation shared by the Pool Operator (§4.5, §6).

use common::ids::PoolId;

/// §12: concrete rule behind §4.5.1's "validate absolute path" requirement.
/// A disk is accepted only if it is an absolute path under `/dev/` with no
/// `..` component, and at least one disk must be given.
pub fn validate_disks(disks: &[String]) -> Result<(), String> {
    if disks.is_empty() {
        return Err("no disks specified".to_string());
    }
    for disk in disks {
        let path = std::path::Path::new(disk);
        if !path.is_absolute() {
            return Err(format!("disk path '{disk}' is not absolute"));
        }
        if !disk.starts_with("/dev/") {
            return Err(format!("disk path '{disk}' is not under /dev/"));
        }
        if path.components().any(|c| c == std::path::Component::ParentDir) {
            return Err(format!("disk path '{disk}' contains '..'"));
        }
    }
    Ok(())
}

/// An add/remove event from the node-discovery surface (§6), as seen by the
/// Pool Operator. Queued during startup (§4.5, step 2) rather than applied
/// immediately.
#[derive(Debug, Clone)]
pub enum NodeLifecycleEvent {
    Add { id: common::ids::NodeId, endpoint: String },
    Remove { id: common::ids::NodeId },
}

/// Where the Pool Operator writes pool status back to (§4.5.2: "best-effort,
/// no exception propagates"). An external CRD layer implements this against
/// the real resource backend; tests use an in-memory implementation.
#[async_trait::async_trait]
pub trait PoolStatusSink: Send + Sync {
    async fn write_status(&self, name: &PoolId, status: common::transport::PoolResourceStatus);
}

/// A sink that drops every write, used where status reporting is genuinely
/// not wired up (e.g. a unit test only asserting on agent-side calls).
pub struct NullStatusSink;

#[async_trait::async_trait]
impl PoolStatusSink for NullStatusSink {
    async fn write_status(&self, _name: &PoolId, _status: common::transport::PoolResourceStatus) {}
}
