//! Persistence side-channel for Volume status (§4.7, §12). `Volume::import`
//! reconstructs a volume at startup from whatever was last written here,
//! without allocating new components; an external etcd-backed store (the
//! later forks' `pstor`) can be substituted without touching the engine.

use async_trait::async_trait;
use common::{ids::VolumeId, transport::VolumeResourceStatus};
use parking_lot::Mutex;
use std::collections::HashMap;

#[async_trait]
pub trait VolumeStatusStore: Send + Sync {
    async fn write_status(&self, uuid: VolumeId, status: VolumeResourceStatus);
    async fn list(&self) -> Vec<(VolumeId, VolumeResourceStatus)>;
}

/// In-memory implementation used by tests and by any deployment that hasn't
/// wired up a real backend yet.
#[derive(Default)]
pub struct InMemoryVolumeStatusStore {
    entries: Mutex<HashMap<VolumeId, VolumeResourceStatus>>,
}

impl InMemoryVolumeStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolumeStatusStore for InMemoryVolumeStatusStore {
    async fn write_status(&self, uuid: VolumeId, status: VolumeResourceStatus) {
        self.entries.lock().insert(uuid, status);
    }

    async fn list(&self) -> Vec<(VolumeId, VolumeResourceStatus)> {
        self.entries.lock().iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}
