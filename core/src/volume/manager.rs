//! Volume Manager (§4.7): owns the set of Volumes by uuid, subscribes to the
//! Registry's Event Stream and routes events to the volume(s) they concern,
//! the way `volume::service::Service` in the teacher is the single place
//! that turns bus requests into calls onto node wrappers - except here the
//! routing target is a long-lived per-volume state machine instead of a
//! one-shot RPC.

use crate::core::{
    events::{EventKind, EventType, ObjectRef},
    Registry, WorkQueue,
};
use crate::volume::entity::Volume;
use crate::volume::store::VolumeStatusStore;
use common::{
    errors::SvcError,
    ids::{NodeId, VolumeId},
    transport::{Protocol, VolumeResourceStatus, VolumeSpec, VolumeState, VolumeStatus},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A point-in-time snapshot of one volume, for the `list()` CSI surface
/// (§6).
#[derive(Debug, Clone)]
pub struct VolumeSummary {
    pub uuid: VolumeId,
    pub spec: VolumeSpec,
    pub status: VolumeStatus,
}

pub struct VolumeManager {
    registry: Arc<Registry>,
    status_store: Arc<dyn VolumeStatusStore>,
    volumes: RwLock<HashMap<VolumeId, Arc<Volume>>>,
    /// Serializes `createVolume` cluster-wide so two concurrent creates never
    /// see the same pool free space and double-book capacity (§5).
    create_queue: WorkQueue,
    shutting_down: AtomicBool,
    event_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl VolumeManager {
    pub fn new(registry: Arc<Registry>, status_store: Arc<dyn VolumeStatusStore>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            status_store,
            volumes: RwLock::new(HashMap::new()),
            create_queue: WorkQueue::new(),
            shutting_down: AtomicBool::new(false),
            event_task: parking_lot::Mutex::new(None),
        })
    }

    /// Subscribe to the registry's Event Stream and begin routing events to
    /// volumes (§4.7). Call once at startup, after any `import_volume` calls
    /// the external CRD adapter makes for volumes it already knows about.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut stream = this.registry.subscribe().await;
            while let Some(event) = stream.next().await {
                this.dispatch(event).await;
            }
        });
        *self.event_task.lock() = Some(task);
    }

    fn get(&self, uuid: VolumeId) -> Option<Arc<Volume>> {
        self.volumes.read().get(&uuid).cloned()
    }

    async fn dispatch(&self, event: crate::core::Event) {
        match (event.kind, event.event_type, event.reference) {
            (EventKind::Pool, EventType::New, _) => self.wake_degraded().await,
            (EventKind::Replica, _, ObjectRef::Replica(uuid, _)) => self.wake_one(uuid),
            (EventKind::Nexus, _, ObjectRef::Nexus(uuid)) => self.wake_one(uuid),
            (EventKind::Node, EventType::Sync, ObjectRef::Node(node)) => self.wake_published_on(&node).await,
            _ => {}
        }
    }

    /// Forward to the owning volume; unknown uuids are ignored - the volume
    /// may be in the middle of being destroyed (§4.7).
    fn wake_one(&self, uuid: VolumeId) {
        if let Some(volume) = self.get(uuid) {
            tokio::spawn(async move { volume.fsa().await });
        }
    }

    async fn wake_degraded(&self) {
        let volumes: Vec<Arc<Volume>> = self.volumes.read().values().cloned().collect();
        for volume in volumes {
            if volume.status().await.state == VolumeState::Degraded {
                tokio::spawn(async move { volume.fsa().await });
            }
        }
    }

    async fn wake_published_on(&self, node: &NodeId) {
        let volumes: Vec<Arc<Volume>> = self.volumes.read().values().cloned().collect();
        for volume in volumes {
            if volume.status().await.published_on.as_ref() == Some(node) {
                tokio::spawn(async move { volume.fsa().await });
            }
        }
    }

    /// `createVolume(uuid, spec)` (§4.7): idempotent - a second call with the
    /// same uuid returns the same object with no extra replicas.
    #[tracing::instrument(level = "debug", skip(self, spec), fields(volume.uuid = %uuid), err)]
    pub async fn create_volume(&self, uuid: VolumeId, spec: VolumeSpec) -> Result<Arc<Volume>, SvcError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SvcError::Internal {
                details: "volume manager is shutting down".to_string(),
            });
        }
        self.create_queue.run(|| self.create_volume_inner(uuid, spec)).await
    }

    async fn create_volume_inner(&self, uuid: VolumeId, spec: VolumeSpec) -> Result<Arc<Volume>, SvcError> {
        if let Some(existing) = self.get(uuid) {
            return Ok(existing);
        }
        let volume = Volume::new(uuid, spec, self.registry.clone(), self.status_store.clone());
        self.volumes.write().insert(uuid, volume.clone());
        match volume.create().await {
            Ok(()) => Ok(volume),
            Err(err) => {
                let _ = volume.destroy().await;
                self.volumes.write().remove(&uuid);
                Err(err)
            }
        }
    }

    /// `destroyVolume(uuid)` (§4.7): idempotent.
    #[tracing::instrument(level = "debug", skip(self), fields(volume.uuid = %uuid), err)]
    pub async fn destroy_volume(&self, uuid: VolumeId) -> Result<(), SvcError> {
        let Some(volume) = self.get(uuid) else { return Ok(()) };
        volume.destroy().await?;
        self.volumes.write().remove(&uuid);
        Ok(())
    }

    pub async fn publish(&self, uuid: VolumeId, protocol: Protocol) -> Result<String, SvcError> {
        let volume = self.get(uuid).ok_or(SvcError::VolumeNotFound { uuid })?;
        volume.publish(protocol).await
    }

    pub async fn unpublish(&self, uuid: VolumeId) -> Result<(), SvcError> {
        let volume = self.get(uuid).ok_or(SvcError::VolumeNotFound { uuid })?;
        volume.unpublish().await
    }

    pub async fn update(&self, uuid: VolumeId, spec: VolumeSpec) -> Result<(), SvcError> {
        let volume = self.get(uuid).ok_or(SvcError::VolumeNotFound { uuid })?;
        volume.update(spec).await
    }

    /// `importVolume(uuid, spec, status)` (§4.7): reconstruct a volume at
    /// startup from persisted status without allocating new components. A
    /// fresh `fsa` pass is kicked off immediately to refresh its `Unknown`
    /// state against what the registry actually observes.
    pub fn import_volume(&self, uuid: VolumeId, spec: VolumeSpec, status: VolumeResourceStatus) -> Arc<Volume> {
        let volume = Volume::import(uuid, spec, status, self.registry.clone(), self.status_store.clone());
        self.volumes.write().insert(uuid, volume.clone());
        let refresh = volume.clone();
        tokio::spawn(async move { refresh.fsa().await });
        volume
    }

    pub async fn list(&self) -> Vec<VolumeSummary> {
        let volumes: Vec<Arc<Volume>> = self.volumes.read().values().cloned().collect();
        let mut out = Vec::with_capacity(volumes.len());
        for volume in volumes {
            out.push(VolumeSummary {
                uuid: volume.uuid(),
                spec: volume.spec().await,
                status: volume.status().await,
            });
        }
        out
    }

    pub async fn get_capacity(&self, node: Option<&NodeId>) -> u64 {
        self.registry.get_capacity(node).await
    }

    /// §5/§12: stop accepting new work, stop the event loop, and let
    /// whatever is in flight on the create queue finish.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        self.create_queue.run(|| async {}).await;
    }
}
