//! Event Stream (§4.3). Registry events are published on a single typed
//! channel whose payload is `{kind, eventType, ref}` (§9, "Event-driven
//! object graph") - `ref` is an identifier, never a snapshot, so a consumer
//! that wants the current value looks it up through the Registry at the
//! time it processes the event.

use common::ids::{NodeId, PoolId, ReplicaId, VolumeId};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EventKind {
    Node,
    Pool,
    Replica,
    Nexus,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EventType {
    New,
    Mod,
    Del,
    /// Synthetic catch-up event emitted on subscription (§4.3) or a node's
    /// full re-sync completing.
    Sync,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ObjectRef {
    Node(NodeId),
    Pool(PoolId),
    /// A replica is scoped by the pool it lives on as well as its uuid,
    /// since the same uuid can have one replica per pool (§3).
    Replica(ReplicaId, PoolId),
    Nexus(VolumeId),
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub event_type: EventType,
    pub reference: ObjectRef,
}

impl Event {
    pub fn new(kind: EventKind, event_type: EventType, reference: ObjectRef) -> Self {
        Self {
            kind,
            event_type,
            reference,
        }
    }
}

/// Broadcast fan-out so the Registry can publish once and every live
/// subscriber (today, just the Volume Manager, but nothing requires that)
/// observe the same stream. `capacity` bounds how far behind a lagging
/// subscriber may fall before it is force-advanced past dropped events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // No receivers is not an error: a bus with nobody subscribed yet is
        // normal during startup.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

/// A lazy, ordered, destroyable sequence of registry events (§4.3). Starts
/// with a synthetic catch-up batch built at subscription time, then forwards
/// whatever the bus publishes live from that point on.
pub struct EventStream {
    catch_up: std::collections::VecDeque<Event>,
    live: broadcast::Receiver<Event>,
}

impl EventStream {
    pub fn new(catch_up: Vec<Event>, live: broadcast::Receiver<Event>) -> Self {
        Self {
            catch_up: catch_up.into(),
            live,
        }
    }

    /// Returns `None` only once the bus side has been dropped entirely
    /// (process shutdown, §5 "Cancellation and timeouts").
    pub async fn next(&mut self) -> Option<Event> {
        if let Some(event) = self.catch_up.pop_front() {
            return Some(event);
        }
        loop {
            match self.live.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream subscriber lagged, skipping");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
