//! The Registry, its Event Stream, Work Queue and scheduler (§4.2-§4.4).

pub mod events;
pub mod registry;
pub mod scheduler;
pub mod work_queue;

pub use events::{Event, EventBus, EventKind, EventStream, EventType, ObjectRef};
pub use registry::Registry;
pub use work_queue::WorkQueue;
