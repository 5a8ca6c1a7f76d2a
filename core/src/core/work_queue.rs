//! FIFO work queue (§4.4, §9 "Work queue"): a single-slot async mutex with a
//! FIFO waiter list. `tokio::sync::Mutex` is exactly that - it is backed by
//! a fair semaphore, so waiters are granted the slot in arrival order - so
//! the queue itself is just a thin, named wrapper around one: a task is a
//! future carrying its own result, `run` awaits the slot, runs the future to
//! completion, and releases on every exit path including an `Err` return.

use tokio::sync::Mutex;

/// Serializes an arbitrary sequence of async operations so at most one is
/// in flight at a time, in the order callers arrived. One instance is owned
/// per named owner: the Pool Operator keeps one for all pool reconciliation,
/// the Volume Manager keeps one dedicated to `createVolume` (§5,
/// "Serialization points").
#[derive(Default)]
pub struct WorkQueue {
    slot: Mutex<()>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(()),
        }
    }

    /// Run `task` holding the queue's single slot. A failing task still
    /// releases the slot for the next waiter - the `Err` propagates to this
    /// call's caller only, it never poisons the queue.
    pub async fn run<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = self.slot.lock().await;
        task().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn serializes_concurrent_tasks() {
        let queue = Arc::new(WorkQueue::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .run(|| async move {
                        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                        order.lock().unwrap().push(i);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn failing_task_does_not_stall_queue() {
        let queue = WorkQueue::new();
        let first: Result<(), &str> = queue.run(|| async { Err("boom") }).await;
        assert!(first.is_err());
        let second: Result<(), &str> = queue.run(|| async { Ok(()) }).await;
        assert!(second.is_ok());
        let counter = AtomicU32::new(0);
        queue.run(|| async { counter.fetch_add(1, Ordering::SeqCst) }).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
