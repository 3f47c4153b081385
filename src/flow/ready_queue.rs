use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tokio::sync::Notify;

use crate::core::types::InvocationId;

/// Queue of invocations whose inputs are all available.
///
/// Pops the lowest invocation id first, so among simultaneously ready work
/// the earliest submission always wins regardless of the order in which
/// readiness was discovered.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: Mutex<BinaryHeap<Reverse<InvocationId>>>,
    notify: Notify,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: InvocationId) {
        self.heap.lock().push(Reverse(id));
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<InvocationId> {
        self.heap.lock().pop().map(|Reverse(id)| id)
    }

    /// Wait until an id is available and take it
    pub async fn pop_wait(&self) -> InvocationId {
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.pop() {
                return id;
            }
            notified.await;
        }
    }

    /// Drop everything queued
    pub fn clear(&self) {
        self.heap.lock().clear();
    }
}
