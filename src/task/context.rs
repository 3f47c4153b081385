use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

use crate::core::types::{InvocationId, RunId};

/// Per-attempt execution context handed to a computation.
///
/// Cancellation is cooperative: a computation that never looks at
/// [`TaskContext::is_cancelled`] or awaits [`TaskContext::cancelled`] keeps
/// running until it returns, and its result is then discarded.
#[derive(Debug, Clone)]
pub struct TaskContext {
    run_id: RunId,
    invocation: InvocationId,
    task_name: String,
    attempt: u32,
    cancel_rx: watch::Receiver<bool>,
    /// Blocking jobs that outlive the computation's future if it is dropped
    blocking: Arc<Mutex<Vec<oneshot::Receiver<()>>>>,
}

impl TaskContext {
    pub(crate) fn new(
        run_id: RunId,
        invocation: InvocationId,
        task_name: String,
        attempt: u32,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id,
            invocation,
            task_name,
            attempt,
            cancel_rx,
            blocking: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Context that is never cancelled, for calling a computation directly.
    pub fn detached(task_name: impl Into<String>) -> Self {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender leaves the value at `false` forever.
        drop(tx);
        Self::new(RunId::new(), InvocationId(0), task_name.into(), 1, rx)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn invocation(&self) -> InvocationId {
        self.invocation
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once the run is cancelled. Never resolves for a run that
    /// finishes normally.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Register a job on the blocking pool. The job drops the returned
    /// sender when it returns or unwinds.
    pub(crate) fn track_blocking(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.blocking.lock().push(rx);
        tx
    }

    /// Wait for every tracked blocking job, including ones whose awaiting
    /// future was dropped by a timeout.
    pub(crate) async fn blocking_settled(&self) {
        let pending = std::mem::take(&mut *self.blocking.lock());
        for job in pending {
            let _ = job.await;
        }
    }
}
