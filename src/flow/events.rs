//! Typed lifecycle events emitted while a run executes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::types::InvocationId;

/// Lifecycle event of one invocation (or of the run itself)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    Submitted {
        invocation: InvocationId,
        task: String,
        upstream: Vec<InvocationId>,
    },
    Started {
        invocation: InvocationId,
        task: String,
        attempt: u32,
    },
    RetryScheduled {
        invocation: InvocationId,
        task: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Succeeded {
        invocation: InvocationId,
        task: String,
        attempt: u32,
        duration_ms: u64,
    },
    Failed {
        invocation: InvocationId,
        task: String,
        attempt: u32,
        error: String,
    },
    DependencyFailed {
        invocation: InvocationId,
        task: String,
        upstream: InvocationId,
    },
    Cancelled {
        invocation: InvocationId,
        task: String,
        reason: String,
    },
    RunCancelled {
        reason: String,
    },
}

impl RunEvent {
    pub fn invocation(&self) -> Option<InvocationId> {
        match self {
            RunEvent::Submitted { invocation, .. }
            | RunEvent::Started { invocation, .. }
            | RunEvent::RetryScheduled { invocation, .. }
            | RunEvent::Succeeded { invocation, .. }
            | RunEvent::Failed { invocation, .. }
            | RunEvent::DependencyFailed { invocation, .. }
            | RunEvent::Cancelled { invocation, .. } => Some(*invocation),
            RunEvent::RunCancelled { .. } => None,
        }
    }
}

/// Event envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventEnvelope {
    /// Per-run, strictly increasing
    pub sequence: u64,
    pub run_id: String,
    pub run_name: String,
    pub timestamp: DateTime<Utc>,
    pub event: RunEvent,
}

/// Receiver of run events.
///
/// Each run delivers its events from one background task, one at a time and
/// in sequence order. No scheduler lock is held during `emit`, so a sink may
/// query or extend the run it observes. Implementations must not block:
/// a slow sink delays later events, and `Run::join` waits for delivery.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: &RunEventEnvelope);
}

/// Writes every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, envelope: &RunEventEnvelope) {
        let run = envelope.run_name.as_str();
        match &envelope.event {
            RunEvent::Submitted {
                invocation,
                task,
                upstream,
            } => tracing::debug!(run, %invocation, task = task.as_str(), upstream = upstream.len(), "submitted"),
            RunEvent::Started {
                invocation,
                task,
                attempt,
            } => tracing::debug!(run, %invocation, task = task.as_str(), attempt, "started"),
            RunEvent::RetryScheduled {
                invocation,
                task,
                attempt,
                delay_ms,
                error,
            } => tracing::warn!(run, %invocation, task = task.as_str(), attempt, delay_ms, error = error.as_str(), "retrying"),
            RunEvent::Succeeded {
                invocation,
                task,
                attempt,
                duration_ms,
            } => tracing::info!(run, %invocation, task = task.as_str(), attempt, duration_ms, "succeeded"),
            RunEvent::Failed {
                invocation,
                task,
                attempt,
                error,
            } => tracing::error!(run, %invocation, task = task.as_str(), attempt, error = error.as_str(), "failed"),
            RunEvent::DependencyFailed {
                invocation,
                task,
                upstream,
            } => tracing::warn!(run, %invocation, task = task.as_str(), %upstream, "skipped, upstream failed"),
            RunEvent::Cancelled {
                invocation,
                task,
                reason,
            } => tracing::info!(run, %invocation, task = task.as_str(), reason = reason.as_str(), "cancelled"),
            RunEvent::RunCancelled { reason } => tracing::warn!(run, reason = reason.as_str(), "run cancelled"),
        }
    }
}

/// Collects events in memory
#[derive(Default)]
pub struct BufferingEventSink {
    events: Arc<parking_lot::RwLock<Vec<RunEventEnvelope>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEventEnvelope> {
        self.events.read().clone()
    }

    /// Only the event payloads, in emission order
    pub fn payloads(&self) -> Vec<RunEvent> {
        self.events.read().iter().map(|e| e.event.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &RunEventEnvelope) {
        self.events.write().push(envelope.clone());
    }
}

/// Forwards to several sinks
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, envelope: &RunEventEnvelope) {
        for sink in &self.sinks {
            sink.emit(envelope);
        }
    }
}
