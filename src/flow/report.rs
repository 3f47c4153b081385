use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::core::errors::{FlowError, Result};
use crate::core::types::{InvocationId, RunId};
use crate::flow::future::Outcome;

/// Lifecycle state of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationStatus {
    /// Waiting for upstream results (or, if declared, for its arguments)
    Pending,
    /// All inputs available, waiting for a worker slot
    Ready,
    Running,
    /// Last attempt failed, waiting out the backoff delay
    AwaitingRetry,
    Succeeded,
    Failed,
    /// Never ran because an upstream invocation failed
    FailedDependency,
    Cancelled,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::FailedDependency | Self::Cancelled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::FailedDependency | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::AwaitingRetry => "awaiting_retry",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::FailedDependency => "failed_dependency",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of one invocation
#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub invocation: InvocationId,
    pub task: String,
    pub status: InvocationStatus,
    /// Attempts actually started
    pub attempts: u32,
    pub upstream: Vec<InvocationId>,
    /// No other invocation consumes this one
    pub is_leaf: bool,
    pub outcome: Option<Outcome>,
}

impl InvocationReport {
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FlowError> {
        match &self.outcome {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_dependency: usize,
    pub cancelled: usize,
    /// Retry attempts scheduled across all invocations
    pub retries: u64,
    /// Highest number of invocations observed running at once
    pub max_running: usize,
    pub elapsed: Duration,
}

/// Summary of a run once every invocation is terminal.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub name: String,
    /// In submission order
    pub invocations: Vec<InvocationReport>,
    pub metrics: RunMetrics,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.invocations
            .iter()
            .all(|inv| inv.status == InvocationStatus::Succeeded)
    }

    pub fn get(&self, invocation: InvocationId) -> Option<&InvocationReport> {
        self.invocations.get(invocation.as_u64() as usize)
    }

    pub fn status(&self, invocation: InvocationId) -> Option<InvocationStatus> {
        self.get(invocation).map(|inv| inv.status)
    }

    pub fn statuses(&self) -> BTreeMap<InvocationId, InvocationStatus> {
        self.invocations
            .iter()
            .map(|inv| (inv.invocation, inv.status))
            .collect()
    }

    /// The failure of the earliest-submitted invocation that did not succeed
    pub fn first_failure(&self) -> Option<&FlowError> {
        self.invocations.iter().find_map(|inv| inv.error())
    }

    /// Values of successful leaf invocations, in submission order
    pub fn leaf_values(&self) -> Vec<Value> {
        self.invocations
            .iter()
            .filter(|inv| inv.is_leaf)
            .filter_map(|inv| inv.value().cloned())
            .collect()
    }

    /// All leaf values, or the first failure
    pub fn into_result(self) -> Result<Vec<Value>> {
        match self.first_failure() {
            Some(err) => Err(err.clone()),
            None => Ok(self.leaf_values()),
        }
    }
}
