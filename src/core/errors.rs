use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::InvocationId;
use crate::task::Arity;

/// Shared, clonable handle to the error a computation raised.
pub type TaskCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for the task-graph engine
///
/// `DuplicateName`, `InvalidName`, `CycleDetected`, `AlreadyResolved`,
/// `AlreadyBound`, `ArityMismatch` and `ForeignFuture` are programming
/// errors and are never retried. `TaskExecution` and `Timeout` come out of a
/// computation attempt and are retried according to the task's policy.
/// `FailedDependency` is produced by the scheduler for invocations whose
/// inputs can never become available.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// Task names must be non-empty
    #[error("Invalid task name: names must not be empty")]
    InvalidName,

    /// A task with the same (case-sensitive) name is already registered
    #[error("Duplicate task name: {name}")]
    DuplicateName { name: String },

    /// Binding the invocation's arguments would close a cycle
    #[error("Cycle detected: {task} ({invocation}) would depend on its own result")]
    CycleDetected {
        task: String,
        invocation: InvocationId,
    },

    /// A future's outcome was set twice
    #[error("Future of invocation {invocation} is already resolved")]
    AlreadyResolved { invocation: InvocationId },

    /// Arguments were bound to an invocation a second time
    #[error("Invocation {invocation} already has its arguments bound")]
    AlreadyBound { invocation: InvocationId },

    /// Argument count does not match the task's declared arity
    #[error("Task {task} expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        task: String,
        expected: Arity,
        actual: usize,
    },

    /// A future produced by another run was passed as an argument
    #[error("Future of invocation {invocation} belongs to run {run}")]
    ForeignFuture { invocation: InvocationId, run: String },

    /// The computation returned an error on its last permitted attempt
    #[error("Task {task} ({invocation}) failed on attempt {attempt}: {source}")]
    TaskExecution {
        task: String,
        invocation: InvocationId,
        attempt: u32,
        #[source]
        source: TaskCause,
    },

    /// The computation exceeded its wall-clock timeout
    #[error("Task {task} ({invocation}) timed out after {}ms on attempt {attempt}", .timeout.as_millis())]
    Timeout {
        task: String,
        invocation: InvocationId,
        attempt: u32,
        timeout: Duration,
    },

    /// An upstream invocation failed, so this one never ran
    #[error("Task {task} ({invocation}) skipped: upstream {upstream_task} ({upstream}) failed")]
    FailedDependency {
        task: String,
        invocation: InvocationId,
        upstream: InvocationId,
        upstream_task: String,
        #[source]
        cause: Box<FlowError>,
    },

    /// The run was cancelled before this invocation finished
    #[error("Task {task} ({invocation}) cancelled: {reason}")]
    Cancelled {
        task: String,
        invocation: InvocationId,
        reason: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors (worker panics, closed channels)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FlowError {
    /// Wrap an error raised by a computation
    pub fn execution(
        task: impl Into<String>,
        invocation: InvocationId,
        attempt: u32,
        source: anyhow::Error,
    ) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = source.into();
        Self::TaskExecution {
            task: task.into(),
            invocation,
            attempt,
            source: Arc::from(boxed),
        }
    }

    /// Create a timeout error
    pub fn timeout(
        task: impl Into<String>,
        invocation: InvocationId,
        attempt: u32,
        timeout: Duration,
    ) -> Self {
        Self::Timeout {
            task: task.into(),
            invocation,
            attempt,
            timeout,
        }
    }

    /// Create a failed-dependency error pointing at the original cause.
    ///
    /// If `upstream_error` is itself a `FailedDependency`, its cause is
    /// carried over so the chain always ends at the first real failure.
    pub fn failed_dependency(
        task: impl Into<String>,
        invocation: InvocationId,
        upstream: InvocationId,
        upstream_task: impl Into<String>,
        upstream_error: &FlowError,
    ) -> Self {
        Self::FailedDependency {
            task: task.into(),
            invocation,
            upstream,
            upstream_task: upstream_task.into(),
            cause: Box::new(upstream_error.root_cause().clone()),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(
        task: impl Into<String>,
        invocation: InvocationId,
        reason: impl Into<String>,
    ) -> Self {
        Self::Cancelled {
            task: task.into(),
            invocation,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry policy may retry this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TaskExecution { .. } | Self::Timeout { .. })
    }

    /// Programming errors are fatal and surface immediately to the caller
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidName
                | Self::DuplicateName { .. }
                | Self::CycleDetected { .. }
                | Self::AlreadyResolved { .. }
                | Self::AlreadyBound { .. }
                | Self::ArityMismatch { .. }
                | Self::ForeignFuture { .. }
        )
    }

    /// The first real failure behind a propagated error
    pub fn root_cause(&self) -> &FlowError {
        match self {
            Self::FailedDependency { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// The invocation an execution-time error belongs to
    pub fn invocation(&self) -> Option<InvocationId> {
        match self {
            Self::CycleDetected { invocation, .. }
            | Self::AlreadyResolved { invocation }
            | Self::AlreadyBound { invocation }
            | Self::ForeignFuture { invocation, .. }
            | Self::TaskExecution { invocation, .. }
            | Self::Timeout { invocation, .. }
            | Self::FailedDependency { invocation, .. }
            | Self::Cancelled { invocation, .. } => Some(*invocation),
            _ => None,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidName => "invalid_name",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::CycleDetected { .. } => "cycle",
            Self::AlreadyResolved { .. } => "already_resolved",
            Self::AlreadyBound { .. } => "already_bound",
            Self::ArityMismatch { .. } => "arity",
            Self::ForeignFuture { .. } => "foreign_future",
            Self::TaskExecution { .. } => "execution",
            Self::Timeout { .. } => "timeout",
            Self::FailedDependency { .. } => "failed_dependency",
            Self::Cancelled { .. } => "cancelled",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, FlowError>;

impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("invalid YAML: {}", err))
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("invalid JSON: {}", err))
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::configuration(format!("io: {}", err))
    }
}
