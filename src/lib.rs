//! In-process task graphs: register named tasks, submit invocations that
//! consume each other's futures, and let a bounded worker pool run them in
//! dependency order with retries and failure propagation.
//!
//! ```ignore
//! let engine = Engine::new(EngineConfig::builder().max_concurrency(4).build()?)?;
//! let add = engine.define_blocking("add", |args| {
//!     Ok(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
//! }, RetryPolicy::none())?;
//!
//! let sum = engine
//!     .run_flow("sum", |run| async move {
//!         let a = run.submit(&add, args![1, 2])?;
//!         run.submit(&add, args![&a, 10])
//!     })
//!     .await?;
//! assert_eq!(sum, json!(13));
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod logging;
    pub mod types;
}

pub mod engine; // Engine and run_flow
pub mod flow; // runs, dependency graph, scheduler
pub mod shell; // shell-command tasks
pub mod task; // task registry and retry policies

// Re-exports for convenience
pub use crate::core::config::{EngineConfig, EngineConfigBuilder, RetryPool};
pub use crate::core::errors::{FlowError, Result, TaskCause};
pub use crate::core::types::{InvocationId, RunId};
pub use engine::Engine;
pub use flow::{
    Arg, BufferingEventSink, Deferred, EventSink, FanoutEventSink, FlowOutput, InvocationReport,
    InvocationStatus, Outcome, Run, RunEvent, RunEventEnvelope, RunMetrics, RunReport,
    SubmitOptions, TaskFuture, TracingEventSink,
};
pub use shell::{CommandOutput, ShellCommand};
pub use task::{
    Arity, Backoff, Blocking, Computation, RetryOn, RetryPolicy, TaskBuilder, TaskContext,
    TaskDefinition, TaskRegistry,
};
