//! Runs: dependency graph, scheduler, futures and reporting.

pub mod events;
pub mod future;
pub(crate) mod graph;
pub mod output;
pub(crate) mod ready_queue;
pub mod report;
pub mod run;
pub(crate) mod scheduler;

pub use events::{BufferingEventSink, EventSink, FanoutEventSink, RunEvent, RunEventEnvelope, TracingEventSink};
pub use future::{Arg, Outcome, TaskFuture};
pub use output::FlowOutput;
pub use report::{InvocationReport, InvocationStatus, RunMetrics, RunReport};
pub use run::{Deferred, Run, SubmitOptions};
