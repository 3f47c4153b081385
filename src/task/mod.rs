//! Task registry: named, retryable units of work.

pub mod context;
pub mod definition;
pub mod registry;
pub mod retry;

pub use context::TaskContext;
pub use definition::{Arity, Blocking, Computation, TaskBuilder, TaskDefinition};
pub use registry::TaskRegistry;
pub use retry::{Backoff, RetryOn, RetryPolicy};
