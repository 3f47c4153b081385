use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::errors::Result;
use crate::core::types::{InvocationId, RunId};
use crate::flow::events::EventSink;
use crate::flow::future::{Arg, TaskFuture};
use crate::flow::report::{InvocationStatus, RunReport};
use crate::flow::scheduler::RunShared;
use crate::task::TaskDefinition;

/// Extra ordering constraints for a submission
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Invocations that must succeed first even though their values are
    /// not passed as arguments
    pub wait_for: Vec<TaskFuture>,
}

impl SubmitOptions {
    pub fn wait_for<I>(futures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<TaskFuture>,
    {
        Self {
            wait_for: futures.into_iter().map(Into::into).collect(),
        }
    }
}

/// An invocation reserved with [`Run::declare`] whose arguments are bound
/// later with [`Run::bind`].
#[derive(Debug)]
pub struct Deferred {
    future: TaskFuture,
}

impl Deferred {
    /// The invocation's future, usable as an argument before binding
    pub fn future(&self) -> &TaskFuture {
        &self.future
    }

    pub fn invocation(&self) -> InvocationId {
        self.future.invocation()
    }
}

struct RunHandle {
    shared: Arc<RunShared>,
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// One execution of a flow.
///
/// Submissions return immediately; invocations start as soon as their inputs
/// are available and a worker slot is free, so execution overlaps with the
/// code that is still building the graph. Cloning gives another handle to
/// the same run. When the last handle is dropped the run stops, cancelling
/// whatever has not finished.
#[derive(Clone)]
pub struct Run {
    handle: Arc<RunHandle>,
}

impl Run {
    pub(crate) fn start(name: &str, config: EngineConfig, events: Arc<dyn EventSink>) -> Result<Self> {
        let shared = RunShared::start(name, config, events)?;
        Ok(Self {
            handle: Arc::new(RunHandle { shared }),
        })
    }

    fn shared(&self) -> &RunShared {
        &self.handle.shared
    }

    pub fn id(&self) -> &RunId {
        self.shared().run_id()
    }

    pub fn name(&self) -> &str {
        self.shared().name()
    }

    pub fn config(&self) -> &EngineConfig {
        self.shared().config()
    }

    /// Record an invocation of `task` and return its future.
    ///
    /// Futures among `args` become dependencies. Fails with `ArityMismatch`
    /// or `ForeignFuture` without adding anything to the run.
    pub fn submit(&self, task: &TaskDefinition, args: Vec<Arg>) -> Result<TaskFuture> {
        self.shared().submit(task, args, &[])
    }

    /// [`Run::submit`] with additional ordering-only dependencies
    pub fn submit_with(
        &self,
        task: &TaskDefinition,
        args: Vec<Arg>,
        options: SubmitOptions,
    ) -> Result<TaskFuture> {
        self.shared().submit(task, args, &options.wait_for)
    }

    /// Submit and wait for the value
    pub async fn call(&self, task: &TaskDefinition, args: Vec<Arg>) -> Result<Value> {
        self.submit(task, args)?.resolve().await
    }

    /// Reserve an invocation of `task` without binding its arguments yet.
    /// Its future can be passed to other submissions right away. A declared
    /// invocation that is still unbound when the run is joined is cancelled.
    pub fn declare(&self, task: &TaskDefinition) -> Deferred {
        Deferred {
            future: self.shared().declare(task),
        }
    }

    /// Bind the arguments of a declared invocation.
    ///
    /// Fails with `CycleDetected` if any argument (transitively) depends on
    /// the declared invocation itself; the invocation then stays unbound and
    /// can be bound again with other arguments. Binding an invocation that
    /// already has arguments fails with `AlreadyBound`.
    pub fn bind(&self, deferred: &Deferred, args: Vec<Arg>) -> Result<TaskFuture> {
        self.bind_with(deferred, args, SubmitOptions::default())
    }

    pub fn bind_with(
        &self,
        deferred: &Deferred,
        args: Vec<Arg>,
        options: SubmitOptions,
    ) -> Result<TaskFuture> {
        self.shared()
            .bind(&deferred.future, args, &options.wait_for)?;
        Ok(deferred.future.clone())
    }

    /// Current status, or None if `invocation` does not belong to this run
    pub fn status(&self, invocation: InvocationId) -> Option<InvocationStatus> {
        self.shared().status(invocation)
    }

    /// Topological order of everything submitted so far, ties broken by
    /// submission order
    pub fn execution_order(&self) -> Vec<InvocationId> {
        self.shared().execution_order()
    }

    /// Graphviz rendering of the dependency graph, colored by status
    pub fn to_dot(&self) -> String {
        self.shared().to_dot()
    }

    /// Cancel every invocation that has not finished
    pub fn cancel(&self, reason: &str) {
        self.shared().cancel(reason)
    }

    /// Wait for every submitted invocation to reach a terminal state and
    /// report on all of them. Never fails; see [`Run::complete`].
    pub async fn join(&self) -> RunReport {
        self.shared().join().await
    }

    /// Like [`Run::join`], but surfaces the first failure (by submission
    /// order) as an error unless the engine is configured for partial
    /// results.
    pub async fn complete(&self) -> Result<RunReport> {
        let report = self.join().await;
        if !self.config().partial_results {
            if let Some(err) = report.first_failure() {
                return Err(err.clone());
            }
        }
        Ok(report)
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("id", self.id())
            .field("name", &self.name())
            .finish()
    }
}
