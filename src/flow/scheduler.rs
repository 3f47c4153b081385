use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::core::config::{EngineConfig, RetryPool};
use crate::core::errors::{FlowError, Result};
use crate::core::types::{InvocationId, RunId};
use crate::flow::events::{EventSink, RunEvent, RunEventEnvelope};
use crate::flow::future::{Arg, Outcome, TaskFuture};
use crate::flow::graph::DependencyGraph;
use crate::flow::ready_queue::ReadyQueue;
use crate::flow::report::{InvocationReport, InvocationStatus, RunMetrics, RunReport};
use crate::task::{TaskContext, TaskDefinition};

const UNBOUND_REASON: &str = "declared but never bound";

struct Invocation {
    definition: TaskDefinition,
    args: Vec<Arg>,
    status: InvocationStatus,
    attempts: u32,
    /// Distinct upstream invocations that have not succeeded yet
    unresolved: usize,
    future: TaskFuture,
}

struct RunState {
    graph: DependencyGraph,
    invocations: Vec<Invocation>,
    /// Invocations not yet in a terminal state
    open: usize,
    cancelled: Option<String>,
}

/// One attempt handed from the dispatcher to a worker
struct Attempt {
    id: InvocationId,
    attempt: u32,
    definition: TaskDefinition,
    args: Vec<Value>,
}

/// Scheduler state of a single run, shared by the run handle, the
/// dispatcher loop(s), workers and retry timers.
///
/// All graph and status mutations happen under one mutex; computations run
/// outside it. Completion of one invocation is the only thing that can make
/// another one ready.
pub(crate) struct RunShared {
    run_id: RunId,
    name: String,
    config: EngineConfig,
    state: Mutex<RunState>,
    ready: Arc<ReadyQueue>,
    retry_ready: Option<Arc<ReadyQueue>>,
    cancel_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<bool>,
    open_tx: watch::Sender<usize>,
    events_tx: mpsc::UnboundedSender<RunEventEnvelope>,
    /// Sequence number of the next event the sink has yet to receive
    delivered: Arc<watch::Sender<u64>>,
    sequence: AtomicU64,
    running: AtomicUsize,
    max_running: AtomicUsize,
    retries: AtomicU64,
    started: Instant,
    span: Span,
}

/// Resolves once the flag turns true. A closed channel never resolves.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Hand events to the sink outside the state lock, in sequence order.
/// Ends once the run is dropped and the channel is drained.
async fn deliver(
    mut events: mpsc::UnboundedReceiver<RunEventEnvelope>,
    sink: Arc<dyn EventSink>,
    delivered: Arc<watch::Sender<u64>>,
) {
    while let Some(envelope) = events.recv().await {
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink.emit(&envelope))).is_err() {
            error!(run = %envelope.run_name, sequence = envelope.sequence, "event sink panicked");
        }
        delivered.send_replace(envelope.sequence + 1);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl RunShared {
    /// Create the run and start its dispatcher on the current Tokio runtime
    pub fn start(name: &str, config: EngineConfig, events: Arc<dyn EventSink>) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            FlowError::configuration("runs must be started from within a Tokio runtime")
        })?;

        let workers = config.effective_concurrency();
        let retry_pool = config.retry_pool();
        let run_id = RunId::new();
        let span = info_span!("run", run = name, run_id = %run_id);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let delivered = Arc::new(watch::channel(0).0);
        runtime.spawn(deliver(events_rx, events, Arc::clone(&delivered)).instrument(span.clone()));
        let shared = Arc::new(Self {
            run_id,
            name: name.to_string(),
            config,
            state: Mutex::new(RunState {
                graph: DependencyGraph::new(),
                invocations: Vec::new(),
                open: 0,
                cancelled: None,
            }),
            ready: Arc::new(ReadyQueue::new()),
            retry_ready: match retry_pool {
                RetryPool::Dedicated(_) => Some(Arc::new(ReadyQueue::new())),
                RetryPool::Shared => None,
            },
            cancel_tx: watch::channel(false).0,
            stop_tx: watch::channel(false).0,
            open_tx: watch::channel(0).0,
            events_tx,
            delivered,
            sequence: AtomicU64::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            retries: AtomicU64::new(0),
            started: Instant::now(),
            span,
        });

        runtime.spawn(
            Arc::clone(&shared)
                .dispatch(Arc::clone(&shared.ready), Arc::new(Semaphore::new(workers)))
                .instrument(shared.span.clone()),
        );
        if let (RetryPool::Dedicated(slots), Some(queue)) = (retry_pool, &shared.retry_ready) {
            runtime.spawn(
                Arc::clone(&shared)
                    .dispatch(Arc::clone(queue), Arc::new(Semaphore::new(slots)))
                    .instrument(shared.span.clone()),
            );
        }
        shared.span.in_scope(|| info!(workers, "run started"));
        Ok(shared)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Callers hold the state lock, which keeps the channel in sequence
    /// order. The sink itself runs on the delivery task.
    fn emit(&self, event: RunEvent) {
        let envelope = RunEventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            run_id: self.run_id.to_string(),
            run_name: self.name.clone(),
            timestamp: Utc::now(),
            event,
        };
        if self.events_tx.send(envelope).is_err() {
            debug!(run = %self.name, "event delivery stopped");
        }
    }

    fn queue_for(&self, attempts: u32) -> &ReadyQueue {
        match &self.retry_ready {
            Some(queue) if attempts > 0 => queue,
            _ => &self.ready,
        }
    }

    /// Ids of the distinct invocations `args` and `wait_for` refer to
    fn upstream_of(&self, args: &[Arg], wait_for: &[TaskFuture]) -> Result<Vec<InvocationId>> {
        let mut parents = Vec::new();
        for future in args.iter().filter_map(Arg::as_future).chain(wait_for) {
            if future.run_id() != &self.run_id {
                return Err(FlowError::ForeignFuture {
                    invocation: future.invocation(),
                    run: future.run_id().to_string(),
                });
            }
            if !parents.contains(&future.invocation()) {
                parents.push(future.invocation());
            }
        }
        Ok(parents)
    }

    /// Add an invocation with no arguments bound yet
    fn insert(&self, state: &mut RunState, definition: &TaskDefinition) -> TaskFuture {
        let id = state.graph.add_node(definition.name());
        let future = TaskFuture::new(self.run_id.clone(), id, definition.name());
        state.invocations.push(Invocation {
            definition: definition.clone(),
            args: Vec::new(),
            status: InvocationStatus::Pending,
            attempts: 0,
            unresolved: 0,
            future: future.clone(),
        });
        state.open += 1;
        self.open_tx.send_replace(state.open);
        future
    }

    /// Bind arguments to an inserted invocation and work out whether it can
    /// run right away, must wait, or can never run.
    fn attach(
        &self,
        state: &mut RunState,
        id: InvocationId,
        args: Vec<Arg>,
        parents: Vec<InvocationId>,
    ) -> Result<()> {
        state.graph.bind(id, &parents)?;
        debug_assert!(state.graph.is_acyclic());
        let idx = id.as_u64() as usize;
        state.invocations[idx].args = args;
        let task = state.invocations[idx].definition.name().to_string();
        self.emit(RunEvent::Submitted {
            invocation: id,
            task: task.clone(),
            upstream: parents.clone(),
        });

        if let Some(reason) = state.cancelled.clone() {
            self.cancel_one(state, id, &reason);
            return Ok(());
        }

        let failed_parent = parents
            .iter()
            .copied()
            .find(|p| state.invocations[p.as_u64() as usize].status.is_failure());
        if let Some(upstream) = failed_parent {
            let upstream_inv = &state.invocations[upstream.as_u64() as usize];
            let cause = match upstream_inv.future.try_get() {
                Some(Err(err)) => err,
                _ => FlowError::internal(format!("{} failed without an error", upstream)),
            };
            let err = FlowError::failed_dependency(
                task.as_str(),
                id,
                upstream,
                upstream_inv.definition.name(),
                &cause,
            );
            self.emit(RunEvent::DependencyFailed {
                invocation: id,
                task,
                upstream,
            });
            self.settle(state, id, InvocationStatus::FailedDependency, Err(err));
            self.propagate_failure(state, id);
            return Ok(());
        }

        let unresolved = parents
            .iter()
            .filter(|p| state.invocations[p.as_u64() as usize].status != InvocationStatus::Succeeded)
            .count();
        let inv = &mut state.invocations[idx];
        inv.unresolved = unresolved;
        if unresolved == 0 {
            inv.status = InvocationStatus::Ready;
            self.queue_for(0).push(id);
        }
        Ok(())
    }

    pub fn submit(
        &self,
        definition: &TaskDefinition,
        args: Vec<Arg>,
        wait_for: &[TaskFuture],
    ) -> Result<TaskFuture> {
        definition.check_arity(args.len())?;
        let parents = self.upstream_of(&args, wait_for)?;

        let mut state = self.state.lock();
        let future = self.insert(&mut state, definition);
        self.attach(&mut state, future.invocation(), args, parents)?;
        Ok(future)
    }

    /// Reserve an invocation whose arguments are bound later
    pub fn declare(&self, definition: &TaskDefinition) -> TaskFuture {
        let mut state = self.state.lock();
        let future = self.insert(&mut state, definition);
        debug!(run = %self.name, invocation = %future.invocation(), task = definition.name(), "declared");
        future
    }

    pub fn bind(&self, future: &TaskFuture, args: Vec<Arg>, wait_for: &[TaskFuture]) -> Result<()> {
        if future.run_id() != &self.run_id {
            return Err(FlowError::ForeignFuture {
                invocation: future.invocation(),
                run: future.run_id().to_string(),
            });
        }
        let id = future.invocation();
        let parents = self.upstream_of(&args, wait_for)?;

        let mut state = self.state.lock();
        if state.graph.is_bound(id) {
            return Err(FlowError::AlreadyBound { invocation: id });
        }
        let inv = &state.invocations[id.as_u64() as usize];
        inv.definition.check_arity(args.len())?;
        if inv.status.is_terminal() {
            return match inv.future.try_get() {
                Some(Err(err)) => Err(err),
                _ => Err(FlowError::AlreadyResolved { invocation: id }),
            };
        }
        self.attach(&mut state, id, args, parents)
    }

    /// Move an invocation to a terminal state and resolve its future
    fn settle(&self, state: &mut RunState, id: InvocationId, status: InvocationStatus, outcome: Outcome) {
        let inv = &mut state.invocations[id.as_u64() as usize];
        inv.status = status;
        if let Err(err) = inv.future.set(outcome) {
            error!(run = %self.name, invocation = %id, error = %err, "future resolved twice");
            return;
        }
        state.open = state.open.saturating_sub(1);
        self.open_tx.send_replace(state.open);
    }

    fn cancel_one(&self, state: &mut RunState, id: InvocationId, reason: &str) {
        let task = state.invocations[id.as_u64() as usize].definition.name().to_string();
        let err = FlowError::cancelled(task.as_str(), id, reason);
        self.settle(state, id, InvocationStatus::Cancelled, Err(err));
        self.emit(RunEvent::Cancelled {
            invocation: id,
            task,
            reason: reason.to_string(),
        });
    }

    /// Fail every not-yet-terminal consumer of `failed`, transitively
    fn propagate_failure(&self, state: &mut RunState, failed: InvocationId) {
        let mut stack = vec![failed];
        while let Some(upstream) = stack.pop() {
            let upstream_inv = &state.invocations[upstream.as_u64() as usize];
            let Some(Err(cause)) = upstream_inv.future.try_get() else {
                continue;
            };
            let upstream_task = upstream_inv.definition.name().to_string();

            for child in state.graph.children(upstream) {
                let inv = &state.invocations[child.as_u64() as usize];
                if inv.status.is_terminal() {
                    continue;
                }
                let task = inv.definition.name().to_string();
                let err = FlowError::failed_dependency(
                    task.as_str(),
                    child,
                    upstream,
                    upstream_task.as_str(),
                    &cause,
                );
                self.emit(RunEvent::DependencyFailed {
                    invocation: child,
                    task,
                    upstream,
                });
                self.settle(state, child, InvocationStatus::FailedDependency, Err(err));
                stack.push(child);
            }
        }
    }

    fn succeed(&self, state: &mut RunState, id: InvocationId, value: Value) {
        self.settle(state, id, InvocationStatus::Succeeded, Ok(value));
        for child in state.graph.children(id) {
            let inv = &mut state.invocations[child.as_u64() as usize];
            if inv.status != InvocationStatus::Pending {
                continue;
            }
            inv.unresolved = inv.unresolved.saturating_sub(1);
            if inv.unresolved == 0 {
                inv.status = InvocationStatus::Ready;
                let attempts = inv.attempts;
                self.queue_for(attempts).push(child);
            }
        }
    }

    /// Claim a ready invocation for a worker. Returns None if it was
    /// cancelled (or otherwise moved on) while queued.
    fn begin_attempt(&self, id: InvocationId) -> Option<Attempt> {
        let mut state = self.state.lock();
        if state.cancelled.is_some() {
            return None;
        }
        let idx = id.as_u64() as usize;
        let inv = &state.invocations[idx];
        if inv.status != InvocationStatus::Ready {
            return None;
        }

        let inputs: std::result::Result<Vec<Value>, InvocationId> = inv
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Value(value) => Ok(value.clone()),
                Arg::Future(future) => match future.try_get() {
                    Some(Ok(value)) => Ok(value),
                    _ => Err(future.invocation()),
                },
            })
            .collect();
        let values = match inputs {
            Ok(values) => values,
            Err(missing) => {
                let err = FlowError::internal(format!(
                    "{} was scheduled before input {} succeeded",
                    id, missing
                ));
                self.settle(&mut state, id, InvocationStatus::Failed, Err(err));
                self.propagate_failure(&mut state, id);
                return None;
            }
        };

        let inv = &mut state.invocations[idx];
        inv.status = InvocationStatus::Running;
        inv.attempts += 1;
        let attempt = Attempt {
            id,
            attempt: inv.attempts,
            definition: inv.definition.clone(),
            args: values,
        };
        self.emit(RunEvent::Started {
            invocation: id,
            task: attempt.definition.name().to_string(),
            attempt: attempt.attempt,
        });
        Some(attempt)
    }

    /// Worker loop: pull ready invocations in id order, one permit each
    async fn dispatch(self: Arc<Self>, queue: Arc<ReadyQueue>, pool: Arc<Semaphore>) {
        let mut stop = self.stop_tx.subscribe();
        loop {
            let permit = tokio::select! {
                _ = signalled(&mut stop) => break,
                permit = Arc::clone(&pool).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let id = tokio::select! {
                _ = signalled(&mut stop) => break,
                id = queue.pop_wait() => id,
            };
            if let Some(attempt) = self.begin_attempt(id) {
                let span = self.span.clone();
                tokio::spawn(Arc::clone(&self).execute(attempt, permit).instrument(span));
            }
        }
        debug!(run = %self.name, "dispatcher stopped");
    }

    async fn execute(self: Arc<Self>, attempt: Attempt, permit: OwnedSemaphorePermit) {
        let Attempt {
            id,
            attempt,
            definition,
            args,
        } = attempt;
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let ctx = TaskContext::new(
            self.run_id.clone(),
            id,
            definition.name().to_string(),
            attempt,
            self.cancel_tx.subscribe(),
        );
        let computation = definition.computation();
        let limit = definition.timeout().or(self.config.default_timeout);
        let started = Instant::now();

        let call = AssertUnwindSafe(computation.call(args, ctx.clone())).catch_unwind();
        let finished = match limit {
            Some(limit) => tokio::time::timeout(limit, call).await.ok(),
            None => Some(call.await),
        };
        if finished.is_none() {
            debug!(
                run = %self.name,
                invocation = %id,
                attempt,
                "timed out, waiting for blocking work"
            );
        }
        // The slot stays taken until abandoned blocking work returns, so a
        // retry never overlaps the attempt it replaces.
        ctx.blocking_settled().await;
        let outcome = match finished {
            Some(Ok(Ok(value))) => Ok(value),
            Some(Ok(Err(err))) => Err(FlowError::execution(definition.name(), id, attempt, err)),
            Some(Err(panic)) => Err(FlowError::execution(
                definition.name(),
                id,
                attempt,
                anyhow::anyhow!("task panicked: {}", panic_message(panic.as_ref())),
            )),
            None => Err(FlowError::timeout(
                definition.name(),
                id,
                attempt,
                limit.unwrap_or_default(),
            )),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        self.finish_attempt(id, attempt, &definition, outcome, started.elapsed());
    }

    fn finish_attempt(
        self: &Arc<Self>,
        id: InvocationId,
        attempt: u32,
        definition: &TaskDefinition,
        outcome: Outcome,
        elapsed: Duration,
    ) {
        let mut state = self.state.lock();
        let idx = id.as_u64() as usize;
        if state.invocations[idx].status != InvocationStatus::Running {
            debug!(run = %self.name, invocation = %id, "discarding result of cancelled invocation");
            return;
        }

        match outcome {
            Ok(value) => {
                self.emit(RunEvent::Succeeded {
                    invocation: id,
                    task: definition.name().to_string(),
                    attempt,
                    duration_ms: elapsed.as_millis() as u64,
                });
                self.succeed(&mut state, id, value);
            }
            Err(err) => {
                let policy = definition.retry_policy();
                if state.cancelled.is_none() && policy.should_retry(attempt, &err) {
                    let delay = policy.delay_for(attempt);
                    state.invocations[idx].status = InvocationStatus::AwaitingRetry;
                    self.retries.fetch_add(1, Ordering::SeqCst);
                    self.emit(RunEvent::RetryScheduled {
                        invocation: id,
                        task: definition.name().to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: err.to_string(),
                    });
                    drop(state);
                    self.schedule_retry(id, delay);
                } else {
                    self.emit(RunEvent::Failed {
                        invocation: id,
                        task: definition.name().to_string(),
                        attempt,
                        error: err.to_string(),
                    });
                    self.settle(&mut state, id, InvocationStatus::Failed, Err(err));
                    self.propagate_failure(&mut state, id);
                }
            }
        }
    }

    /// Put the invocation back in the ready queue after `delay`. The timer
    /// holds no worker permit while it waits.
    fn schedule_retry(self: &Arc<Self>, id: InvocationId, delay: Duration) {
        let shared = Arc::clone(self);
        let mut cancelled = self.cancel_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = signalled(&mut cancelled) => return,
            }
            let mut state = shared.state.lock();
            if state.cancelled.is_some() {
                return;
            }
            let inv = &mut state.invocations[id.as_u64() as usize];
            if inv.status == InvocationStatus::AwaitingRetry {
                inv.status = InvocationStatus::Ready;
                let attempts = inv.attempts;
                shared.queue_for(attempts).push(id);
            }
        });
    }

    /// Cancel every non-terminal invocation. In-flight computations are told
    /// through their context and their late results are discarded.
    pub fn cancel(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.cancelled.is_none() {
            state.cancelled = Some(reason.to_string());
            self.cancel_tx.send_replace(true);
            self.emit(RunEvent::RunCancelled {
                reason: reason.to_string(),
            });
        }
        self.ready.clear();
        if let Some(queue) = &self.retry_ready {
            queue.clear();
        }
        for idx in 0..state.invocations.len() {
            if !state.invocations[idx].status.is_terminal() {
                self.cancel_one(&mut state, InvocationId(idx as u64), reason);
            }
        }
    }

    /// Cancel declared invocations that never got their arguments, along
    /// with everything downstream of them.
    fn cancel_unbound(&self) {
        let mut state = self.state.lock();
        for idx in 0..state.invocations.len() {
            let id = InvocationId(idx as u64);
            if !state.graph.is_bound(id) && !state.invocations[idx].status.is_terminal() {
                self.cancel_one(&mut state, id, UNBOUND_REASON);
                self.propagate_failure(&mut state, id);
            }
        }
    }

    /// Wait until every invocation submitted so far is terminal
    pub async fn join(&self) -> RunReport {
        self.cancel_unbound();
        let mut open = self.open_tx.subscribe();
        let _ = open.wait_for(|remaining| *remaining == 0).await;
        let emitted = self.sequence.load(Ordering::SeqCst);
        let mut delivered = self.delivered.subscribe();
        let _ = delivered.wait_for(|next| *next >= emitted).await;
        let report = self.report();
        info!(
            run = %self.name,
            succeeded = report.metrics.succeeded,
            failed = report.metrics.failed + report.metrics.failed_dependency,
            cancelled = report.metrics.cancelled,
            elapsed_ms = report.metrics.elapsed.as_millis() as u64,
            "run finished"
        );
        report
    }

    pub fn status(&self, id: InvocationId) -> Option<InvocationStatus> {
        self.state
            .lock()
            .invocations
            .get(id.as_u64() as usize)
            .map(|inv| inv.status)
    }

    pub fn execution_order(&self) -> Vec<InvocationId> {
        self.state.lock().graph.execution_order()
    }

    pub fn to_dot(&self) -> String {
        let state = self.state.lock();
        state.graph.to_dot(&self.name, |id| {
            match state.invocations[id.as_u64() as usize].status {
                InvocationStatus::Succeeded => "#E6FFE6",
                InvocationStatus::Failed | InvocationStatus::FailedDependency => "#FFE6E6",
                InvocationStatus::Cancelled => "#EEEEEE",
                InvocationStatus::Running | InvocationStatus::AwaitingRetry => "#FFF7D6",
                InvocationStatus::Pending | InvocationStatus::Ready => "white",
            }
        })
    }

    pub fn report(&self) -> RunReport {
        let state = self.state.lock();
        let mut metrics = RunMetrics {
            submitted: state.invocations.len(),
            retries: self.retries.load(Ordering::SeqCst),
            max_running: self.max_running.load(Ordering::SeqCst),
            elapsed: self.started.elapsed(),
            ..RunMetrics::default()
        };
        let invocations = state
            .invocations
            .iter()
            .enumerate()
            .map(|(idx, inv)| {
                let id = InvocationId(idx as u64);
                match inv.status {
                    InvocationStatus::Succeeded => metrics.succeeded += 1,
                    InvocationStatus::Failed => metrics.failed += 1,
                    InvocationStatus::FailedDependency => metrics.failed_dependency += 1,
                    InvocationStatus::Cancelled => metrics.cancelled += 1,
                    _ => {}
                }
                InvocationReport {
                    invocation: id,
                    task: inv.definition.name().to_string(),
                    status: inv.status,
                    attempts: inv.attempts,
                    upstream: state.graph.parents(id),
                    is_leaf: state.graph.is_leaf(id),
                    outcome: inv.future.try_get(),
                }
            })
            .collect();

        RunReport {
            run_id: self.run_id.clone(),
            name: self.name.clone(),
            invocations,
            metrics,
        }
    }

    /// Stop the dispatcher. Anything still open is cancelled first so no
    /// future is left unresolved.
    pub fn shutdown(&self) {
        let open = self.state.lock().open;
        if open > 0 {
            self.cancel("run handle dropped");
        }
        self.stop_tx.send_replace(true);
    }
}
