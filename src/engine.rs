use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::core::config::EngineConfig;
use crate::core::errors::Result;
use crate::flow::events::{EventSink, TracingEventSink};
use crate::flow::output::FlowOutput;
use crate::flow::report::RunReport;
use crate::flow::run::Run;
use crate::task::{Computation, RetryPolicy, TaskDefinition, TaskRegistry};

/// Entry point: owns the configuration, a task registry and the event sink
/// every run reports to.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    registry: TaskRegistry,
    events: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: TaskRegistry::new(),
            events: Arc::new(TracingEventSink),
        })
    }

    /// Replace the default `tracing` sink
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Share an existing registry instead of the engine's own
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn define<C: Computation>(
        &self,
        name: impl Into<String>,
        computation: C,
        retry: RetryPolicy,
    ) -> Result<TaskDefinition> {
        self.registry.define(name, computation, retry)
    }

    pub fn define_blocking<F>(
        &self,
        name: impl Into<String>,
        f: F,
        retry: RetryPolicy,
    ) -> Result<TaskDefinition>
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.registry.define_blocking(name, f, retry)
    }

    pub fn register(&self, definition: TaskDefinition) -> Result<TaskDefinition> {
        self.registry.register(definition)
    }

    /// Start an empty run. Must be called from within a Tokio runtime.
    pub fn start_run(&self, name: &str) -> Result<Run> {
        Run::start(name, self.config.clone(), Arc::clone(&self.events))
    }

    /// Execute a flow body to completion.
    ///
    /// The body submits work on the run it is given and returns futures (in
    /// any [`FlowOutput`] shape). Once every invocation is terminal the first
    /// failure is returned; otherwise the returned futures are resolved.
    /// With `partial_results` enabled only failures of the returned futures
    /// themselves are surfaced.
    pub async fn run_flow<F, Fut, O>(&self, name: &str, flow: F) -> Result<O::Output>
    where
        F: FnOnce(Run) -> Fut,
        Fut: Future<Output = Result<O>>,
        O: FlowOutput,
    {
        let (output, report) = self.run_flow_with_report(name, flow).await?;
        if !self.config.partial_results {
            if let Some(err) = report.first_failure() {
                return Err(err.clone());
            }
        }
        output
    }

    /// Like [`Engine::run_flow`] but also hands back the report, whatever
    /// the outcome of the returned futures. Fails only if the body itself
    /// returns an error.
    pub async fn run_flow_with_report<F, Fut, O>(
        &self,
        name: &str,
        flow: F,
    ) -> Result<(Result<O::Output>, RunReport)>
    where
        F: FnOnce(Run) -> Fut,
        Fut: Future<Output = Result<O>>,
        O: FlowOutput,
    {
        let run = self.start_run(name)?;
        let returned = match flow(run.clone()).await {
            Ok(returned) => returned,
            Err(err) => {
                warn!(run = name, error = %err, "flow body failed, cancelling run");
                run.cancel("flow body failed");
                run.join().await;
                return Err(err);
            }
        };
        let report = run.join().await;
        let output = returned.resolve_output().await;
        Ok((output, report))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: TaskRegistry::new(),
            events: Arc::new(TracingEventSink),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
