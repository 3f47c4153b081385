use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::{FlowError, Result};
use crate::task::context::TaskContext;
use crate::task::retry::RetryPolicy;

/// The work a task performs: ordered arguments in, one value out.
#[async_trait]
pub trait Computation: Send + Sync + 'static {
    async fn call(&self, args: Vec<Value>, ctx: TaskContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> Computation for F
where
    F: Fn(Vec<Value>, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>, ctx: TaskContext) -> anyhow::Result<Value> {
        (self)(args, ctx).await
    }
}

/// Adapter running a synchronous function on tokio's blocking pool.
///
/// A blocking job cannot be interrupted. When the awaiting future is dropped
/// (a timeout), the worker keeps its slot until the job has returned.
pub struct Blocking<F>(Arc<F>);

impl<F> Blocking<F>
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

#[async_trait]
impl<F> Computation for Blocking<F>
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    async fn call(&self, args: Vec<Value>, ctx: TaskContext) -> anyhow::Result<Value> {
        let f = Arc::clone(&self.0);
        let done = ctx.track_blocking();
        tokio::task::spawn_blocking(move || {
            let _done = done;
            f(&args)
        })
            .await
            .map_err(|e| anyhow::anyhow!("blocking computation panicked: {}", e))?
    }
}

/// Number of positional arguments a computation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arity {
    Fixed(usize),
    AtLeast(usize),
    #[default]
    Variadic,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Variadic => f.write_str("any number of"),
        }
    }
}

struct DefinitionInner {
    name: String,
    description: Option<String>,
    arity: Arity,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    computation: Arc<dyn Computation>,
}

/// Immutable, named unit of work. Cloning is cheap and every clone refers to
/// the same definition.
#[derive(Clone)]
pub struct TaskDefinition {
    inner: Arc<DefinitionInner>,
}

impl TaskDefinition {
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    pub fn arity(&self) -> Arity {
        self.inner.arity
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub(crate) fn computation(&self) -> Arc<dyn Computation> {
        Arc::clone(&self.inner.computation)
    }

    /// Run the computation once, outside any run. Useful for unit-testing a
    /// task body.
    pub async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        self.inner
            .computation
            .call(args, TaskContext::detached(self.name()))
            .await
    }

    pub(crate) fn check_arity(&self, count: usize) -> Result<()> {
        if self.inner.arity.accepts(count) {
            Ok(())
        } else {
            Err(FlowError::ArityMismatch {
                task: self.inner.name.clone(),
                expected: self.inner.arity,
                actual: count,
            })
        }
    }

    /// Whether `other` is a clone of this definition
    pub fn same_as(&self, other: &TaskDefinition) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.inner.name)
            .field("arity", &self.inner.arity)
            .field("retry", &self.inner.retry)
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

/// Fluent builder for task definitions
#[derive(Debug)]
pub struct TaskBuilder {
    name: String,
    description: Option<String>,
    arity: Arity,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arity: Arity::Variadic,
            retry: RetryPolicy::none(),
            timeout: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn arity(mut self, arity: Arity) -> Self {
        self.arity = arity;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Finish with an async computation
    pub fn build<C: Computation>(self, computation: C) -> Result<TaskDefinition> {
        self.build_arc(Arc::new(computation))
    }

    /// Finish with a synchronous function, run on the blocking pool
    pub fn build_blocking<F>(self, f: F) -> Result<TaskDefinition>
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.build(Blocking::new(f))
    }

    fn build_arc(self, computation: Arc<dyn Computation>) -> Result<TaskDefinition> {
        if self.name.is_empty() {
            return Err(FlowError::InvalidName);
        }
        self.retry.validate()?;
        if self.timeout == Some(Duration::ZERO) {
            return Err(FlowError::configuration(format!(
                "task {} has a zero timeout",
                self.name
            )));
        }
        Ok(TaskDefinition {
            inner: Arc::new(DefinitionInner {
                name: self.name,
                description: self.description,
                arity: self.arity,
                retry: self.retry,
                timeout: self.timeout,
                computation,
            }),
        })
    }
}
