use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::core::errors::{FlowError, Result};
use crate::task::definition::{Computation, TaskBuilder, TaskDefinition};
use crate::task::retry::RetryPolicy;

/// Namespace of task definitions.
///
/// Names are case-sensitive and unique within one registry. A registry is an
/// explicit value (usually owned by an [`crate::Engine`]); there is no hidden
/// global one.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<String, TaskDefinition>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `computation` as a named task and register it.
    pub fn define<C: Computation>(
        &self,
        name: impl Into<String>,
        computation: C,
        retry: RetryPolicy,
    ) -> Result<TaskDefinition> {
        let definition = TaskBuilder::new(name).retry(retry).build(computation)?;
        self.register(definition)
    }

    /// Same as [`TaskRegistry::define`] for a synchronous function.
    pub fn define_blocking<F>(
        &self,
        name: impl Into<String>,
        f: F,
        retry: RetryPolicy,
    ) -> Result<TaskDefinition>
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let definition = TaskBuilder::new(name).retry(retry).build_blocking(f)?;
        self.register(definition)
    }

    /// Register a definition built with [`TaskBuilder`].
    pub fn register(&self, definition: TaskDefinition) -> Result<TaskDefinition> {
        if definition.name().is_empty() {
            return Err(FlowError::InvalidName);
        }
        match self.tasks.entry(definition.name().to_string()) {
            Entry::Occupied(entry) => Err(FlowError::DuplicateName {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                debug!(task = definition.name(), "registered task");
                entry.insert(definition.clone());
                Ok(definition)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<TaskDefinition> {
        self.tasks.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}
