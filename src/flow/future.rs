use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::core::errors::{FlowError, Result};
use crate::core::types::{InvocationId, RunId};

/// Final outcome of an invocation.
pub type Outcome = std::result::Result<Value, FlowError>;

/// Single-assignment cell behind a [`TaskFuture`].
pub(crate) struct FutureCell {
    run_id: RunId,
    invocation: InvocationId,
    task: String,
    slot: watch::Sender<Option<Outcome>>,
}

impl FutureCell {
    /// Set the outcome. A second call fails with `AlreadyResolved` and leaves
    /// the first outcome untouched.
    pub(crate) fn set(&self, outcome: Outcome) -> Result<()> {
        let mut already_resolved = false;
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                already_resolved = true;
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if already_resolved {
            Err(FlowError::AlreadyResolved {
                invocation: self.invocation,
            })
        } else {
            Ok(())
        }
    }
}

/// Placeholder for an invocation's eventual result.
///
/// Returned immediately by [`crate::Run::submit`]; resolved by the scheduler
/// once the invocation reaches a terminal state. Clones share the same cell,
/// and once resolved every read returns the same outcome.
#[derive(Clone)]
pub struct TaskFuture {
    cell: Arc<FutureCell>,
}

impl TaskFuture {
    pub(crate) fn new(run_id: RunId, invocation: InvocationId, task: impl Into<String>) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            cell: Arc::new(FutureCell {
                run_id,
                invocation,
                task: task.into(),
                slot,
            }),
        }
    }

    pub fn invocation(&self) -> InvocationId {
        self.cell.invocation
    }

    pub fn task_name(&self) -> &str {
        &self.cell.task
    }

    pub(crate) fn run_id(&self) -> &RunId {
        &self.cell.run_id
    }

    pub(crate) fn set(&self, outcome: Outcome) -> Result<()> {
        self.cell.set(outcome)
    }

    /// Non-blocking poll
    pub fn is_ready(&self) -> bool {
        self.cell.slot.borrow().is_some()
    }

    /// The outcome, if already resolved
    pub fn try_get(&self) -> Option<Outcome> {
        self.cell.slot.borrow().clone()
    }

    /// Wait for the invocation to finish. Returns the value on success and
    /// the task's (or the propagated upstream) error otherwise.
    pub async fn resolve(&self) -> Result<Value> {
        let mut rx = self.cell.slot.subscribe();
        let resolved = rx
            .wait_for(|slot| slot.is_some())
            .await
            .map(|slot| slot.clone())
            .map_err(|_| FlowError::internal("future cell closed before resolution"))?;
        match resolved {
            Some(outcome) => outcome,
            None => Err(FlowError::internal("future woke without an outcome")),
        }
    }

    /// Whether both handles point at the same invocation
    pub fn same_cell(&self, other: &TaskFuture) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("task", &self.cell.task)
            .field("invocation", &self.cell.invocation)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl From<&TaskFuture> for TaskFuture {
    fn from(future: &TaskFuture) -> Self {
        future.clone()
    }
}

/// One positional argument of an invocation: a concrete value or the future
/// of another invocation in the same run.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Future(TaskFuture),
}

impl Arg {
    pub fn as_future(&self) -> Option<&TaskFuture> {
        match self {
            Arg::Future(future) => Some(future),
            Arg::Value(_) => None,
        }
    }
}

impl From<TaskFuture> for Arg {
    fn from(future: TaskFuture) -> Self {
        Arg::Future(future)
    }
}

impl From<&TaskFuture> for Arg {
    fn from(future: &TaskFuture) -> Self {
        Arg::Future(future.clone())
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

macro_rules! arg_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Value(Value::from(value))
                }
            }
        )*
    };
}

arg_from_scalar!(i32, i64, u32, u64, f64, bool, String, &str);

/// Build a `Vec<Arg>` from values and futures.
///
/// ```ignore
/// let sum = run.submit(&add, args![&n1, 5])?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::Arg::from($arg)),+]
    };
}
