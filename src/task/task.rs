//! # Task abstraction.
//!
//! A [`Task`] is one schedulable unit of work built by the dispatcher from an
//! inbound [`Message`](crate::session::Message). Tasks are shared as
//! [`TaskRef`] (`Arc<dyn Task>`) between the queue and the worker that runs it.
//!
//! The execution time budget is imposed by the worker, not by the task. A task
//! only has to honor the [`CancellationToken`] it receives: check it before
//! starting, check it during anything long, and return
//! [`TaskError::Canceled`] when it fires.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::session::Message;
use crate::utils::error::TaskError;

/// Globally unique, strictly increasing task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tag carried by every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Built from a broker message.
    Mqtt,
    /// Anything else (HTTP, local jobs, ...).
    Other,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Mqtt => "mqtt",
            TaskKind::Other => "other",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Asynchronous, cancelable unit of work.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use mqttagent::task::{Task, TaskId, TaskKind};
/// use mqttagent::utils::error::TaskError;
/// use tokio_util::sync::CancellationToken;
///
/// struct Noop(TaskId);
///
/// #[async_trait]
/// impl Task for Noop {
///     fn id(&self) -> TaskId { self.0 }
///     fn kind(&self) -> TaskKind { TaskKind::Other }
///     fn label(&self) -> String { format!("noop#{}", self.0) }
///
///     async fn execute(&self, ctx: CancellationToken) -> Result<(), TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::Canceled);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Identity assigned by the dispatcher.
    fn id(&self) -> TaskId;

    /// Type tag.
    fn kind(&self) -> TaskKind;

    /// Human-readable identity string for logs.
    fn label(&self) -> String;

    /// Runs the task until completion or cancellation.
    async fn execute(&self, ctx: CancellationToken) -> Result<(), TaskError>;
}

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;

/// Builds the task for one inbound message.
///
/// Closures of the shape `Fn(TaskId, Message) -> TaskRef` implement this trait,
/// which keeps custom task variants a one-liner at the call site.
pub trait TaskFactory: Send + Sync + 'static {
    fn build(&self, id: TaskId, message: Message) -> TaskRef;
}

impl<F> TaskFactory for F
where
    F: Fn(TaskId, Message) -> TaskRef + Send + Sync + 'static,
{
    fn build(&self, id: TaskId, message: Message) -> TaskRef {
        self(id, message)
    }
}
