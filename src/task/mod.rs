//! The `task` module defines the unit of work executed by the worker pool.
//!
//! - [`Task`]: the cancellable execution contract, with identity and type tag.
//! - [`PayloadTask`]: the concrete variant that decodes a message payload.
//! - [`TaskFactory`]: how the dispatcher turns a message into a task.

pub mod payload;
#[allow(clippy::module_inception)]
pub mod task;

pub use payload::{PayloadTask, PayloadTaskFactory};
pub use task::{Task, TaskFactory, TaskId, TaskKind, TaskRef};
