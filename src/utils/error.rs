//! The `error` module defines the error types used across the agent.
//!
//! Each enum belongs to one failure domain and never escalates past it:
//!
//! - [`ConfigError`] is fatal to the affected session only.
//! - [`ConnectError`] stays inside the session; it is logged and retried.
//! - [`PublishError`] is returned synchronously to the publishing caller.
//! - [`DispatchError`] is reported by the dispatcher and its monitors.
//! - [`TaskError`] is task-local; workers log it and move on.
//!
//! Every enum provides `as_label` for a stable snake_case label in logs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::task::TaskId;

/// Invalid or unusable broker configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The broker endpoint is empty.
    #[error("broker endpoint is required")]
    MissingEndpoint,

    /// The session (client) identifier is empty.
    #[error("session identifier is required")]
    MissingClientId,

    /// The endpoint is not a usable `host:port` pair.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Some but not all of root CA, client certificate and private key were given.
    #[error("TLS material must be all-or-nothing; missing {missing:?}")]
    PartialTls { missing: Vec<&'static str> },

    /// TLS files exist in configuration but could not be loaded.
    #[error("failed to load TLS material from {}: {reason}", path.display())]
    TlsMaterial { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::MissingEndpoint => "config_missing_endpoint",
            ConfigError::MissingClientId => "config_missing_client_id",
            ConfigError::InvalidEndpoint { .. } => "config_invalid_endpoint",
            ConfigError::PartialTls { .. } => "config_partial_tls",
            ConfigError::TlsMaterial { .. } => "config_tls_material",
        }
    }
}

/// A failed connection attempt. Never leaves the session.
#[derive(Error, Debug)]
#[error("connection to {broker} failed: {source}")]
pub struct ConnectError {
    pub broker: String,
    #[source]
    pub source: rumqttc::ConnectionError,
}

impl ConnectError {
    pub fn as_label(&self) -> &'static str {
        match self.source {
            rumqttc::ConnectionError::ConnectionRefused(_) => "connect_refused",
            rumqttc::ConnectionError::Tls(_) => "connect_tls",
            rumqttc::ConnectionError::NetworkTimeout => "connect_timeout",
            rumqttc::ConnectionError::Io(_) => "connect_io",
            _ => "connect_failed",
        }
    }
}

/// A publish that did not complete. Surfaced to the caller, never retried.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PublishError {
    /// The client refused to queue the request (full request queue, invalid topic).
    #[error("failed to publish message to topic {topic}: {source}")]
    Rejected {
        topic: String,
        #[source]
        source: rumqttc::ClientError,
    },

    /// The connection dropped before the broker acknowledged the message.
    #[error("connection lost before topic {topic} was acknowledged")]
    ConnectionLost { topic: String },

    /// No acknowledgement arrived in time.
    #[error("publish to topic {topic} not acknowledged within {timeout:?}")]
    Timeout { topic: String, timeout: Duration },

    /// The session stopped while the publish was pending.
    #[error("session closed while publishing to topic {topic}")]
    Closed { topic: String },
}

impl PublishError {
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::Rejected { .. } => "publish_rejected",
            PublishError::ConnectionLost { .. } => "publish_connection_lost",
            PublishError::Timeout { .. } => "publish_timeout",
            PublishError::Closed { .. } => "publish_closed",
        }
    }
}

/// Errors raised by the dispatcher, its monitors and its worker pool.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// The shared task queue is at capacity; the task was dropped.
    #[error("task queue full (capacity {capacity}); dropped task {task_id}")]
    QueueFull { task_id: TaskId, capacity: usize },

    /// The shared task queue has already been closed by shutdown.
    #[error("task queue closed; dropped task {task_id}")]
    QueueClosed { task_id: TaskId },

    /// A session with this name is already registered.
    #[error("session '{0}' is already registered")]
    DuplicateSession(String),

    /// The worker pool has already been started.
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// The dispatcher has been stopped and cannot be reused.
    #[error("dispatcher is stopped")]
    Stopped,
}

impl DispatchError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::QueueFull { .. } => "dispatch_queue_full",
            DispatchError::QueueClosed { .. } => "dispatch_queue_closed",
            DispatchError::DuplicateSession(_) => "dispatch_duplicate_session",
            DispatchError::AlreadyRunning => "dispatch_already_running",
            DispatchError::Stopped => "dispatch_stopped",
        }
    }
}

/// # Errors produced by task execution.
///
/// None of these are retried: a failed task is logged and discarded.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The message payload is not a key/value document.
    #[error("task {task_id}: failed to decode payload: {source}")]
    Decode {
        task_id: TaskId,
        #[source]
        source: serde_json::Error,
    },

    /// The execution context was cancelled.
    #[error("context cancelled")]
    Canceled,

    /// Execution exceeded the worker's time budget.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Any other execution failure.
    #[error("execution failed: {error}")]
    Fail { error: String },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Decode { .. } => "task_decode",
            TaskError::Canceled => "task_canceled",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fail { .. } => "task_failed",
        }
    }
}
