//! The payload-decoding task.
//!
//! [`PayloadTask`] decodes the message payload as a JSON object. A payload
//! that is not an object is a [`TaskError::Decode`]: reported, then the task
//! is discarded. Nothing is retried, redelivered or dead-lettered.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::session::Message;
use crate::task::task::{Task, TaskFactory, TaskId, TaskKind, TaskRef};
use crate::utils::error::TaskError;

#[derive(Debug, Clone)]
pub struct PayloadTask {
    id: TaskId,
    message: Message,
}

impl PayloadTask {
    pub fn new(id: TaskId, message: Message) -> Self {
        Self { id, message }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Decodes the payload as a key/value document.
    pub fn decode(&self) -> Result<Map<String, Value>, TaskError> {
        serde_json::from_slice(self.message.payload()).map_err(|source| TaskError::Decode {
            task_id: self.id,
            source,
        })
    }
}

#[async_trait]
impl Task for PayloadTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Mqtt
    }

    fn label(&self) -> String {
        format!("MqttTask{{topic: {}, id: {}}}", self.message.topic(), self.id)
    }

    async fn execute(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        if ctx.is_cancelled() {
            return Err(TaskError::Canceled);
        }
        debug!(task_id = %self.id, topic = self.message.topic(), "executing task");

        let document = match self.decode() {
            Ok(document) => document,
            Err(err) => {
                error!(
                    task_id = %self.id,
                    topic = self.message.topic(),
                    payload = %String::from_utf8_lossy(self.message.payload()),
                    "{err}"
                );
                return Err(err);
            }
        };

        info!(
            task_id = %self.id,
            session = self.message.hostname(),
            topic = self.message.topic(),
            fields = document.len(),
            "payload decoded"
        );
        debug!(task_id = %self.id, payload = ?document);
        Ok(())
    }
}

/// Default factory: every message becomes a [`PayloadTask`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadTaskFactory;

impl TaskFactory for PayloadTaskFactory {
    fn build(&self, id: TaskId, message: Message) -> TaskRef {
        Arc::new(PayloadTask::new(id, message))
    }
}
