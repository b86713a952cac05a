//! Inbound message value.
//!
//! `Message` is what a session hands to the dispatcher for every delivery from
//! its broker. It is immutable once built: fields are private and only read
//! through accessors. The payload is opaque here; decoding belongs to the task.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    timestamp: DateTime<Utc>,
    hostname: String,
    client_id: String,
    topic: String,
    qos: u8,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(
        hostname: impl Into<String>,
        client_id: impl Into<String>,
        topic: impl Into<String>,
        qos: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            hostname: hostname.into(),
            client_id: client_id.into(),
            topic: topic.into(),
            qos,
            payload: payload.into(),
        }
    }

    /// When the session received the message.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Alias of the session (broker) that delivered the message.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
