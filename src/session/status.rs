//! Connection state and presence announcements.
//!
//! [`ConnectionState`] is per-session and published through a `watch` channel
//! owned by the session. [`StatusPayload`] is the JSON document announced on
//! `<register-prefix>/<client-id>` on every connect and on stop.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Lifecycle of one session.
///
/// ```text
/// Disconnected -> Connecting -> Connected
/// Connected    -> Connecting          (connection lost, automatic)
/// *            -> Disconnected        (stop, terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence value carried in the status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Presence {
    #[serde(rename = "on-line")]
    Online,
    #[serde(rename = "off-line")]
    Offline,
}

/// Status document: `{"timestamp": RFC3339, "client_id": ..., "Status": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusPayload {
    pub timestamp: String,
    pub client_id: String,
    #[serde(rename = "Status")]
    pub status: Presence,
}

impl StatusPayload {
    pub fn new(client_id: impl Into<String>, status: Presence) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            client_id: client_id.into(),
            status,
        }
    }

    pub fn online(client_id: impl Into<String>) -> Self {
        Self::new(client_id, Presence::Online)
    }

    pub fn offline(client_id: impl Into<String>) -> Self {
        Self::new(client_id, Presence::Offline)
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// `<prefix>/<client-id>`, used for both the status and application topics.
pub fn client_topic(prefix: &str, client_id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), client_id)
}
