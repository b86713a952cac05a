//! Cloneable publish handle for one session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, QoS};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::session::acks::AckTracker;
use crate::session::status::client_topic;
use crate::utils::error::PublishError;

/// Maps a requested QoS to the level actually used.
///
/// Values above 2 are clamped to 0 with a warning instead of being rejected.
pub fn effective_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        other => {
            warn!(requested = other, "QoS out of range, publishing at QoS 0");
            QoS::AtMostOnce
        }
    }
}

/// Publishes on behalf of a [`Session`](super::Session).
///
/// Every call blocks until the broker acknowledges the message (QoS 1/2), the
/// message is written out (QoS 0), or the attempt fails. Nothing is retried or
/// buffered: a publish while the session is reconnecting fails immediately.
#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    tracker: Arc<Mutex<AckTracker>>,
    client_id: String,
    ack_timeout: Duration,
}

impl Publisher {
    pub(crate) fn new(
        client: AsyncClient,
        tracker: Arc<Mutex<AckTracker>>,
        client_id: String,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            client,
            tracker,
            client_id,
            ack_timeout,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn publish(
        &self,
        topic: &str,
        qos: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), PublishError> {
        let qos = effective_qos(qos);
        let waiter = {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.ensure_accepting(topic)?;
            self.client
                .try_publish(topic, qos, false, payload)
                .map_err(|source| PublishError::Rejected {
                    topic: topic.to_string(),
                    source,
                })?;
            tracker.register(topic, qos, true)
        };
        let Some(waiter) = waiter else {
            return Err(PublishError::Closed {
                topic: topic.to_string(),
            });
        };

        match timeout(self.ack_timeout, waiter).await {
            Ok(Ok(outcome)) => {
                if outcome.is_ok() {
                    debug!(topic, ?qos, "publish acknowledged");
                }
                outcome
            }
            Ok(Err(_dropped)) => Err(PublishError::Closed {
                topic: topic.to_string(),
            }),
            Err(_elapsed) => Err(PublishError::Timeout {
                topic: topic.to_string(),
                timeout: self.ack_timeout,
            }),
        }
    }

    /// Publishes to the application topic `<prefix>/<client-id>`.
    pub async fn publish_application(
        &self,
        prefix: &str,
        qos: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), PublishError> {
        let topic = client_topic(prefix, &self.client_id);
        self.publish(&topic, qos, payload).await
    }

    /// Queues a QoS 0 message without waiting for it.
    ///
    /// Used by the event loop for status announcements, where waiting on its
    /// own acknowledgement would stall the loop.
    pub(crate) fn announce(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        tracker.ensure_accepting(topic)?;
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|source| PublishError::Rejected {
                topic: topic.to_string(),
                source,
            })?;
        tracker.register(topic, QoS::AtMostOnce, false);
        Ok(())
    }
}
