//! # Publish acknowledgement tracking.
//!
//! `rumqttc` only queues a publish; whether it reached the broker is observed
//! on the event loop. The tracker pairs each queued publish with the events
//! that complete it:
//!
//! - `Outgoing::Publish(pkid)` arrives in queue order. It completes a QoS 0
//!   publish and moves a QoS 1/2 publish in flight under `pkid`.
//! - `PubAck(pkid)` / `PubComp(pkid)` complete the in-flight entry.
//!
//! Connection loss fails every pending publish at once. The event loop also
//! drops the client's replay queue at that point, so nothing from the lost
//! connection is sent again and every later `Outgoing::Publish` belongs to a
//! publish registered after it.

use std::collections::{HashMap, VecDeque};

use rumqttc::QoS;
use tokio::sync::oneshot;

use crate::utils::error::PublishError;

pub(crate) type AckWaiter = oneshot::Receiver<Result<(), PublishError>>;

struct Pending {
    topic: String,
    qos: QoS,
    waiter: Option<oneshot::Sender<Result<(), PublishError>>>,
}

impl Pending {
    fn resolve(self, outcome: Result<(), PublishError>) {
        if let Some(waiter) = self.waiter {
            let _ = waiter.send(outcome);
        }
    }
}

#[derive(Default)]
pub(crate) struct AckTracker {
    connected: bool,
    closed: bool,
    unsent: VecDeque<Pending>,
    inflight: HashMap<u16, Pending>,
}

impl AckTracker {
    /// Fails fast when the session cannot currently carry a publish.
    pub(crate) fn ensure_accepting(&self, topic: &str) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::Closed {
                topic: topic.to_string(),
            });
        }
        if !self.connected {
            return Err(PublishError::ConnectionLost {
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    /// Records a publish that was just queued on the client.
    ///
    /// Must be called under the same lock as the client's `try_publish`, so
    /// the queue order here matches the order of `Outgoing::Publish` events.
    pub(crate) fn register(&mut self, topic: &str, qos: QoS, wait: bool) -> Option<AckWaiter> {
        let (tx, rx) = if wait {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        self.unsent.push_back(Pending {
            topic: topic.to_string(),
            qos,
            waiter: tx,
        });
        rx
    }

    pub(crate) fn on_connected(&mut self) {
        self.connected = !self.closed;
    }

    pub(crate) fn on_sent(&mut self, pkid: u16) {
        let Some(pending) = self.unsent.pop_front() else {
            return;
        };
        match pending.qos {
            QoS::AtMostOnce => pending.resolve(Ok(())),
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.inflight.insert(pkid, pending);
            }
        }
    }

    pub(crate) fn on_acked(&mut self, pkid: u16) {
        if let Some(pending) = self.inflight.remove(&pkid) {
            pending.resolve(Ok(()));
        }
    }

    pub(crate) fn connection_lost(&mut self) {
        self.connected = false;
        self.fail_all(|topic| PublishError::ConnectionLost { topic });
    }

    /// Terminal: fails everything pending and refuses new publishes.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.connected = false;
        self.fail_all(|topic| PublishError::Closed { topic });
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.unsent.len() + self.inflight.len()
    }

    fn fail_all(&mut self, error: impl Fn(String) -> PublishError) {
        let inflight = self.inflight.drain().map(|(_, pending)| pending);
        for pending in self.unsent.drain(..).chain(inflight) {
            let err = error(pending.topic.clone());
            pending.resolve(Err(err));
        }
    }
}
