//! # Session monitors.
//!
//! One monitor per registered session drains that session's inbound channel.
//! For every message it allocates the next task id, builds the task and makes
//! a single non-blocking attempt to enqueue it. A full queue drops the task:
//! a congested session never blocks on the queue it shares with the others.
//!
//! Shutdown and enqueueing are ordered by a [`ShutdownGate`]: once the gate
//! has closed, no submission that started earlier can still reach the queue.
//!
//! Monitors never close the shared queue. They only hold a sender clone, and
//! the dispatcher closes the queue after every monitor has exited.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatcher::sequence::TaskIdAllocator;
use crate::dispatcher::stats::DispatchStats;
use crate::session::Message;
use crate::task::{TaskFactory, TaskId, TaskRef};
use crate::utils::error::DispatchError;

/// Shutdown token plus the lock that submissions hold while enqueueing.
#[derive(Clone)]
pub(crate) struct ShutdownGate {
    token: CancellationToken,
    lock: Arc<RwLock<()>>,
}

impl ShutdownGate {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// Cancels the token after every in-progress submission has finished.
    pub(crate) fn close(&self) {
        let _closing = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.token.cancel();
    }

    /// Admits one submission, or `None` once the gate has closed.
    fn admit(&self) -> Option<RwLockReadGuard<'_, ()>> {
        let guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        (!self.token.is_cancelled()).then_some(guard)
    }
}

/// Producer side of the shared task queue.
#[derive(Clone)]
pub(crate) struct Enqueuer {
    queue: mpsc::Sender<TaskRef>,
    capacity: usize,
    ids: Arc<TaskIdAllocator>,
    factory: Arc<dyn TaskFactory>,
    stats: Arc<DispatchStats>,
    gate: ShutdownGate,
}

impl Enqueuer {
    pub(crate) fn new(
        queue: mpsc::Sender<TaskRef>,
        capacity: usize,
        ids: Arc<TaskIdAllocator>,
        factory: Arc<dyn TaskFactory>,
        stats: Arc<DispatchStats>,
        gate: ShutdownGate,
    ) -> Self {
        Self {
            queue,
            capacity,
            ids,
            factory,
            stats,
            gate,
        }
    }

    /// Turns `message` into a task and tries to queue it without waiting.
    pub(crate) fn submit(&self, message: Message) -> Result<TaskId, DispatchError> {
        let Some(_admitted) = self.gate.admit() else {
            return Err(DispatchError::Stopped);
        };

        let task_id = self.ids.next_id();
        let task = self.factory.build(task_id, message);

        match self.queue.try_send(task) {
            Ok(()) => {
                self.stats.record_enqueued();
                Ok(task_id)
            }
            Err(TrySendError::Full(_)) => {
                self.stats.record_dropped();
                Err(DispatchError::QueueFull {
                    task_id,
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::QueueClosed { task_id }),
        }
    }
}

pub(crate) struct Monitor {
    session: String,
    inbound: mpsc::Receiver<Message>,
    enqueuer: Enqueuer,
    shutdown: CancellationToken,
}

impl Monitor {
    pub(crate) fn new(
        session: String,
        inbound: mpsc::Receiver<Message>,
        enqueuer: Enqueuer,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            inbound,
            enqueuer,
            shutdown,
        }
    }

    /// Runs until shutdown or until the session closes its inbound channel.
    pub(crate) async fn run(mut self) {
        debug!(session = %self.session, "monitor started");

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                message = self.inbound.recv() => match message {
                    Some(message) => message,
                    None => {
                        debug!(session = %self.session, "inbound stream closed");
                        break;
                    }
                },
            };

            let topic = message.topic().to_string();
            match self.enqueuer.submit(message) {
                Ok(task_id) => debug!(session = %self.session, %task_id, %topic, "task queued"),
                Err(DispatchError::Stopped) => break,
                Err(err) => warn!(
                    session = %self.session,
                    %topic,
                    label = err.as_label(),
                    "{err}"
                ),
            }
        }

        debug!(session = %self.session, "monitor exited");
    }
}
