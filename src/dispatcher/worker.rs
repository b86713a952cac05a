//! # Worker pool.
//!
//! A fixed set of workers compete for tasks on the shared queue. Each task
//! runs under a child of the shutdown token with its own time budget:
//!
//! ```text
//! Ok(())            -> executed
//! Err(Canceled)     -> abandoned
//! Err(other)        -> failed
//! budget exceeded   -> child cancelled, timed_out, worker moves on
//! shutdown          -> child cancelled, abandoned, worker exits
//! ```
//!
//! Shutdown is fail-fast: tasks still queued are abandoned, never drained.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::stats::DispatchStats;
use crate::task::TaskRef;
use crate::utils::error::TaskError;

/// Receiving end of the shared queue, one consumer at a time.
pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<TaskRef>>>;

pub(crate) struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers. Worker ids are `1..=size` and never reused.
    pub(crate) fn spawn(
        size: usize,
        queue: SharedQueue,
        shutdown: CancellationToken,
        task_timeout: Duration,
        stats: Arc<DispatchStats>,
    ) -> Self {
        let workers = (1..=size)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    shutdown: shutdown.clone(),
                    task_timeout,
                    stats: stats.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        Self { workers }
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit.
    pub(crate) async fn join(self) {
        for handle in self.workers {
            if let Err(err) = handle.await {
                warn!("worker terminated abnormally: {err}");
            }
        }
    }
}

struct Worker {
    id: usize,
    queue: SharedQueue,
    shutdown: CancellationToken,
    task_timeout: Duration,
    stats: Arc<DispatchStats>,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "worker started");

        loop {
            let task = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = next_task(&self.queue) => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            if !self.execute(task).await {
                break;
            }
        }

        debug!(worker = self.id, "worker exited");
    }

    /// Runs one task. Returns `false` when shutdown interrupted it.
    async fn execute(&self, task: TaskRef) -> bool {
        let child = self.shutdown.child_token();
        let label = task.label();
        debug!(worker = self.id, task = %label, kind = %task.kind(), "task started");

        let run = async {
            if self.task_timeout > Duration::ZERO {
                time::timeout(self.task_timeout, task.execute(child.clone()))
                    .await
                    .unwrap_or(Err(TaskError::Timeout {
                        timeout: self.task_timeout,
                    }))
            } else {
                task.execute(child.clone()).await
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                child.cancel();
                self.stats.record_abandoned();
                info!(worker = self.id, task = %label, "task abandoned by shutdown");
                return false;
            }
            result = run => result,
        };

        match result {
            Ok(()) => {
                self.stats.record_executed();
                debug!(worker = self.id, task = %label, "task finished");
            }
            Err(TaskError::Canceled) => {
                self.stats.record_abandoned();
                debug!(worker = self.id, task = %label, "task canceled");
            }
            Err(err @ TaskError::Timeout { .. }) => {
                child.cancel();
                self.stats.record_timed_out();
                warn!(worker = self.id, task = %label, label = err.as_label(), "{err}");
            }
            Err(err) => {
                self.stats.record_failed();
                warn!(worker = self.id, task = %label, label = err.as_label(), "{err}");
            }
        }
        true
    }
}

async fn next_task(queue: &SharedQueue) -> Option<TaskRef> {
    queue.lock().await.recv().await
}
