//! # Dispatcher.
//!
//! Fans every registered session's inbound stream into one bounded queue
//! consumed by a fixed worker pool, and owns the shutdown sequence.
//!
//! ```text
//! session inbound ─► Monitor ─┐
//! session inbound ─► Monitor ─┼─► shared queue ─► Worker × N
//! session inbound ─► Monitor ─┘   (try_send)
//! ```
//!
//! ## Shutdown order
//! 1. cancel the shared token (monitors and workers both observe it); this
//!    waits out any enqueue already in progress
//! 2. wait for every monitor to exit
//! 3. close the queue by dropping the last sender
//! 4. wait for every worker to exit
//!
//! The queue is closed only by the dispatcher, and only once no monitor can
//! still be sending into it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DispatcherSettings;
use crate::dispatcher::monitor::{Enqueuer, Monitor, ShutdownGate};
use crate::dispatcher::sequence::TaskIdAllocator;
use crate::dispatcher::stats::{DispatchStats, StatsSnapshot};
use crate::dispatcher::worker::{SharedQueue, WorkerPool};
use crate::session::Message;
use crate::task::{PayloadTaskFactory, TaskFactory, TaskId};
use crate::utils::error::DispatchError;

/// Sizing of the queue and the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    pub worker_count: usize,
    /// Per-task execution budget. Zero disables it.
    pub task_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            worker_count: 4,
            task_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DispatcherSettings> for DispatcherConfig {
    fn from(settings: &DispatcherSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            worker_count: settings.worker_count,
            task_timeout: Duration::from_millis(settings.task_timeout_ms),
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    shutdown: CancellationToken,
    gate: ShutdownGate,
    stats: Arc<DispatchStats>,
    enqueuer: Option<Enqueuer>,
    queue: SharedQueue,
    sessions: HashSet<String>,
    pending: Vec<(String, mpsc::Receiver<Message>)>,
    monitoring: bool,
    monitors: Vec<JoinHandle<()>>,
    pool: Option<WorkerPool>,
    stopped: bool,
}

impl Dispatcher {
    /// Dispatcher turning every message into a payload-decoding task.
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_factory(config, PayloadTaskFactory)
    }

    pub fn with_factory(config: DispatcherConfig, factory: impl TaskFactory) -> Self {
        let config = DispatcherConfig {
            queue_capacity: config.queue_capacity.max(1),
            worker_count: config.worker_count.max(1),
            ..config
        };
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let shutdown = CancellationToken::new();
        let gate = ShutdownGate::new(shutdown.clone());
        let stats = Arc::new(DispatchStats::default());
        let enqueuer = Enqueuer::new(
            tx,
            config.queue_capacity,
            Arc::new(TaskIdAllocator::new()),
            Arc::new(factory),
            stats.clone(),
            gate.clone(),
        );

        Self {
            config,
            shutdown,
            gate,
            stats,
            enqueuer: Some(enqueuer),
            queue: Arc::new(Mutex::new(rx)),
            sessions: HashSet::new(),
            pending: Vec::new(),
            monitoring: false,
            monitors: Vec::new(),
            pool: None,
            stopped: false,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Adds a session's inbound stream.
    ///
    /// Registered before [`start`](Self::start), the stream is monitored once
    /// monitoring starts; registered after, it is monitored immediately.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        inbound: mpsc::Receiver<Message>,
    ) -> Result<(), DispatchError> {
        if self.stopped {
            return Err(DispatchError::Stopped);
        }
        let name = name.into();
        if !self.sessions.insert(name.clone()) {
            return Err(DispatchError::DuplicateSession(name));
        }

        if self.monitoring {
            self.spawn_monitor(name, inbound)?;
        } else {
            self.pending.push((name, inbound));
        }
        Ok(())
    }

    /// Registered session names.
    pub fn sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.iter().cloned().collect();
        names.sort();
        names
    }

    /// Spawns the worker pool.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        if self.stopped {
            return Err(DispatchError::Stopped);
        }
        if self.pool.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }

        let pool = WorkerPool::spawn(
            self.config.worker_count,
            self.queue.clone(),
            self.shutdown.clone(),
            self.config.task_timeout,
            self.stats.clone(),
        );
        info!(
            workers = pool.size(),
            queue_capacity = self.config.queue_capacity,
            task_timeout = ?self.config.task_timeout,
            "worker pool started"
        );
        self.pool = Some(pool);
        Ok(())
    }

    /// Launches one monitor per registered session.
    pub fn start(&mut self) -> Result<(), DispatchError> {
        if self.stopped {
            return Err(DispatchError::Stopped);
        }
        self.monitoring = true;
        for (name, inbound) in std::mem::take(&mut self.pending) {
            self.spawn_monitor(name, inbound)?;
        }
        Ok(())
    }

    /// Submits one message directly, bypassing the monitors.
    ///
    /// Never waits: a full queue yields [`DispatchError::QueueFull`].
    pub fn try_enqueue(&self, message: Message) -> Result<TaskId, DispatchError> {
        match &self.enqueuer {
            Some(enqueuer) => enqueuer.submit(message),
            None => Err(DispatchError::Stopped),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Ordered shutdown. When this returns, no monitor or worker is running
    /// and no task will execute again.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.gate.close();

        for handle in self.monitors.drain(..) {
            if let Err(err) = handle.await {
                warn!("monitor terminated abnormally: {err}");
            }
        }
        self.pending.clear();
        debug!("monitors stopped");

        self.enqueuer = None;
        debug!("task queue closed");

        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }

        let stats = self.stats.snapshot();
        info!(
            enqueued = stats.enqueued,
            dropped = stats.dropped,
            executed = stats.executed,
            failed = stats.failed,
            timed_out = stats.timed_out,
            abandoned = stats.abandoned,
            "dispatcher stopped"
        );
    }

    fn spawn_monitor(
        &mut self,
        name: String,
        inbound: mpsc::Receiver<Message>,
    ) -> Result<(), DispatchError> {
        let enqueuer = self.enqueuer.clone().ok_or(DispatchError::Stopped)?;
        let monitor = Monitor::new(name, inbound, enqueuer, self.shutdown.clone());
        self.monitors.push(tokio::spawn(monitor.run()));
        Ok(())
    }
}
