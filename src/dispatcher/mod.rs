//! The `dispatcher` module moves inbound messages from sessions to workers.
//!
//! - [`Dispatcher`]: registry of sessions, the shared bounded queue and the shutdown sequence.
//! - `monitor`: one drain loop per session, non-blocking enqueue.
//! - `worker`: the fixed pool executing tasks under a per-task timeout.
//! - [`TaskIdAllocator`]: the single source of task ids.
//! - [`StatsSnapshot`]: counters for diagnostics.

pub mod engine;
mod monitor;
pub mod sequence;
pub mod stats;
mod worker;

pub use engine::{Dispatcher, DispatcherConfig};
pub use sequence::TaskIdAllocator;
pub use stats::{DispatchStats, StatsSnapshot};
