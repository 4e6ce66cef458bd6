//! Queue module: per-key state, retry logic, and the work queue itself.

mod record;
mod retry;
mod state;
mod work_queue;

pub use record::DelayedEntry;
pub use retry::RetryPolicy;
pub use state::KeyState;
pub use work_queue::WorkQueue;

use serde::{Deserialize, Serialize};

/// Snapshot of queue occupancy for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
    pub failing: usize,
}
