//! Queue module: ordering, retry policy and the in-memory task store.

mod memory;
mod retry;

pub use memory::TaskQueue;
pub use retry::{Jitter, RetryPolicy};

use serde::{Deserialize, Serialize};

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
    pub cancelled: usize,
}
