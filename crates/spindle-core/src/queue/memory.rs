//! In-memory task queue.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::QueueCounts;
use crate::domain::{Priority, Task, TaskId, TaskStatus};
use crate::error::SchedulerError;

/// Position of a Pending task in dispatch order.
///
/// Higher priority first, then the order in which the task became Pending.
/// A retried task gets a fresh sequence number when it is promoted, so it
/// queues behind tasks that were already waiting in its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<Priority>,
    seq: u64,
    task_id: TaskId,
}

/// Retrying task waiting for its backoff.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    not_before: DateTime<Utc>,
    task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .not_before
            .cmp(&self.not_before)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

/// Ordered collection of tasks.
///
/// Design:
/// - `tasks` is the single source of truth for task state.
/// - `ready` and `scheduled` hold ids only; every id in `ready` is Pending and
///   every id in `scheduled` is Retrying.
/// - Nothing here is async. The scheduler keeps the queue and its in-flight
///   set behind one lock, which makes claiming atomic.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: HashMap<TaskId, Task>,
    ready: BTreeSet<ReadyKey>,
    ready_keys: HashMap<TaskId, ReadyKey>,
    scheduled: BinaryHeap<ScheduledTask>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_ready(&mut self, task_id: TaskId, priority: Priority) {
        let key = ReadyKey {
            priority: Reverse(priority),
            seq: self.next_seq,
            task_id,
        };
        self.next_seq += 1;
        self.ready.insert(key);
        self.ready_keys.insert(task_id, key);
    }

    fn take_ready(&mut self, task_id: TaskId) -> bool {
        match self.ready_keys.remove(&task_id) {
            Some(key) => self.ready.remove(&key),
            None => false,
        }
    }

    /// Add a freshly created (Pending) task.
    pub fn enqueue(&mut self, task: Task) -> TaskId {
        let task_id = task.id();
        debug_assert_eq!(task.status(), TaskStatus::Pending);
        self.push_ready(task_id, task.priority());
        self.tasks.insert(task_id, task);
        task_id
    }

    /// Move Retrying tasks whose backoff has elapsed back to Pending.
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.scheduled.peek() {
            if entry.not_before > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            let Some(task) = self.tasks.get_mut(&entry.task_id) else {
                continue;
            };
            if task.status() != TaskStatus::Retrying {
                continue;
            }
            if let Err(e) = task.requeue() {
                warn!(task_id = %entry.task_id, error = %e, "skipping retry promotion");
                continue;
            }
            let priority = task.priority();
            self.push_ready(entry.task_id, priority);
            promoted += 1;
        }
        promoted
    }

    /// Earliest pending retry deadline, if any.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduled.peek().map(|entry| entry.not_before)
    }

    fn next_ready(&self, in_flight: &HashSet<TaskId>) -> Option<ReadyKey> {
        self.ready
            .iter()
            .find(|key| !in_flight.contains(&key.task_id))
            .copied()
    }

    /// Next Pending task in dispatch order that is not already in
    /// `in_flight`. Due retries are promoted first; the task itself stays in
    /// the ready set until it is claimed.
    pub fn dequeue_next(
        &mut self,
        now: DateTime<Utc>,
        in_flight: &HashSet<TaskId>,
    ) -> Option<&Task> {
        self.promote_due(now);
        let key = self.next_ready(in_flight)?;
        self.tasks.get(&key.task_id)
    }

    /// Take the next task out of the ready set, add it to `in_flight` and
    /// mark it Processing, all under the caller's exclusive borrow.
    ///
    /// Returns a snapshot of the claimed task.
    pub fn claim_next(
        &mut self,
        now: DateTime<Utc>,
        in_flight: &mut HashSet<TaskId>,
    ) -> Option<Task> {
        self.promote_due(now);
        loop {
            let key = self.next_ready(in_flight)?;
            let task_id = key.task_id;
            self.take_ready(task_id);
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            match task.start_attempt(now) {
                Ok(()) => {
                    in_flight.insert(task_id);
                    return Some(task.clone());
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "dropping unclaimable task from ready set");
                }
            }
        }
    }

    /// Put a failed Processing task into Retrying until `not_before`.
    pub fn requeue(
        &mut self,
        task_id: TaskId,
        not_before: DateTime<Utc>,
        error: String,
    ) -> Result<&Task, SchedulerError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        task.schedule_retry(not_before, error)?;
        self.scheduled.push(ScheduledTask {
            not_before,
            task_id,
        });
        self.tasks
            .get(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))
    }

    pub fn complete(&mut self, task_id: TaskId, now: DateTime<Utc>) -> Result<&Task, SchedulerError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        task.mark_completed(now)?;
        Ok(task)
    }

    pub fn fail(
        &mut self,
        task_id: TaskId,
        now: DateTime<Utc>,
        error: String,
    ) -> Result<&Task, SchedulerError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        task.mark_failed(now, error)?;
        Ok(task)
    }

    /// Raise the progress of a Processing task. Returns the new value if it changed.
    pub fn update_progress(&mut self, task_id: TaskId, progress: u8) -> Option<u8> {
        self.tasks.get_mut(&task_id)?.advance_progress(progress)
    }

    /// Cancel a Pending task. Anything else is left untouched.
    pub fn cancel(&mut self, task_id: TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if task.status() != TaskStatus::Pending || task.cancel().is_err() {
            return false;
        }
        self.take_ready(task_id);
        true
    }

    /// Drop every task in a terminal state. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.status().is_terminal());
        before - self.tasks.len()
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            total: self.tasks.len(),
            ..QueueCounts::default()
        };
        for task in self.tasks.values() {
            match task.status() {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Retrying => counts.retrying += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}
