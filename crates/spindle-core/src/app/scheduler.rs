//! Scheduler - ディスパッチループ
//!
//! # フロー
//! 1. `enqueue()`: Task を作って TaskQueue に入れ、`added` を発行
//! 2. dispatch loop: 空きスロットの数だけ claim（queue と in-flight は同じロック）
//! 3. execute: registry から executor を引いて実行（panic / timeout も失敗扱い）
//! 4. finish: sample を記録し、完了・リトライ・失敗のいずれかへ遷移、スロット解放
//!
//! Task failures never reach the caller of `enqueue`; they are recorded on the
//! task, in the metrics, and in `queue_update` events.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::builder::SchedulerBuilder;
use super::status::QueueStatus;
use crate::bus::EventBus;
use crate::config::SchedulerConfig;
use crate::domain::{
    EventMessage, EventType, ExecutionError, Priority, QueueUpdate, Task, TaskId, TaskPayload,
};
use crate::error::SchedulerError;
use crate::metrics::{MetricsRecorder, PerformanceSample};
use crate::ports::{Clock, IdGenerator, SessionProvider};
use crate::queue::TaskQueue;
use crate::typed::{ExecutorRegistry, ProgressReporter, ProgressSink};

/// What to run, as handed to [`Scheduler::enqueue`].
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub payload: TaskPayload,
    pub priority: Priority,
    /// `None` uses [`SchedulerConfig::default_max_retries`].
    pub max_retries: Option<u32>,
}

impl TaskRequest {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            payload,
            priority: Priority::default(),
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

impl From<TaskPayload> for TaskRequest {
    fn from(payload: TaskPayload) -> Self {
        Self::new(payload)
    }
}

/// Bounded-concurrency task scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<DispatchState>,
    metrics: Mutex<MetricsRecorder>,
    registry: ExecutorRegistry,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    session: Arc<dyn SessionProvider>,
    bus: EventBus,
    /// Enqueue and slot release wake the dispatcher early.
    wake: Notify,
    cancel: CancellationToken,
    executions: TaskTracker,
    running: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Queue plus in-flight ids. Always locked together so a claim is atomic.
#[derive(Default)]
struct DispatchState {
    queue: TaskQueue,
    in_flight: HashSet<TaskId>,
}

/// Collaborators assembled by [`SchedulerBuilder`].
pub(crate) struct Parts {
    pub config: SchedulerConfig,
    pub registry: ExecutorRegistry,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub session: Arc<dyn SessionProvider>,
    pub bus: EventBus,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn from_parts(parts: Parts) -> Self {
        let metrics = MetricsRecorder::new(parts.config.metrics_capacity);
        Self {
            shared: Arc::new(Shared {
                config: parts.config,
                state: Mutex::new(DispatchState::default()),
                metrics: Mutex::new(metrics),
                registry: parts.registry,
                clock: parts.clock,
                ids: parts.ids,
                session: parts.session,
                bus: parts.bus,
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                executions: TaskTracker::new(),
                running: AtomicBool::new(false),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// Queue a task and return its id. Never fails: problems with the task
    /// surface later as a failed task.
    pub fn enqueue(&self, request: impl Into<TaskRequest>) -> TaskId {
        let request = request.into();
        let shared = &self.shared;
        let max_retries = request
            .max_retries
            .unwrap_or(shared.config.default_max_retries);
        let task = Task::new(
            shared.ids.task_id(),
            request.payload,
            request.priority,
            max_retries,
            shared.clock.now(),
        );
        let snapshot = task.clone();
        let task_id = lock(&shared.state).queue.enqueue(task);

        info!(
            task_id = %task_id,
            kind = %snapshot.kind(),
            priority = ?snapshot.priority(),
            max_retries,
            "task enqueued"
        );
        shared.emit(QueueUpdate::Added { task: snapshot });
        shared.wake.notify_one();
        task_id
    }

    /// Cancel a Pending task. Returns false for anything else.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let cancelled = lock(&self.shared.state).queue.cancel(task_id);
        if cancelled {
            info!(task_id = %task_id, "task cancelled");
            self.shared.emit(QueueUpdate::Cancelled { task_id });
        } else {
            debug!(task_id = %task_id, "cancel ignored; task is not pending");
        }
        cancelled
    }

    pub fn status(&self) -> QueueStatus {
        let counts = lock(&self.shared.state).queue.counts();
        let summary = lock(&self.shared.metrics).aggregate(self.shared.clock.now());
        QueueStatus::from_parts(counts, summary)
    }

    /// Copy of the recorded samples, oldest first.
    pub fn metrics(&self) -> Vec<PerformanceSample> {
        lock(&self.shared.metrics).snapshot()
    }

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        lock(&self.shared.state).queue.get(task_id).cloned()
    }

    /// Remove Completed, Failed and Cancelled tasks.
    pub fn prune(&self) -> usize {
        let removed = lock(&self.shared.state).queue.prune();
        debug!(removed, "pruned terminal tasks");
        removed
    }

    /// Number of tasks currently executing.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.state).in_flight.len()
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Spawn the dispatch loop. Calling it again while running does nothing;
    /// a scheduler that was shut down stays down.
    pub fn start(&self) {
        if self.shared.cancel.is_cancelled() {
            warn!("scheduler was shut down; not starting");
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = tokio::spawn(dispatch_loop(Arc::clone(&self.shared)));
        *lock(&self.shared.dispatcher) = Some(handle);
    }

    /// Stop claiming new work and wait for in-flight executions to finish.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let dispatcher = lock(&self.shared.dispatcher).take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatcher task failed");
            }
        }
        self.shared.executions.close();
        self.shared.executions.wait().await;
        self.shared.running.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("concurrency", &self.shared.config.concurrency)
            .field("running", &self.is_running())
            .field("executors", &self.shared.registry)
            .finish()
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    info!(concurrency = shared.config.concurrency, "dispatcher started");
    while !shared.cancel.is_cancelled() {
        let (claimed, wait) = shared.claim_ready();
        for task in claimed {
            spawn_execution(&shared, task);
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
    debug!("dispatcher stopped");
}

fn spawn_execution(shared: &Arc<Shared>, task: Task) {
    debug!(
        task_id = %task.id(),
        kind = %task.kind(),
        attempt = task.attempts(),
        "task claimed"
    );
    let worker = Arc::clone(shared);
    shared.executions.spawn(async move {
        let outcome = worker.run_attempt(&task).await;
        worker.finish(&task, outcome);
    });
}

impl Shared {
    /// Claim as many Pending tasks as there are free slots, and decide how
    /// long the dispatcher may sleep afterwards.
    fn claim_ready(&self) -> (Vec<Task>, Duration) {
        let now = self.clock.now();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        state.queue.promote_due(now);
        let mut claimed = Vec::new();
        while state.in_flight.len() < self.config.concurrency {
            match state.queue.claim_next(now, &mut state.in_flight) {
                Some(task) => claimed.push(task),
                None => break,
            }
        }

        let poll = if state.in_flight.len() >= self.config.concurrency {
            self.config.busy_poll
        } else {
            self.config.idle_poll
        };
        let wait = match state.queue.next_due() {
            Some(due) => poll.min((due - now).to_std().unwrap_or(Duration::ZERO)),
            None => poll,
        };
        (claimed, wait)
    }

    async fn run_attempt(self: &Arc<Self>, task: &Task) -> Result<Value, ExecutionError> {
        let Some(executor) = self.registry.get(task.kind()) else {
            return Err(ExecutionError::terminal(
                SchedulerError::ExecutorNotFound(task.kind()).to_string(),
            ));
        };

        let sink: Arc<dyn ProgressSink> = Arc::clone(self) as Arc<dyn ProgressSink>;
        let reporter = ProgressReporter::new(task.id(), sink);
        // execute() itself may panic before handing back a future
        let attempt =
            AssertUnwindSafe(async { executor.execute(task.payload(), &reporter).await })
                .catch_unwind();

        let result = match self.config.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ExecutionError::transient(format!(
                        "timed out after {}ms",
                        limit.as_millis()
                    )));
                }
            },
            None => attempt.await,
        };
        result.unwrap_or_else(|panic| {
            Err(ExecutionError::transient(format!(
                "executor panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    /// Record the attempt and move the task to its next state. Always frees
    /// the slot.
    fn finish(&self, task: &Task, outcome: Result<Value, ExecutionError>) {
        let now = self.clock.now();
        let task_id = task.id();
        let error = outcome.as_ref().err().map(ToString::to_string);
        let sample = PerformanceSample::finished(
            self.ids.sample_id(),
            task_id,
            task.kind(),
            task.attempts(),
            task.started_at().unwrap_or(now),
            now,
            error,
        )
        .with_metadata("priority", json!(task.priority()))
        .with_metadata("retryCount", json!(task.retry_count()));
        lock(&self.metrics).record(sample);

        let update = {
            let mut state = lock(&self.state);
            state.in_flight.remove(&task_id);
            self.settle(&mut state.queue, task_id, now, outcome)
        };
        match update {
            Ok(update) => self.emit(update),
            Err(e) => error!(task_id = %task_id, error = %e, "failed to record task outcome"),
        }
        self.wake.notify_one();
    }

    fn settle(
        &self,
        queue: &mut TaskQueue,
        task_id: TaskId,
        now: DateTime<Utc>,
        outcome: Result<Value, ExecutionError>,
    ) -> Result<QueueUpdate, SchedulerError> {
        let (kind, attempt, retry_count, retryable) = {
            let current = queue.get(task_id).ok_or(SchedulerError::UnknownTask(task_id))?;
            (
                current.kind(),
                current.attempts(),
                current.retry_count(),
                self.config.retry.should_retry(current),
            )
        };

        match outcome {
            Ok(result) => {
                let task = queue.complete(task_id, now)?;
                info!(task_id = %task_id, kind = %kind, attempt, "task completed");
                Ok(QueueUpdate::Completed {
                    task: task.clone(),
                    result,
                })
            }
            Err(err) if retryable && !err.is_terminal() => {
                let retry_count = retry_count + 1;
                let delay = self.config.retry.delay(retry_count);
                let not_before = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let delay_ms = delay.as_millis() as u64;

                let task = queue.requeue(task_id, not_before, err.to_string())?;
                warn!(
                    task_id = %task_id,
                    kind = %kind,
                    attempt,
                    retry_count = task.retry_count(),
                    delay_ms,
                    error = %err,
                    "task failed; retry scheduled"
                );
                Ok(QueueUpdate::Retrying {
                    task_id,
                    retry_count: task.retry_count(),
                    delay_ms,
                    error: err.to_string(),
                })
            }
            Err(err) => {
                let task = queue.fail(task_id, now, err.to_string())?;
                error!(
                    task_id = %task_id,
                    kind = %kind,
                    attempt,
                    terminal = err.is_terminal(),
                    error = %err,
                    "task failed"
                );
                Ok(QueueUpdate::Failed {
                    task: task.clone(),
                    error: err.to_string(),
                })
            }
        }
    }

    fn emit(&self, update: QueueUpdate) {
        let message = EventMessage::new(
            self.ids.event_id(),
            EventType::QueueUpdate,
            update.into_payload(),
            self.clock.now(),
        )
        .with_user(self.session.current_user_id());
        self.bus.publish(message);
    }
}

#[async_trait]
impl ProgressSink for Shared {
    async fn progress(&self, task_id: TaskId, progress: u8) {
        let changed = lock(&self.state).queue.update_progress(task_id, progress);
        if let Some(progress) = changed {
            debug!(task_id = %task_id, progress, "task progress");
            self.emit(QueueUpdate::Progress { task_id, progress });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
