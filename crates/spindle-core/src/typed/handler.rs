//! TaskExecutor trait - タスクを実行する側の定義
//!
//! An executor receives the typed payload and a [`ProgressReporter`], does the
//! work, and returns an arbitrary JSON result (attached to the `completed`
//! event) or an [`ExecutionError`].
//!
//! # 使用例
//! ```ignore
//! struct IndexExecutor { client: SearchClient }
//!
//! #[async_trait]
//! impl TaskExecutor for IndexExecutor {
//!     async fn execute(
//!         &self,
//!         payload: &TaskPayload,
//!         progress: &ProgressReporter,
//!     ) -> Result<Value, ExecutionError> {
//!         let TaskPayload::SearchIndex(doc) = payload else {
//!             return Err(ExecutionError::terminal("unexpected payload"));
//!         };
//!         progress.report(50).await;
//!         self.client.index(&doc.document_id).await?;
//!         Ok(json!({ "indexed": true }))
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ExecutionError, TaskId, TaskPayload};

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one attempt. Progress must be reported in `[0, 100]` and should
    /// only increase; the scheduler ignores values that go backwards.
    async fn execute(
        &self,
        payload: &TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<Value, ExecutionError>;
}

/// Receiver of progress updates (implemented by the scheduler).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, task_id: TaskId, progress: u8);
}

/// Handle given to an executor to report progress of the current attempt.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(task_id: TaskId, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            task_id,
            sink: Some(sink),
        }
    }

    /// Reporter that discards updates (for calling executors directly).
    pub fn detached(task_id: TaskId) -> Self {
        Self {
            task_id,
            sink: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub async fn report(&self, progress: u8) {
        if let Some(sink) = &self.sink {
            sink.progress(self.task_id, progress.min(100)).await;
        }
    }
}

/// Adapter turning an async closure into a [`TaskExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

/// Wrap `f(payload, progress)` as an executor.
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(TaskPayload, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskPayload, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    async fn execute(
        &self,
        payload: &TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<Value, ExecutionError> {
        (self.f)(payload.clone(), progress.clone()).await
    }
}
