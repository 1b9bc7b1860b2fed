use thiserror::Error;

use crate::domain::{TaskId, TaskKind, TaskStatus};

/// Errors raised while wiring or driving the scheduler.
///
/// Task-level failures never surface here; they are recorded on the task.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no executor registered for task kind={0}")]
    ExecutorNotFound(TaskKind),

    #[error("duplicate executor for task kind={0}")]
    DuplicateExecutor(TaskKind),

    #[error("missing executors for task kinds: {0:?}")]
    MissingExecutors(Vec<TaskKind>),

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("invalid transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failures of the event channel. Handled by the reconnect loop and only
/// ever logged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame codec: {0}")]
    Codec(String),

    #[error("encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("connection closed")]
    Closed,
}

impl From<tokio_util::codec::LinesCodecError> for TransportError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(e) => TransportError::Io(e),
            other => TransportError::Codec(other.to_string()),
        }
    }
}

/// Invalid runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint url `{value}`: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("endpoint `{0}` has no host")]
    MissingHost(String),

    #[error("cannot derive a channel endpoint from scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,
}
