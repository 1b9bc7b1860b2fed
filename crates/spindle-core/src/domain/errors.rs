//! Execution errors reported by task executors.

use serde::{Deserialize, Serialize};

/// Operational classification of a failed attempt.
///
/// - Transient: retried while the task has retries left.
/// - Terminal: the executor knows retrying cannot help (bad payload, missing
///   resource, no executor for the kind). The task fails immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Terminal,
}

/// Error returned by an executor for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    kind: ErrorKind,
    message: String,
}

impl ExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == ErrorKind::Terminal
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        Self::terminal(format!("json: {err}"))
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        Self::transient(format!("io: {err}"))
    }
}
