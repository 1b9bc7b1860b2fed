//! Typed - executor API
//!
//! Payloads are a closed sum type ([`TaskPayload`](crate::domain::TaskPayload)),
//! and executors are looked up by [`TaskKind`](crate::domain::TaskKind) in the
//! registry. The scheduler never matches on kinds itself.

pub mod handler;
pub mod registry;

pub use self::handler::{
    FnExecutor, ProgressReporter, ProgressSink, TaskExecutor, executor_fn,
};
pub use self::registry::ExecutorRegistry;
