//! spindle-core
//!
//! Client-side background task scheduler: bounded concurrency, strict
//! priority with FIFO inside a tier, retries with exponential backoff,
//! progress events over a reconnecting duplex channel, and bounded
//! execution metrics.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, errors, events）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, SessionProvider, Transport）
//! - **queue**: TaskQueue と RetryPolicy
//! - **typed**: TaskExecutor trait と ExecutorRegistry
//! - **bus**: EventBus（再接続 + ローカル配信）
//! - **impls**: ports の実装（TcpTransport, ChannelTransport）
//! - **app**: SchedulerBuilder, Scheduler, QueueStatus
//! - **metrics**: PerformanceSample のリングバッファ

pub mod app;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod metrics;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{QueueStatus, Scheduler, SchedulerBuilder, TaskRequest};
pub use bus::{BusEvent, ConnectionState, Direction, EventBus, Subscribe};
pub use config::{EventBusConfig, SchedulerConfig};
pub use domain::{ExecutionError, Priority, Task, TaskId, TaskKind, TaskPayload, TaskStatus};
pub use error::{ConfigError, SchedulerError, TransportError};
pub use metrics::{MetricsSummary, PerformanceSample};
pub use typed::{ExecutorRegistry, ProgressReporter, TaskExecutor, executor_fn};
