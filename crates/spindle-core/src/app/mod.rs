//! App - アプリケーション層
//!
//! ports・queue・registry・bus を組み合わせてスケジューラを構成します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: 構築とワイヤリング（起動時検証）
//! - **Scheduler**: enqueue / cancel / status と dispatch loop
//! - **QueueStatus**: ポーリング用のスナップショット

pub mod builder;
pub mod scheduler;
pub mod status;

pub use self::builder::SchedulerBuilder;
pub use self::scheduler::{Scheduler, TaskRequest};
pub use self::status::QueueStatus;
