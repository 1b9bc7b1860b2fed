//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_kinds()` で必要な TaskKind を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば `SchedulerError::MissingExecutors` を返す
//!
//! 省略した collaborator はデフォルト実装になる（SystemClock, UlidGenerator,
//! AnonymousSession, detached EventBus）。

use std::sync::Arc;

use super::scheduler::{Parts, Scheduler};
use crate::bus::EventBus;
use crate::config::SchedulerConfig;
use crate::domain::TaskKind;
use crate::error::SchedulerError;
use crate::ports::{AnonymousSession, Clock, IdGenerator, SessionProvider, SystemClock, UlidGenerator};
use crate::typed::{ExecutorRegistry, TaskExecutor};

/// # 使用例
/// ```ignore
/// let scheduler = Scheduler::builder()
///     .register(TaskKind::SearchIndex, IndexExecutor::new(client))?
///     .expect_kinds(&[TaskKind::SearchIndex])
///     .bus(bus)
///     .build()?;
/// scheduler.start();
/// ```
#[derive(Default)]
pub struct SchedulerBuilder {
    registry: ExecutorRegistry,
    expected_kinds: Option<Vec<TaskKind>>,
    config: SchedulerConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    session: Option<Arc<dyn SessionProvider>>,
    bus: Option<EventBus>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: TaskExecutor + 'static>(
        mut self,
        kind: TaskKind,
        executor: E,
    ) -> Result<Self, SchedulerError> {
        self.registry.register(kind, executor)?;
        Ok(self)
    }

    pub fn register_arc(
        mut self,
        kind: TaskKind,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, SchedulerError> {
        self.registry.register_arc(kind, executor)?;
        Ok(self)
    }

    /// Kinds that must have an executor when `build()` runs.
    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected_kinds = Some(kinds.to_vec());
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<TaskKind> = expected
                .iter()
                .filter(|kind| !self.registry.contains(**kind))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(SchedulerError::MissingExecutors(missing));
            }
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))) as Arc<dyn IdGenerator>);
        Ok(Scheduler::from_parts(Parts {
            config: self.config,
            registry: self.registry,
            clock,
            ids,
            session: self
                .session
                .unwrap_or_else(|| Arc::new(AnonymousSession) as Arc<dyn SessionProvider>),
            bus: self.bus.unwrap_or_else(EventBus::detached),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionError, TaskPayload};
    use crate::error::ConfigError;
    use crate::typed::{ProgressReporter, executor_fn};
    use serde_json::Value;

    fn noop() -> impl TaskExecutor {
        executor_fn(|_payload: TaskPayload, _progress: ProgressReporter| async {
            Ok::<Value, ExecutionError>(Value::Null)
        })
    }

    #[test]
    fn build_success() {
        let scheduler = SchedulerBuilder::new()
            .register(TaskKind::PlaceSync, noop())
            .unwrap()
            .expect_kinds(&[TaskKind::PlaceSync])
            .build();
        assert!(scheduler.is_ok());
    }

    #[test]
    fn build_missing_kinds() {
        let scheduler = SchedulerBuilder::new()
            .register(TaskKind::PlaceSync, noop())
            .unwrap()
            .expect_kinds(&[TaskKind::PlaceSync, TaskKind::VersionCreate])
            .build();
        assert!(matches!(
            scheduler,
            Err(SchedulerError::MissingExecutors(missing)) if missing == vec![TaskKind::VersionCreate]
        ));
    }

    #[test]
    fn build_without_expectations() {
        assert!(SchedulerBuilder::new().build().is_ok());
    }

    #[test]
    fn duplicate_registration_fails() {
        let result = SchedulerBuilder::new()
            .register(TaskKind::PlaceSync, noop())
            .unwrap()
            .register(TaskKind::PlaceSync, noop());
        assert!(matches!(
            result,
            Err(SchedulerError::DuplicateExecutor(TaskKind::PlaceSync))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = SchedulerBuilder::new()
            .config(SchedulerConfig {
                concurrency: 0,
                ..SchedulerConfig::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(SchedulerError::Config(ConfigError::ZeroConcurrency))
        ));
    }
}
