//! ExecutorRegistry - TaskKind ごとの executor 登録
//!
//! Built during initialization (mutable), shared read-only once the scheduler
//! runs. Adding a new kind of work is a registration, never a scheduler change.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::TaskExecutor;
use crate::domain::TaskKind;
use crate::error::SchedulerError;

#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: TaskExecutor + 'static>(
        &mut self,
        kind: TaskKind,
        executor: E,
    ) -> Result<(), SchedulerError> {
        self.register_arc(kind, Arc::new(executor))
    }

    pub fn register_arc(
        &mut self,
        kind: TaskKind,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<(), SchedulerError> {
        if self.executors.contains_key(&kind) {
            return Err(SchedulerError::DuplicateExecutor(kind));
        }
        self.executors.insert(kind, executor);
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn contains(&self, kind: TaskKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.executors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionError, TaskPayload};
    use crate::typed::{ProgressReporter, executor_fn};
    use serde_json::{Value, json};

    fn ok_executor() -> impl TaskExecutor {
        executor_fn(|_payload: TaskPayload, _progress: ProgressReporter| async {
            Ok::<Value, ExecutionError>(json!({}))
        })
    }

    #[test]
    fn register_and_get() {
        let mut registry = ExecutorRegistry::new();
        registry.register(TaskKind::PlaceSync, ok_executor()).unwrap();

        assert!(registry.get(TaskKind::PlaceSync).is_some());
        assert!(registry.get(TaskKind::SearchIndex).is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry.register(TaskKind::PlaceSync, ok_executor()).unwrap();
        let result = registry.register(TaskKind::PlaceSync, ok_executor());
        assert!(matches!(
            result,
            Err(SchedulerError::DuplicateExecutor(TaskKind::PlaceSync))
        ));
    }

    #[test]
    fn kinds_are_sorted() {
        let mut registry = ExecutorRegistry::new();
        registry.register(TaskKind::SearchIndex, ok_executor()).unwrap();
        registry.register(TaskKind::MediaUpload, ok_executor()).unwrap();
        assert_eq!(
            registry.kinds(),
            vec![TaskKind::MediaUpload, TaskKind::SearchIndex]
        );
    }
}
