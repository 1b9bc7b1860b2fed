//! Task model: kind, priority, typed payload and the task record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::TaskId;
use super::state::TaskStatus;
use crate::error::SchedulerError;

/// Which executor handles a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MediaUpload,
    MediaProcess,
    MediaEncrypt,
    PlaceSync,
    VersionCreate,
    BatchOperation,
    FileValidation,
    SearchIndex,
}

impl TaskKind {
    pub const ALL: [TaskKind; 8] = [
        TaskKind::MediaUpload,
        TaskKind::MediaProcess,
        TaskKind::MediaEncrypt,
        TaskKind::PlaceSync,
        TaskKind::VersionCreate,
        TaskKind::BatchOperation,
        TaskKind::FileValidation,
        TaskKind::SearchIndex,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::MediaUpload => "media_upload",
            TaskKind::MediaProcess => "media_process",
            TaskKind::MediaEncrypt => "media_encrypt",
            TaskKind::PlaceSync => "place_sync",
            TaskKind::VersionCreate => "version_create",
            TaskKind::BatchOperation => "batch_operation",
            TaskKind::FileValidation => "file_validation",
            TaskKind::SearchIndex => "search_index",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority. Higher variants are dispatched first.
///
/// On the wire a priority is its number (`1..=4`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::High),
            4 => Ok(Priority::Critical),
            other => Err(format!("priority must be 1..=4, got {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUpload {
    pub file_name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attraction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub media_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceSync {
    pub place_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCreate {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub operations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValidation {
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndex {
    pub document_id: String,
}

/// Kind-specific payload. The variant decides the [`TaskKind`], so a task's
/// kind and payload can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    MediaUpload(MediaUpload),
    MediaProcess(MediaRef),
    MediaEncrypt(MediaRef),
    PlaceSync(PlaceSync),
    VersionCreate(VersionCreate),
    BatchOperation(BatchOperation),
    FileValidation(FileValidation),
    SearchIndex(SearchIndex),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::MediaUpload(_) => TaskKind::MediaUpload,
            TaskPayload::MediaProcess(_) => TaskKind::MediaProcess,
            TaskPayload::MediaEncrypt(_) => TaskKind::MediaEncrypt,
            TaskPayload::PlaceSync(_) => TaskKind::PlaceSync,
            TaskPayload::VersionCreate(_) => TaskKind::VersionCreate,
            TaskPayload::BatchOperation(_) => TaskKind::BatchOperation,
            TaskPayload::FileValidation(_) => TaskKind::FileValidation,
            TaskPayload::SearchIndex(_) => TaskKind::SearchIndex,
        }
    }
}

/// A unit of background work and its lifecycle.
///
/// Fields are read-only outside the crate: only the queue and the dispatch
/// loop move a task through its state machine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    priority: Priority,
    payload: TaskPayload,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_at: Option<DateTime<Utc>>,
    retry_count: u32,
    max_retries: u32,
    /// Executions started so far (including the current one while Processing).
    attempts: u32,
    progress: u8,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    /// Earliest instant a Retrying task may become Pending again.
    #[serde(skip_serializing_if = "Option::is_none")]
    not_before: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: TaskId,
        payload: TaskPayload,
        priority: Priority,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind: payload.kind(),
            priority,
            payload,
            status: TaskStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            retry_count: 0,
            max_retries,
            attempts: 0,
            progress: 0,
            last_error: None,
            not_before: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Pending -> Processing.
    pub(crate) fn start_attempt(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Processing)?;
        self.attempts += 1;
        self.progress = 0;
        self.started_at = Some(now);
        Ok(())
    }

    /// Raise progress while Processing. Values above 100 are clamped and
    /// lower values than the current one are ignored.
    ///
    /// Returns the new progress if it changed.
    pub(crate) fn advance_progress(&mut self, progress: u8) -> Option<u8> {
        if self.status != TaskStatus::Processing {
            return None;
        }
        let progress = progress.min(100);
        if progress <= self.progress {
            return None;
        }
        self.progress = progress;
        Some(progress)
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Completed)?;
        self.progress = 100;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Processing -> Retrying, consuming one retry.
    pub(crate) fn schedule_retry(
        &mut self,
        not_before: DateTime<Utc>,
        error: String,
    ) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Retrying)?;
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.not_before = Some(not_before);
        self.last_error = Some(error);
        Ok(())
    }

    /// Retrying -> Pending.
    pub(crate) fn requeue(&mut self) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Pending)?;
        self.not_before = None;
        Ok(())
    }

    pub(crate) fn mark_failed(
        &mut self,
        now: DateTime<Utc>,
        error: String,
    ) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Failed)?;
        self.failed_at = Some(now);
        self.last_error = Some(error);
        Ok(())
    }

    pub(crate) fn cancel(&mut self) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    fn sample_task() -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            TaskPayload::PlaceSync(PlaceSync {
                place_id: "p-1".into(),
            }),
            Priority::High,
            2,
            Utc::now(),
        )
    }

    #[test]
    fn priority_is_ordered() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn priority_travels_as_a_number() {
        assert_eq!(serde_json::to_value(Priority::Critical).unwrap(), json!(4));
        assert_eq!(
            serde_json::from_value::<Priority>(json!(1)).unwrap(),
            Priority::Low
        );
        assert!(serde_json::from_value::<Priority>(json!(7)).is_err());
        assert!(serde_json::from_value::<Priority>(json!("high")).is_err());
    }

    #[test]
    fn payload_decides_kind() {
        let task = sample_task();
        assert_eq!(task.kind(), TaskKind::PlaceSync);
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn payload_uses_adjacent_tagging() {
        let payload = TaskPayload::SearchIndex(SearchIndex {
            document_id: "doc-9".into(),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({ "kind": "search_index", "data": { "documentId": "doc-9" } })
        );
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let mut task = sample_task();
        assert_eq!(task.advance_progress(10), None, "not processing yet");

        task.start_attempt(Utc::now()).unwrap();
        assert_eq!(task.advance_progress(40), Some(40));
        assert_eq!(task.advance_progress(20), None);
        assert_eq!(task.progress(), 40);
        assert_eq!(task.advance_progress(250), Some(100));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut task = sample_task();
        let err = task.mark_completed(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
                ..
            }
        ));
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn retry_count_never_exceeds_max() {
        let mut task = sample_task();
        for _ in 0..5 {
            task.start_attempt(Utc::now()).unwrap();
            task.schedule_retry(Utc::now(), "boom".into()).unwrap();
            task.requeue().unwrap();
        }
        assert_eq!(task.retry_count(), task.max_retries());
        assert_eq!(task.attempts(), 5);
    }
}
