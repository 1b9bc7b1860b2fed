//! Messages carried by the event channel.
//!
//! Wire format (one JSON object per message):
//! `{ "id": "evt-…", "type": "queue_update", "payload": {…}, "timestamp": "2025-…Z", "userId": "…" }`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{EventId, Task, TaskId};

/// Closed set of message types understood on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    QueueUpdate,
    SyncProgress,
    SystemStatus,
    PlaceUpdate,
    VersionCreated,
    UserNotification,
}

/// One message on the channel, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl EventMessage {
    pub fn new(id: EventId, event_type: EventType, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type,
            payload,
            timestamp,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// What happened to a queued task. Becomes the payload of a `QueueUpdate`.
#[derive(Debug, Clone)]
pub enum QueueUpdate {
    Added { task: Task },
    Progress { task_id: TaskId, progress: u8 },
    Completed { task: Task, result: Value },
    Retrying { task_id: TaskId, retry_count: u32, delay_ms: u64, error: String },
    Failed { task: Task, error: String },
    Cancelled { task_id: TaskId },
}

impl QueueUpdate {
    pub fn action(&self) -> &'static str {
        match self {
            QueueUpdate::Added { .. } => "added",
            QueueUpdate::Progress { .. } => "progress",
            QueueUpdate::Completed { .. } => "completed",
            QueueUpdate::Retrying { .. } => "retrying",
            QueueUpdate::Failed { .. } => "failed",
            QueueUpdate::Cancelled { .. } => "cancelled",
        }
    }

    pub fn into_payload(self) -> Value {
        let action = self.action();
        match self {
            QueueUpdate::Added { task } => json!({ "action": action, "item": task }),
            QueueUpdate::Progress { task_id, progress } => {
                json!({ "action": action, "itemId": task_id, "progress": progress })
            }
            QueueUpdate::Completed { task, result } => {
                json!({ "action": action, "item": task, "result": result })
            }
            QueueUpdate::Retrying {
                task_id,
                retry_count,
                delay_ms,
                error,
            } => json!({
                "action": action,
                "itemId": task_id,
                "retryCount": retry_count,
                "delayMs": delay_ms,
                "error": error,
            }),
            QueueUpdate::Failed { task, error } => {
                json!({ "action": action, "item": task, "error": error })
            }
            QueueUpdate::Cancelled { task_id } => json!({ "action": action, "itemId": task_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn message_matches_wire_shape() {
        let msg = EventMessage::new(
            EventId::from_ulid(Ulid::new()),
            EventType::QueueUpdate,
            json!({ "action": "added" }),
            Utc::now(),
        )
        .with_user(Some("user-1".into()));

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "queue_update");
        assert_eq!(value["userId"], "user-1");
        assert!(value["id"].as_str().unwrap().starts_with("evt-"));
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn user_id_is_optional_on_the_wire() {
        let raw = r#"{"id":"evt-01ARZ3NDEKTSV4RRFFQ69G5FAV","type":"sync_progress","payload":{"progress":50},"timestamp":"2025-01-01T00:00:00Z"}"#;
        let msg: EventMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.event_type, EventType::SyncProgress);
        assert_eq!(msg.user_id, None);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"id":"evt-01ARZ3NDEKTSV4RRFFQ69G5FAV","type":"media_upload_progress","payload":{},"timestamp":"2025-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<EventMessage>(raw).is_err());
    }
}
