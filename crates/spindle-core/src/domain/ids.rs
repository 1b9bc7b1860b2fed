//! Domain identifiers (strongly-typed IDs).
//!
//! All ids are ULIDs wrapped in a phantom-typed `Id<T>`, so a `TaskId` can never
//! be passed where a `SampleId` is expected. ULIDs sort by creation time and can
//! be generated without coordination.
//!
//! On the wire an id is the prefixed string form (`task-01J...`), which is also
//! what `Display` prints.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each id type. Supplies the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
///
/// `T` is only a compile-time marker; `Id<T>` has the same size as `Ulid`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when parsing an id string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id `{input}`: expected prefix `{prefix}` followed by a ULID")]
pub struct ParseIdError {
    pub input: String,
    pub prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            input: s.to_string(),
            prefix: T::prefix(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskMarker {}

impl IdMarker for TaskMarker {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleMarker {}

impl IdMarker for SampleMarker {
    fn prefix() -> &'static str {
        "sample-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventMarker {}

impl IdMarker for EventMarker {
    fn prefix() -> &'static str {
        "evt-"
    }
}

/// Identifier of a queued task.
pub type TaskId = Id<TaskMarker>;

/// Identifier of one recorded performance sample.
pub type SampleId = Id<SampleMarker>;

/// Identifier of a message on the event channel.
pub type EventId = Id<EventMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        let ulid = Ulid::new();

        assert!(TaskId::from_ulid(ulid).to_string().starts_with("task-"));
        assert!(SampleId::from_ulid(ulid).to_string().starts_with("sample-"));
        assert!(EventId::from_ulid(ulid).to_string().starts_with("evt-"));
    }

    #[test]
    fn ids_serialize_as_prefixed_strings() {
        let id = TaskId::from_ulid(Ulid::new());

        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));

        let back: TaskId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parsing_rejects_foreign_prefix() {
        let sample = SampleId::from_ulid(Ulid::new()).to_string();
        let err = sample.parse::<TaskId>().unwrap_err();
        assert_eq!(err.prefix, "task-");
    }

    #[test]
    fn phantom_marker_does_not_consume_memory() {
        assert_eq!(std::mem::size_of::<TaskId>(), std::mem::size_of::<Ulid>());
    }
}
