//! IdGenerator port - ID 生成の抽象化
//!
//! Ids are ULIDs whose timestamp part comes from the injected [`Clock`], so a
//! `FixedClock` yields deterministic timestamps while the random part keeps
//! ids unique.

use crate::domain::{EventId, SampleId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn sample_id(&self) -> SampleId;

    fn event_id(&self) -> EventId;
}

/// ULID based generator.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn sample_id(&self) -> SampleId {
        SampleId::from(self.next())
    }

    fn event_id(&self) -> EventId {
        EventId::from(self.next())
    }
}
