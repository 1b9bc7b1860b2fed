//! Domain model (ids, task, state machine, execution errors, channel events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod task;

pub use self::errors::{ErrorKind, ExecutionError};
pub use self::events::{EventMessage, EventType, QueueUpdate};
pub use self::ids::{EventId, SampleId, TaskId};
pub use self::state::TaskStatus;
pub use self::task::{
    BatchOperation, FileValidation, MediaRef, MediaUpload, PlaceSync, Priority, SearchIndex, Task,
    TaskKind, TaskPayload, VersionCreate,
};
