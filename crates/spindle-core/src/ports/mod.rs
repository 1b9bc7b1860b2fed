//! Ports - 抽象化レイヤー
//!
//! Every collaborator the scheduler talks to (time, id generation, the auth
//! session, the event channel) is a trait here, injected at construction.
//! Implementations for development and tests live in `impls`.

pub mod clock;
pub mod id_generator;
pub mod session;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::session::{AnonymousSession, SessionProvider, StaticSession};
pub use self::transport::{FrameSink, FrameStream, Transport};
