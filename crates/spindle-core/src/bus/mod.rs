//! Event bus: reconnecting duplex channel plus local fan-out.
//!
//! ```text
//!  publish(msg) ──┬──► broadcast ──► subscribe() receivers / Subscribe workers
//!                 └──► outbound mpsc ──► writer ──► Transport sink
//!
//!  Transport stream ──► parse ──► broadcast (Inbound)
//! ```
//!
//! Delivery over the channel is at-most-once: while the connection is not
//! up, outbound messages are dropped.

mod event_bus;
mod subscriber;

pub use self::event_bus::EventBus;
pub use self::subscriber::Subscribe;

use crate::domain::EventMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the channel.
    Inbound,
    /// Published locally.
    Outbound,
}

/// One message seen by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub direction: Direction,
    pub message: EventMessage,
}

impl BusEvent {
    pub fn inbound(message: EventMessage) -> Self {
        Self {
            direction: Direction::Inbound,
            message,
        }
    }

    pub fn outbound(message: EventMessage) -> Self {
        Self {
            direction: Direction::Outbound,
            message,
        }
    }
}
