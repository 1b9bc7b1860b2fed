//! Transport port - 双方向チャネル
//!
//! A transport opens one duplex connection and hands back its two halves:
//! a sink for outgoing frames and a stream of incoming frames. A frame is one
//! serialized [`EventMessage`](crate::domain::EventMessage).
//!
//! The stream ending (`None`) or yielding an error means the connection is
//! gone; the event bus then reconnects.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Human readable endpoint, for logs.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError>;
}
