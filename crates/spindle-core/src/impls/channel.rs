//! ChannelTransport - プロセス内の疑似サーバ
//!
//! The client half implements [`Transport`]; the server half accepts
//! connections and can be taken offline to simulate an outage. Dropping a
//! [`ServerConnection`] closes that connection from the server side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::EventMessage;
use crate::error::TransportError;
use crate::ports::{FrameSink, FrameStream, Transport};

#[derive(Debug, Clone)]
pub struct ChannelTransport {
    accept_tx: mpsc::UnboundedSender<ServerConnection>,
    status: Arc<ServerStatus>,
}

#[derive(Debug)]
struct ServerStatus {
    online: AtomicBool,
    attempts: AtomicUsize,
}

/// Server side of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelServer {
    accept_rx: mpsc::UnboundedReceiver<ServerConnection>,
    status: Arc<ServerStatus>,
}

/// One accepted connection, seen from the server.
#[derive(Debug)]
pub struct ServerConnection {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    /// Connected client/server pair. The server starts online.
    pub fn pair() -> (ChannelTransport, ChannelServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let status = Arc::new(ServerStatus {
            online: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
        });
        (
            ChannelTransport {
                accept_tx,
                status: Arc::clone(&status),
            },
            ChannelServer { accept_rx, status },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn endpoint(&self) -> String {
        "channel://in-memory".to_string()
    }

    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        self.status.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.status.online.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("server offline".into()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel::<String>();
        let (to_client, from_server) = mpsc::unbounded_channel::<String>();
        self.accept_tx
            .send(ServerConnection {
                from_client,
                to_client,
            })
            .map_err(|_| TransportError::Unavailable("server dropped".into()))?;

        let sink = futures::sink::unfold(
            to_server,
            |tx: mpsc::UnboundedSender<String>, frame: String| async move {
                tx.send(frame).map_err(|_| TransportError::Closed)?;
                Ok::<_, TransportError>(tx)
            },
        );
        let stream = futures::stream::unfold(from_server, |mut rx| async move {
            rx.recv()
                .await
                .map(|frame| (Ok::<String, TransportError>(frame), rx))
        });
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

impl ChannelServer {
    /// Next connection opened by the client.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accept_rx.recv().await
    }

    /// While offline, `connect` fails with [`TransportError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.status.online.store(online, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.status.attempts.load(Ordering::SeqCst)
    }
}

impl ServerConnection {
    /// Next raw frame sent by the client, `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame that parses as an [`EventMessage`]; other frames are skipped.
    pub async fn recv_message(&mut self) -> Option<EventMessage> {
        while let Some(frame) = self.from_client.recv().await {
            if let Ok(message) = serde_json::from_str(&frame) {
                return Some(message);
            }
        }
        None
    }

    /// Send a frame to the client. Returns false if the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }
}
