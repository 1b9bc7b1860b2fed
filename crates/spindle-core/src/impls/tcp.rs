//! TcpTransport - TCP 上の改行区切り JSON
//!
//! One frame per line. The endpoint's host and port come from the channel url.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use url::Url;

use crate::error::{ConfigError, TransportError};
use crate::ports::{FrameSink, FrameStream, Transport};

/// Longest accepted inbound line, in bytes.
const MAX_FRAME_LENGTH: usize = 1024 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Upper bound on a single connect attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn from_url(url: &Url) -> Result<Self, ConfigError> {
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::MissingHost(url.to_string()))?;
        let port = url.port_or_known_default().unwrap_or(80);
        Ok(Self::new(host, port))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let socket = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer within {}ms", self.connect_timeout.as_millis()),
            )),
        }
        .map_err(|source| TransportError::Connect {
            endpoint: self.endpoint(),
            source,
        })?;
        socket.set_nodelay(true)?;

        let framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        let (sink, stream) = framed.split::<String>();
        let sink = sink.sink_map_err(TransportError::from);
        let stream = stream.map(|frame| frame.map_err(TransportError::from));
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn host_and_port_come_from_the_url() {
        let url = Url::parse("ws://localhost:5000/api/ws").unwrap();
        let transport = TcpTransport::from_url(&url).unwrap();
        assert_eq!(transport.endpoint(), "localhost:5000");

        let url = Url::parse("wss://example.com/api/ws").unwrap();
        assert_eq!(TcpTransport::from_url(&url).unwrap().endpoint(), "example.com:443");
    }

    #[tokio::test]
    async fn frames_are_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            write.write_all(b"{\"pong\":true}\n").await.unwrap();
            first
        });

        let transport = TcpTransport::new("127.0.0.1", port);
        let (mut sink, mut stream) = transport.connect().await.unwrap();
        sink.send("{\"ping\":true}".to_string()).await.unwrap();

        let reply = stream.next().await.unwrap().unwrap();
        assert_eq!(reply, "{\"pong\":true}");
        assert_eq!(server.await.unwrap(), "{\"ping\":true}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpTransport::new("127.0.0.1", port).connect().await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_the_timeout() {
        // a listener that never accepts still completes the handshake, so
        // stall the attempt on an unroutable address instead
        let transport = TcpTransport::new("10.255.255.1", 9)
            .with_connect_timeout(Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        let result = transport.connect().await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert!(started.elapsed() <= Duration::from_secs(1));
    }
}
