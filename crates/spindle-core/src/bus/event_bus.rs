//! EventBus - 再接続するチャネル + ローカル配信
//!
//! A supervisor task owns the connection and moves through
//! `Disconnected → Connecting → Connected`, backing off between attempts.
//! `publish` never waits on the network: it hands the encoded frame to the
//! supervisor's writer through a bounded queue, or drops it.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BusEvent, ConnectionState, Subscribe};
use crate::config::EventBusConfig;
use crate::domain::{EventMessage, EventType};
use crate::error::TransportError;
use crate::ports::{Clock, FrameSink, FrameStream, IdGenerator, SessionProvider, Transport};
use crate::queue::RetryPolicy;

/// Handle to the bus. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

struct Shared {
    local: broadcast::Sender<BusEvent>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// What the supervisor needs to (re)open the channel.
struct Connector {
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionProvider>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    reconnect: RetryPolicy,
    outbound_capacity: usize,
}

impl EventBus {
    /// Start a bus connected through `transport`. Must be called inside a
    /// tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionProvider>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        config: &EventBusConfig,
    ) -> Self {
        let bus = Self::with_capacity(config.broadcast_capacity);
        let connector = Connector {
            transport,
            session,
            ids,
            clock,
            reconnect: config.reconnect,
            outbound_capacity: config.outbound_capacity.max(1),
        };
        let handle = tokio::spawn(supervise(Arc::clone(&bus.shared), connector));
        bus.shared.track(handle);
        bus
    }

    /// A bus without a channel: events only reach local subscribers.
    pub fn detached() -> Self {
        Self::with_capacity(EventBusConfig::default().broadcast_capacity)
    }

    fn with_capacity(capacity: usize) -> Self {
        let (local, _rx) = broadcast::channel(capacity.max(1));
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                local,
                outbound: Mutex::new(None),
                state,
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fan the message out locally and, if the channel is up, send it.
    ///
    /// Never fails; a message that cannot be sent is dropped.
    pub fn publish(&self, message: EventMessage) {
        let _ = self.shared.local.send(BusEvent::outbound(message.clone()));

        if self.state() != ConnectionState::Connected {
            debug!(event_id = %message.id, "channel not connected; event dropped");
            return;
        }
        let frame = match serde_json::to_string(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event_id = %message.id, error = %e, "failed to encode event");
                return;
            }
        };
        let sender = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match sender {
            Some(tx) => {
                if let Err(e) = tx.try_send(frame) {
                    debug!(event_id = %message.id, error = %e, "outbound queue unavailable; event dropped");
                }
            }
            None => debug!(event_id = %message.id, "no writer; event dropped"),
        }
    }

    /// Receiver of every event seen by the bus from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.shared.local.subscribe()
    }

    /// Run `subscriber` on its own worker until the bus shuts down.
    pub fn add_subscriber(&self, subscriber: Arc<dyn Subscribe>) {
        let mut rx = self.shared.local.subscribe();
        let cancel = self.shared.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(event) => {
                        let delivery = async { subscriber.on_event(&event).await };
                        if AssertUnwindSafe(delivery).catch_unwind().await.is_err() {
                            warn!(subscriber = subscriber.name(), "subscriber panicked");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(subscriber = subscriber.name(), skipped, "subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.shared.track(handle);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Stop the supervisor and subscriber workers and wait for them.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "event channel state");
        }
    }

    fn attach_outbound(&self, tx: mpsc::Sender<String>) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    fn detach_outbound(&self) {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn dispatch_inbound(&self, frame: &str) {
        match serde_json::from_str::<EventMessage>(frame) {
            Ok(message) => {
                debug!(event_id = %message.id, event_type = ?message.event_type, "inbound event");
                let _ = self.local.send(BusEvent::inbound(message));
            }
            Err(e) => warn!(error = %e, "dropping unparsable inbound frame"),
        }
    }
}

impl Connector {
    fn handshake(&self) -> EventMessage {
        EventMessage::new(
            self.ids.event_id(),
            EventType::SystemStatus,
            json!({ "token": self.session.token() }),
            self.clock.now(),
        )
        .with_user(self.session.current_user_id())
    }
}

async fn supervise(shared: Arc<Shared>, connector: Connector) {
    let endpoint = connector.transport.endpoint();
    let mut failures: u32 = 0;

    while !shared.cancel.is_cancelled() {
        shared.set_state(ConnectionState::Connecting);
        let connected = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = connector.transport.connect() => result,
        };

        match connected {
            Ok((sink, stream)) => {
                info!(%endpoint, "event channel connected");
                failures = 0;
                match run_connection(&shared, &connector, sink, stream).await {
                    Ok(()) => {}
                    Err(e) => warn!(%endpoint, error = %e, "event channel lost"),
                }
            }
            Err(e) => warn!(%endpoint, error = %e, "event channel connect failed"),
        }

        shared.detach_outbound();
        shared.set_state(ConnectionState::Disconnected);
        if shared.cancel.is_cancelled() {
            break;
        }

        let delay = connector.reconnect.delay(failures);
        failures = failures.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, attempt = failures, "reconnecting event channel");
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.detach_outbound();
    shared.set_state(ConnectionState::Disconnected);
    debug!(%endpoint, "event channel supervisor stopped");
}

/// Drive one open connection. Returns `Ok` only when the bus shuts down.
async fn run_connection(
    shared: &Shared,
    connector: &Connector,
    mut sink: FrameSink,
    mut stream: FrameStream,
) -> Result<(), TransportError> {
    let hello = serde_json::to_string(&connector.handshake())?;
    sink.send(hello).await?;

    let (tx, mut rx) = mpsc::channel::<String>(connector.outbound_capacity);
    shared.attach_outbound(tx);
    shared.set_state(ConnectionState::Connected);

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                let _ = sink.close().await;
                return Ok(());
            }
            Some(frame) = rx.recv() => sink.send(frame).await?,
            frame = stream.next() => match frame {
                Some(Ok(text)) => shared.dispatch_inbound(&text),
                Some(Err(e)) => return Err(e),
                None => return Err(TransportError::Closed),
            },
        }
    }
}
