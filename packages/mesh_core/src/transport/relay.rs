//! Relay fallback over a WebSocket-like socket.
//!
//! A supervisor task owns the connection: it reconnects with exponential
//! backoff (reset on a successful open, cut short by
//! [`RelayTransport::network_available`]), runs the heartbeat while open,
//! and periodically flushes the outbox that absorbs sends while the socket's
//! buffered byte count is above the configured threshold.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{self, Backoff};
use super::outbox::{self, Outbox};
use super::{Frame, SessionState, TransportEvent, TransportKind, TransportSession};
use crate::error::{MeshError, Result};
use crate::heartbeat::{self, ControlSender, Heartbeat, HeartbeatEvent};

pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1024 * 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Events from an open relay socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(Frame),
    Error(String),
    Closed { reason: String },
}

/// An open socket.
pub trait RelaySocket: Send + Sync {
    fn send(&self, frame: Frame) -> Result<()>;
    /// Bytes accepted by `send` but not yet written to the network.
    fn buffered_amount(&self) -> usize;
    fn close(&self);
}

pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    /// Resolves once the socket is open.
    async fn connect(&self, url: &str) -> Result<(Arc<dyn RelaySocket>, SocketEvents)>;
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub max_buffered_bytes: usize,
    pub outbox_capacity: usize,
    pub flush_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl RelayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_backoff: backoff::DEFAULT_MIN,
            max_backoff: backoff::DEFAULT_MAX,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            outbox_capacity: outbox::DEFAULT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            heartbeat_interval: heartbeat::DEFAULT_INTERVAL,
        }
    }
}

struct Inner {
    config: RelayConfig,
    socket: Mutex<Option<Arc<dyn RelaySocket>>>,
    outbox: Mutex<Outbox>,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    network: Notify,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct RelayTransport {
    inner: Arc<Inner>,
}

impl RelayTransport {
    /// Start connecting in the background.
    pub fn start(
        config: RelayConfig,
        connector: Arc<dyn RelayConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(Inner {
                outbox: Mutex::new(Outbox::new(config.outbox_capacity)),
                config,
                socket: Mutex::new(None),
                state: Mutex::new(SessionState::Idle),
                events,
                network: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        };
        tokio::spawn(supervise(transport.clone(), connector));
        (transport, rx)
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// The network came back: skip the remainder of the current backoff.
    pub fn network_available(&self) {
        debug!("network available, retrying relay now");
        self.inner.network.notify_one();
    }

    pub fn outbox_len(&self) -> usize {
        self.lock_outbox().len()
    }

    fn socket(&self) -> Option<Arc<dyn RelaySocket>> {
        self.inner.socket.lock().ok().and_then(|s| s.clone())
    }

    fn set_socket(&self, socket: Option<Arc<dyn RelaySocket>>) {
        if let Ok(mut s) = self.inner.socket.lock() {
            *s = socket;
        }
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut s) = self.inner.state.lock() {
            *s = state;
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.inner.events.send(event);
    }

    fn report(&self, rtt: Option<Duration>) {
        self.emit(TransportEvent::State {
            kind: TransportKind::Relay,
            connection: "ws".into(),
            channel: self.state(),
            rtt,
        });
    }

    fn lock_outbox(&self) -> std::sync::MutexGuard<'_, Outbox> {
        self.inner
            .outbox
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    fn enqueue(&self, frame: Frame) {
        if let Some(dropped) = self.lock_outbox().push(frame) {
            warn!(bytes = dropped.len(), "relay outbox full, dropped oldest frame");
        }
    }

    /// Send queued frames while the socket has room. Emits `Drain` when the
    /// outbox empties.
    fn flush(&self, socket: &Arc<dyn RelaySocket>) {
        let mut outbox = self.lock_outbox();
        if outbox.is_empty() {
            return;
        }
        while socket.buffered_amount() <= self.inner.config.max_buffered_bytes {
            let Some(frame) = outbox.pop() else { break };
            if let Err(e) = socket.send(frame) {
                warn!(error = %e, "relay flush failed");
                return;
            }
        }
        if outbox.is_empty() {
            drop(outbox);
            debug!("relay outbox drained");
            self.emit(TransportEvent::Drain);
        }
    }
}

impl TransportSession for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn state(&self) -> SessionState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Failed)
    }

    /// Sends directly while the socket has room; otherwise (or while older
    /// frames are still queued) the frame goes to the outbox.
    fn send(&self, frame: Frame) -> Result<()> {
        let socket = self.socket().ok_or(MeshError::ChannelNotOpen)?;
        let congested = socket.buffered_amount() > self.inner.config.max_buffered_bytes;
        if congested || !self.lock_outbox().is_empty() {
            self.enqueue(frame);
            return Ok(());
        }
        socket.send(frame)
    }

    fn close(&self) {
        if self.state() != SessionState::Closed {
            self.set_state(SessionState::Closing);
            self.report(None);
        }
        self.inner.cancel.cancel();
        if let Some(socket) = self.socket() {
            socket.close();
        }
        self.set_socket(None);
        self.set_state(SessionState::Closed);
    }
}

async fn supervise(transport: RelayTransport, connector: Arc<dyn RelayConnector>) {
    let config = transport.inner.config.clone();
    let cancel = transport.inner.cancel.clone();
    let mut backoff = Backoff::new(config.min_backoff, config.max_backoff);
    let mut attempt = 0u32;

    while !cancel.is_cancelled() {
        transport.set_state(if attempt == 0 {
            SessionState::Negotiating
        } else {
            SessionState::Reconnecting
        });
        attempt += 1;

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            res = connector.connect(&config.url) => res,
        };

        match connected {
            Ok((socket, events)) => {
                backoff.reset();
                attempt = 0;
                info!(url = %config.url, "relay open");
                let reason = run_open(&transport, socket, events, &cancel).await;
                if cancel.is_cancelled() {
                    break;
                }
                info!(reason = %reason, "relay closed");
                transport.emit(TransportEvent::Close { reason });
            }
            Err(e) => {
                warn!(url = %config.url, attempt, error = %e, "relay connect failed");
                transport.emit(TransportEvent::Error(e.to_string()));
            }
        }

        transport.set_state(SessionState::Reconnecting);
        transport.report(None);
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "relay reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = transport.inner.network.notified() => {}
        }
    }
    transport.set_state(SessionState::Closed);
}

/// Drive one open socket until it closes. Returns the close reason.
async fn run_open(
    transport: &RelayTransport,
    socket: Arc<dyn RelaySocket>,
    mut events: SocketEvents,
    cancel: &CancellationToken,
) -> String {
    let config = &transport.inner.config;
    let hb_socket = socket.clone();
    let send: ControlSender =
        Arc::new(move |s: &'static str| hb_socket.send(Frame::Text(s.to_string())));
    let (mut hb, mut hb_events) = Heartbeat::new(config.heartbeat_interval, send);

    transport.set_socket(Some(socket.clone()));
    transport.set_state(SessionState::Open);
    hb.start();
    transport.emit(TransportEvent::Open);
    transport.report(None);

    let mut flush = tokio::time::interval(config.flush_interval);
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break "closed".to_string(),
            _ = flush.tick() => transport.flush(&socket),
            ev = events.recv() => match ev {
                Some(SocketEvent::Message(frame)) => {
                    if !hb.handle(&frame) {
                        transport.emit(TransportEvent::Message(frame));
                    }
                }
                Some(SocketEvent::Error(e)) => {
                    warn!(error = %e, "relay socket error");
                    transport.emit(TransportEvent::Error(e));
                }
                Some(SocketEvent::Closed { reason }) => {
                    break if reason.is_empty() { "ws-close".to_string() } else { reason };
                }
                None => break "ws-close".to_string(),
            },
            Some(hb_ev) = hb_events.recv() => match hb_ev {
                HeartbeatEvent::Rtt(rtt) => transport.report(Some(rtt)),
                HeartbeatEvent::Timeout => {
                    socket.close();
                    break "timeout".to_string();
                }
            },
        }
    };

    hb.stop();
    transport.set_socket(None);
    transport.set_state(SessionState::Closed);
    reason
}
