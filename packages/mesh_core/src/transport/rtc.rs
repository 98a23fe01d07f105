//! Direct peer channel negotiated with offer/answer descriptors.
//!
//! The peer-connection stack itself is a capability ([`PeerConnection`],
//! built by a [`PeerConnectionFactory`]); this module owns negotiation,
//! credential checks, the bounded ICE wait, and the heartbeat.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::descriptor::{Credentials, DescriptorKind, SessionDescription};
use super::{Frame, SessionState, TransportEvent, TransportKind, TransportSession};
use crate::error::{MeshError, Result};
use crate::heartbeat::{self, ControlSender, Heartbeat, HeartbeatEvent};

pub const DATA_CHANNEL_LABEL: &str = "svm";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_ICE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events a peer connection reports about itself and its data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Ice(IceState),
    ChannelOpen,
    ChannelClose,
    ChannelError(String),
    ChannelMessage(Frame),
}

/// One peer connection with at most one data channel.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn create_data_channel(&self, label: &str) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    fn local_description(&self) -> Option<SessionDescription>;
    fn remote_description(&self) -> Option<SessionDescription>;
    fn gathering_state(&self) -> watch::Receiver<GatheringState>;
    fn ice_state(&self) -> IceState;
    fn channel_state(&self) -> ChannelState;
    fn send(&self, frame: Frame) -> Result<()>;
    /// Hands out the event stream; `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;
    fn close(&self);
}

pub trait PeerConnectionFactory: Send + Sync + 'static {
    fn create(&self, ice_servers: &[String]) -> Result<Arc<dyn PeerConnection>>;
}

#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// Off by default so pairing never reaches out to a public server.
    pub use_stun: bool,
    pub stun_url: String,
    pub heartbeat_interval: Duration,
    pub ice_timeout: Duration,
    pub credentials: Credentials,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            use_stun: false,
            stun_url: DEFAULT_STUN_URL.to_string(),
            heartbeat_interval: heartbeat::DEFAULT_INTERVAL,
            ice_timeout: DEFAULT_ICE_TIMEOUT,
            credentials: Credentials::default(),
        }
    }
}

impl RtcConfig {
    fn ice_servers(&self) -> Vec<String> {
        if self.use_stun {
            vec![self.stun_url.clone()]
        } else {
            Vec::new()
        }
    }
}

/// The current underlying connection and the token that stops its pump.
struct Live {
    pc: Arc<dyn PeerConnection>,
    cancel: CancellationToken,
}

struct Inner {
    config: RtcConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    live: Mutex<Option<Live>>,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Clone)]
pub struct RtcTransport {
    inner: Arc<Inner>,
}

impl RtcTransport {
    pub fn new(
        config: RtcConfig,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(Inner {
                config,
                factory,
                live: Mutex::new(None),
                state: Mutex::new(SessionState::Idle),
                events,
            }),
        };
        (transport, rx)
    }

    /// Create a data channel and an offer; returns the descriptor JSON once
    /// candidate gathering completes or the ICE timeout elapses.
    pub async fn create_offer(&self) -> Result<String> {
        let (pc, cancel) = self.connection()?;
        self.set_state(SessionState::Negotiating);
        pc.create_data_channel(DATA_CHANNEL_LABEL)?;
        let offer = pc.create_offer().await?;
        pc.set_local_description(offer).await?;
        self.local_descriptor(&pc, &cancel).await
    }

    /// Validate and verify a remote offer, apply it, and return an answer.
    pub async fn accept_offer_and_create_answer(&self, remote_offer: &str) -> Result<String> {
        let remote = self.checked_remote(remote_offer, DescriptorKind::Offer)?;
        let (pc, cancel) = self.connection()?;
        self.set_state(SessionState::Negotiating);
        pc.set_remote_description(remote).await?;
        let answer = pc.create_answer().await?;
        pc.set_local_description(answer).await?;
        self.local_descriptor(&pc, &cancel).await
    }

    /// Validate and verify the remote answer to our offer, then apply it.
    pub async fn accept_answer(&self, remote_answer: &str) -> Result<()> {
        let remote = self.checked_remote(remote_answer, DescriptorKind::Answer)?;
        let pc = self
            .current()
            .ok_or_else(|| MeshError::Transport("no offer in progress".into()))?;
        pc.set_remote_description(remote).await
    }

    /// Remote description applied to the current connection, if any.
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.current().and_then(|pc| pc.remote_description())
    }

    fn checked_remote(&self, json: &str, kind: DescriptorKind) -> Result<SessionDescription> {
        let desc = SessionDescription::parse(json, kind)?;
        self.inner.config.credentials.verify(desc).inspect_err(|e| {
            warn!(error = %e, phase = kind.as_str(), "rejected remote descriptor");
        })
    }

    async fn local_descriptor(
        &self,
        pc: &Arc<dyn PeerConnection>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        wait_ice_complete(pc.as_ref(), self.inner.config.ice_timeout, cancel).await?;
        let mut local = pc
            .local_description()
            .ok_or_else(|| MeshError::Transport("no local description".into()))?;
        self.inner.config.credentials.bind(&mut local);
        local.to_json()
    }

    fn current(&self) -> Option<Arc<dyn PeerConnection>> {
        self.lock_live().as_ref().map(|l| l.pc.clone())
    }

    /// The current connection, or a fresh one if none is live.
    fn connection(&self) -> Result<(Arc<dyn PeerConnection>, CancellationToken)> {
        let mut live = self.lock_live();
        if let Some(l) = live.as_ref() {
            return Ok((l.pc.clone(), l.cancel.clone()));
        }
        let pc = self.inner.factory.create(&self.inner.config.ice_servers())?;
        let cancel = CancellationToken::new();
        let events = pc
            .take_events()
            .ok_or_else(|| MeshError::Transport("peer connection events already taken".into()))?;
        tokio::spawn(pump(self.clone(), pc.clone(), events, cancel.clone()));
        debug!("allocated peer connection");
        *live = Some(Live {
            pc: pc.clone(),
            cancel: cancel.clone(),
        });
        Ok((pc, cancel))
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut s) = self.inner.state.lock() {
            *s = state;
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.inner.events.send(event);
    }

    fn report(&self, pc: &dyn PeerConnection, rtt: Option<Duration>) {
        self.emit(TransportEvent::State {
            kind: TransportKind::Rtc,
            connection: pc.ice_state().as_str().to_string(),
            channel: self.state(),
            rtt,
        });
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, Option<Live>> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tear down the connection if it is still `pc`; a newer one is left alone.
    fn teardown(&self, pc: &Arc<dyn PeerConnection>) {
        let mut live = self.lock_live();
        if live.as_ref().is_some_and(|l| Arc::ptr_eq(&l.pc, pc)) {
            if let Some(l) = live.take() {
                l.cancel.cancel();
                l.pc.close();
            }
        }
    }
}

impl TransportSession for RtcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rtc
    }

    fn state(&self) -> SessionState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Failed)
    }

    fn send(&self, frame: Frame) -> Result<()> {
        let pc = self.current().ok_or(MeshError::ChannelNotOpen)?;
        if self.state() != SessionState::Open || pc.channel_state() != ChannelState::Open {
            return Err(MeshError::ChannelNotOpen);
        }
        pc.send(frame)
    }

    /// Close the channel and connection, reporting `Closing` on the way to
    /// `Closed`. A later offer/accept allocates a fresh connection.
    fn close(&self) {
        let taken = self.lock_live().take();
        if let Some(live) = taken {
            self.set_state(SessionState::Closing);
            self.report(live.pc.as_ref(), None);
            live.cancel.cancel();
            live.pc.close();
            info!("rtc session closed");
        }
        self.set_state(SessionState::Closed);
    }
}

/// Wait for candidate gathering, bounded by `timeout`. On timeout the
/// candidates gathered so far are used as-is.
async fn wait_ice_complete(
    pc: &dyn PeerConnection,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut gathering = pc.gathering_state();
    let complete = async {
        loop {
            if *gathering.borrow_and_update() == GatheringState::Complete {
                return;
            }
            if gathering.changed().await.is_err() {
                return;
            }
        }
    };
    tokio::select! {
        _ = complete => Ok(()),
        _ = tokio::time::sleep(timeout) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "ICE gathering incomplete, using gathered candidates");
            Ok(())
        }
        _ = cancel.cancelled() => Err(MeshError::Transport("negotiation cancelled".into())),
    }
}

/// Drives one peer connection: maps its events to transport events, runs the
/// heartbeat while the channel is open, and closes on liveness timeout.
async fn pump(
    transport: RtcTransport,
    pc: Arc<dyn PeerConnection>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    cancel: CancellationToken,
) {
    let sender = pc.clone();
    let send: ControlSender = Arc::new(move |s: &'static str| sender.send(Frame::Text(s.to_string())));
    let (mut hb, mut hb_events) = Heartbeat::new(transport.inner.config.heartbeat_interval, send);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            ev = events.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    PeerEvent::Ice(state) => {
                        transport.report(pc.as_ref(), Some(hb.rtt()));
                        if matches!(state, IceState::Failed | IceState::Disconnected) {
                            info!(ice = state.as_str(), "ice connection lost");
                            hb.stop();
                            transport.set_state(SessionState::Failed);
                            transport.emit(TransportEvent::Close { reason: state.as_str().to_string() });
                        }
                    }
                    PeerEvent::ChannelOpen => {
                        hb.start();
                        transport.set_state(SessionState::Open);
                        info!("data channel open");
                        transport.emit(TransportEvent::Open);
                    }
                    PeerEvent::ChannelClose => {
                        hb.stop();
                        transport.set_state(SessionState::Closed);
                        transport.emit(TransportEvent::Close { reason: "dc-close".into() });
                    }
                    PeerEvent::ChannelError(e) => {
                        warn!(error = %e, "data channel error");
                        transport.emit(TransportEvent::Error(e));
                    }
                    PeerEvent::ChannelMessage(frame) => {
                        if !hb.handle(&frame) {
                            transport.emit(TransportEvent::Message(frame));
                        }
                    }
                }
            }
            Some(hb_ev) = hb_events.recv() => match hb_ev {
                HeartbeatEvent::Rtt(rtt) => transport.report(pc.as_ref(), Some(rtt)),
                HeartbeatEvent::Timeout => {
                    transport.set_state(SessionState::Failed);
                    transport.emit(TransportEvent::Close { reason: "timeout".into() });
                    transport.teardown(&pc);
                    break;
                }
            },
        }
    }
    hb.stop();
}
