//! In-memory peer connections.
//!
//! Connections created by one [`LoopbackHub`] find each other through an
//! `a=loopback:<id>` line in their SDP: once the offerer applies the answer,
//! both data channels open and frames flow between them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::Frame;
use super::descriptor::{DescriptorKind, SessionDescription};
use super::rtc::{
    ChannelState, GatheringState, IceState, PeerConnection, PeerConnectionFactory, PeerEvent,
};
use crate::error::{MeshError, Result};

const LOOPBACK_ATTR: &str = "loopback";

#[derive(Default)]
struct HubState {
    next_id: u64,
    conns: HashMap<u64, Weak<LoopbackConnection>>,
    created: Vec<Arc<LoopbackConnection>>,
    stall_gathering: bool,
}

/// Factory and rendezvous for loopback connections.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections created from now on never finish candidate gathering.
    pub fn stall_gathering(&self, stall: bool) {
        self.lock().stall_gathering = stall;
    }

    /// Every connection this hub has created, oldest first.
    pub fn connections(&self) -> Vec<Arc<LoopbackConnection>> {
        self.lock().created.clone()
    }

    fn find(&self, id: u64) -> Option<Arc<LoopbackConnection>> {
        self.lock().conns.get(&id).and_then(Weak::upgrade)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl PeerConnectionFactory for LoopbackHub {
    fn create(&self, _ice_servers: &[String]) -> Result<Arc<dyn PeerConnection>> {
        let mut hub = self.lock();
        hub.next_id += 1;
        let id = hub.next_id;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (gathering, _) = watch::channel(GatheringState::New);
        let conn = Arc::new(LoopbackConnection {
            id,
            hub: self.clone(),
            stall_gathering: hub.stall_gathering,
            state: Mutex::new(ConnState::default()),
            gathering,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        });
        hub.conns.insert(id, Arc::downgrade(&conn));
        hub.created.push(conn.clone());
        Ok(conn)
    }
}

struct ConnState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    has_channel: bool,
    channel: ChannelState,
    ice: IceState,
    peer: Option<Weak<LoopbackConnection>>,
    sent: Vec<Frame>,
}

impl Default for ConnState {
    fn default() -> Self {
        Self {
            local: None,
            remote: None,
            has_channel: false,
            channel: ChannelState::Connecting,
            ice: IceState::New,
            peer: None,
            sent: Vec::new(),
        }
    }
}

pub struct LoopbackConnection {
    id: u64,
    hub: LoopbackHub,
    stall_gathering: bool,
    state: Mutex<ConnState>,
    gathering: watch::Sender<GatheringState>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl LoopbackConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Frames this side has sent, in order.
    pub fn sent(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    /// Push an event as if the underlying stack raised it.
    pub fn inject(&self, event: PeerEvent) {
        match &event {
            PeerEvent::Ice(s) => self.lock().ice = *s,
            PeerEvent::ChannelOpen => self.lock().channel = ChannelState::Open,
            PeerEvent::ChannelClose => self.lock().channel = ChannelState::Closed,
            _ => {}
        }
        let _ = self.events_tx.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn describe(&self, kind: DescriptorKind) -> SessionDescription {
        let mut desc = SessionDescription::new(
            kind,
            format!("v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns=-\r\n", self.id),
        );
        desc.append_attribute(LOOPBACK_ATTR, &self.id.to_string());
        desc
    }

    fn open_with(&self, peer: &Arc<LoopbackConnection>) {
        {
            let mut s = self.lock();
            s.peer = Some(Arc::downgrade(peer));
            s.ice = IceState::Connected;
            s.channel = ChannelState::Open;
        }
        let _ = self.events_tx.send(PeerEvent::Ice(IceState::Connected));
        let _ = self.events_tx.send(PeerEvent::ChannelOpen);
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    fn create_data_channel(&self, _label: &str) -> Result<()> {
        self.lock().has_channel = true;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(self.describe(DescriptorKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.lock().remote.is_none() {
            return Err(MeshError::Transport("no remote offer".into()));
        }
        Ok(self.describe(DescriptorKind::Answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.lock().local = Some(desc);
        let next = if self.stall_gathering {
            GatheringState::Gathering
        } else {
            GatheringState::Complete
        };
        self.gathering.send_replace(next);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let peer_id = desc
            .attribute(LOOPBACK_ATTR)
            .and_then(|v| v.parse::<u64>().ok());
        let kind = desc.kind;
        self.lock().remote = Some(desc);

        if kind == DescriptorKind::Answer {
            let peer = peer_id
                .and_then(|id| self.hub.find(id))
                .ok_or_else(|| MeshError::Transport("answer from unknown peer".into()))?;
            let this = self
                .hub
                .find(self.id)
                .ok_or_else(|| MeshError::Transport("connection dropped".into()))?;
            this.open_with(&peer);
            peer.open_with(&this);
        }
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.lock().local.clone()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.lock().remote.clone()
    }

    fn gathering_state(&self) -> watch::Receiver<GatheringState> {
        self.gathering.subscribe()
    }

    fn ice_state(&self) -> IceState {
        self.lock().ice
    }

    fn channel_state(&self) -> ChannelState {
        self.lock().channel
    }

    fn send(&self, frame: Frame) -> Result<()> {
        let peer = {
            let mut s = self.lock();
            if s.channel != ChannelState::Open {
                return Err(MeshError::ChannelNotOpen);
            }
            s.sent.push(frame.clone());
            s.peer.as_ref().and_then(Weak::upgrade)
        };
        if let Some(peer) = peer {
            let _ = peer.events_tx.send(PeerEvent::ChannelMessage(frame));
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    fn close(&self) {
        let peer = {
            let mut s = self.lock();
            if s.channel == ChannelState::Closed && s.ice == IceState::Closed {
                return;
            }
            s.channel = ChannelState::Closed;
            s.ice = IceState::Closed;
            s.peer.take().and_then(|w| w.upgrade())
        };
        if let Some(peer) = peer {
            let was_open = {
                let mut ps = peer.lock();
                ps.peer = None;
                let was_open = ps.channel == ChannelState::Open;
                ps.channel = ChannelState::Closed;
                was_open
            };
            if was_open {
                let _ = peer.events_tx.send(PeerEvent::ChannelClose);
            }
        }
    }
}
