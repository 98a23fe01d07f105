//! Session controller: one router, one direct transport, and an optional relay
//! fallback, with status, log, peers, and rtt published as watchable state.
//!
//! The router sees the remote side as a single non-local peer (the uplink)
//! whose sink is [`MeshSession`]'s raw send path. It is registered under a
//! placeholder until the remote announces itself, then re-keyed to the remote
//! node id so messages that came from it are never echoed back.
//!
//! The local inbox is keyed by this node's own id. Announces carrying that id
//! are refused, so no remote can displace it.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use mesh_core::file::{FileAssembler, ReceivedFile, chunk_file};
use mesh_core::message::{AnnouncePayload, Payload};
use mesh_core::router::DEFAULT_RECENCY_WINDOW;
use mesh_core::transport::loopback::LoopbackHub;
use mesh_core::transport::outbox::{self, Outbox};
use mesh_core::transport::relay::{RelayConfig, RelayConnector, RelayTransport};
use mesh_core::transport::rtc::{PeerConnectionFactory, RtcConfig, RtcTransport};
use mesh_core::{
    Frame, MeshError, MeshRouter, Message, Result, RouterEvent, SeenStore, TransportEvent,
    TransportSession,
};
use mesh_crypto::{KeyAnnouncement, KeyPair, SharedKey};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ws_connector::TungsteniteConnector;

/// Newest-first log entries kept.
pub const LOG_CAPACITY: usize = 200;
/// Frames held while no transport is open. Beyond this the oldest is dropped.
pub const PENDING_CAPACITY: usize = outbox::DEFAULT_CAPACITY;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    CreatingOffer,
    OfferCreated,
    AcceptingOffer,
    AnswerCreated,
    AcceptingAnswer,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::CreatingOffer => "creating-offer",
            Self::OfferCreated => "offer-created",
            Self::AcceptingOffer => "accepting-offer",
            Self::AnswerCreated => "answer-created",
            Self::AcceptingAnswer => "accepting-answer",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Router id. A random UUID when unset.
    pub node_id: Option<String>,
    pub name: String,
    pub default_ttl: i64,
    pub recency_window: Duration,
    pub rtc: RtcConfig,
    /// Relay fallback is only engaged when set.
    pub relay: Option<RelayConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            name: "meshnode".to_string(),
            default_ttl: 8,
            recency_window: DEFAULT_RECENCY_WINDOW,
            rtc: RtcConfig::default(),
            relay: None,
        }
    }
}

/// Something delivered to this node from the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message(Message),
    File(ReceivedFile),
}

/// What we know about the directly connected node.
#[derive(Default)]
struct Link {
    uplink_id: String,
    name: Option<String>,
    key: Option<SharedKey>,
    fingerprint: Option<String>,
    pending: Outbox,
    last_ice: Option<String>,
}

struct Inner {
    config: SessionConfig,
    keys: KeyPair,
    router: MeshRouter,
    rtc: RtcTransport,
    relay_connector: Arc<dyn RelayConnector>,
    relay: Mutex<Option<RelayTransport>>,
    link: Mutex<Link>,
    status: watch::Sender<Status>,
    log: watch::Sender<Vec<String>>,
    peers: watch::Sender<Vec<String>>,
    rtt: watch::Sender<Option<Duration>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    cancel: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.rtc.close();
    }
}

/// Cheap to clone; clones share one session. Background tasks hold only weak
/// references, so dropping the last handle tears the session down.
#[derive(Clone)]
pub struct MeshSession {
    inner: Arc<Inner>,
}

pub struct MeshSessionBuilder {
    config: SessionConfig,
    keys: Option<KeyPair>,
    factory: Option<Arc<dyn PeerConnectionFactory>>,
    relay_connector: Option<Arc<dyn RelayConnector>>,
    seen_store: Option<Arc<dyn SeenStore>>,
}

impl MeshSessionBuilder {
    pub fn keys(mut self, keys: KeyPair) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn relay_connector(mut self, connector: Arc<dyn RelayConnector>) -> Self {
        self.relay_connector = Some(connector);
        self
    }

    pub fn seen_store(mut self, store: Arc<dyn SeenStore>) -> Self {
        self.seen_store = Some(store);
        self
    }

    /// Restores the seen set from the store (if any) before returning.
    pub async fn build(self) -> Result<MeshSession> {
        let node_id = self
            .config
            .node_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut router = MeshRouter::builder(node_id).recency_window(self.config.recency_window);
        if let Some(store) = self.seen_store {
            router = router.store(store);
        }
        let router = router.build();
        let restored = router.restore().await?;

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(LoopbackHub::new()));
        let (rtc, rtc_events) = RtcTransport::new(self.config.rtc.clone(), factory);
        let inbox_rx = router.connect_inbox(router.self_id());
        let uplink = placeholder_uplink(router.self_id());
        let router_events = router.subscribe();

        let (status, _) = watch::channel(Status::Idle);
        let (log, _) = watch::channel(Vec::new());
        let (peers, _) = watch::channel(Vec::new());
        let (rtt, _) = watch::channel(None);
        let (deliveries, inbox) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config: self.config,
            keys: self.keys.unwrap_or_else(KeyPair::generate),
            router,
            rtc,
            relay_connector: self
                .relay_connector
                .unwrap_or_else(|| Arc::new(TungsteniteConnector)),
            relay: Mutex::new(None),
            link: Mutex::new(Link {
                uplink_id: uplink.clone(),
                pending: Outbox::new(PENDING_CAPACITY),
                ..Default::default()
            }),
            status,
            log,
            peers,
            rtt,
            inbox: Mutex::new(Some(inbox)),
            cancel: CancellationToken::new(),
        });

        let session = MeshSession { inner };
        session.connect_uplink(&uplink);

        let weak = Arc::downgrade(&session.inner);
        let cancel = session.inner.cancel.clone();
        tokio::spawn(transport_pump("dc", weak.clone(), rtc_events, cancel.clone()));
        tokio::spawn(inbox_pump(weak.clone(), inbox_rx, deliveries, cancel.clone()));
        tokio::spawn(router_event_pump(weak, router_events, cancel));

        info!(
            node_id = %session.self_id(),
            fingerprint = %session.fingerprint(),
            restored,
            "mesh session ready"
        );
        Ok(session)
    }
}

impl MeshSession {
    pub fn builder(config: SessionConfig) -> MeshSessionBuilder {
        MeshSessionBuilder {
            config,
            keys: None,
            factory: None,
            relay_connector: None,
            seen_store: None,
        }
    }

    pub fn self_id(&self) -> &str {
        self.inner.router.self_id()
    }

    /// Fingerprint of this node's agreement key.
    pub fn fingerprint(&self) -> String {
        self.inner.keys.agreement_public().fingerprint()
    }

    pub fn router(&self) -> &MeshRouter {
        &self.inner.router
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    /// Newest entry first.
    pub fn log(&self) -> watch::Receiver<Vec<String>> {
        self.inner.log.subscribe()
    }

    pub fn peers(&self) -> watch::Receiver<Vec<String>> {
        self.inner.peers.subscribe()
    }

    pub fn rtt(&self) -> watch::Receiver<Option<Duration>> {
        self.inner.rtt.subscribe()
    }

    /// Messages and reassembled files delivered to this node. `None` after the
    /// first call.
    pub fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        self.inner.inbox.lock().ok().and_then(|mut i| i.take())
    }

    /// Frames waiting for any transport to open.
    pub fn pending_len(&self) -> usize {
        self.lock_link().pending.len()
    }

    /// Fingerprint of the remote agreement key, once its announcement verified.
    pub fn peer_fingerprint(&self) -> Option<String> {
        self.lock_link().fingerprint.clone()
    }

    pub fn peer_name(&self) -> Option<String> {
        self.lock_link().name.clone()
    }

    // --- Negotiation ---

    pub async fn create_offer(&self) -> Result<String> {
        self.set_status(Status::CreatingOffer);
        let offer = self.inner.rtc.create_offer().await;
        self.negotiated(offer, Status::OfferCreated, "offer-created")
    }

    pub async fn accept_offer_and_create_answer(&self, remote_offer: &str) -> Result<String> {
        self.set_status(Status::AcceptingOffer);
        let answer = self.inner.rtc.accept_offer_and_create_answer(remote_offer).await;
        self.negotiated(answer, Status::AnswerCreated, "answer-created")
    }

    pub async fn accept_answer(&self, remote_answer: &str) -> Result<()> {
        self.set_status(Status::AcceptingAnswer);
        let res = self.inner.rtc.accept_answer(remote_answer).await;
        self.negotiated(res, Status::Connected, "answer-accepted")
    }

    fn negotiated<T>(&self, res: Result<T>, next: Status, entry: &str) -> Result<T> {
        match res {
            Ok(v) => {
                self.set_status(next);
                self.push_log(entry);
                Ok(v)
            }
            Err(e) => {
                warn!(error = %e, "negotiation failed");
                self.set_status(Status::Error);
                self.push_log(format!("error:{}", e.error_code()));
                Err(e)
            }
        }
    }

    // --- Relay ---

    /// Start the relay fallback. No-op when already running.
    pub fn start_relay(&self) -> Result<()> {
        let config = self
            .inner
            .config
            .relay
            .clone()
            .ok_or_else(|| MeshError::Transport("no relay url configured".into()))?;
        let mut relay = self.lock_relay();
        if relay.is_some() {
            return Ok(());
        }
        info!(url = %config.url, "engaging relay fallback");
        let (transport, events) = RelayTransport::start(config, self.inner.relay_connector.clone());
        *relay = Some(transport);
        tokio::spawn(transport_pump(
            "ws",
            Arc::downgrade(&self.inner),
            events,
            self.inner.cancel.clone(),
        ));
        Ok(())
    }

    pub fn relay_active(&self) -> bool {
        self.lock_relay().is_some()
    }

    // --- Sending ---

    /// Route a chat message; returns its id. With `encrypt`, the payload is
    /// sealed with the peer's key and fails if no verified key is held.
    pub fn send_mesh(&self, text: &str, encrypt: bool) -> Result<String> {
        let mut msg = Message::chat(self.inner.config.default_ttl, text);
        if encrypt {
            let key = self.lock_link().key.clone().ok_or_else(|| {
                MeshError::Validation("encryption requested but no peer key is trusted".into())
            })?;
            msg = msg.seal(&key)?;
        }
        let id = msg.id.clone();
        let disposition = self.inner.router.send(msg);
        debug!(%id, ?disposition, encrypted = encrypt, "sent mesh message");
        Ok(id)
    }

    /// Route a file as fixed-size chunks, reporting `(sent, total)` after each.
    pub fn send_file(
        &self,
        name: &str,
        mime: &str,
        data: &[u8],
        mut progress: impl FnMut(usize, usize),
    ) -> usize {
        let chunks = chunk_file(name, mime, data);
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            self.inner
                .router
                .send(Message::new(self.inner.config.default_ttl, Payload::File(chunk)));
            progress(i + 1, total);
        }
        info!(name, bytes = data.len(), chunks = total, "file sent");
        total
    }

    /// Send one wire frame over the best open transport, or queue it.
    fn send_raw(&self, text: String) -> Result<()> {
        if self.inner.rtc.send(Frame::Text(text.clone())).is_ok() {
            return Ok(());
        }
        if let Some(relay) = self.relay() {
            if relay.send(Frame::Text(text.clone())).is_ok() {
                return Ok(());
            }
        }
        let mut link = self.lock_link();
        if link.pending.push(Frame::Text(text)).is_some() {
            warn!(
                dropped = link.pending.dropped(),
                "pending queue full, dropped oldest frame"
            );
        }
        debug!(pending = link.pending.len(), "no open transport, frame queued");
        Ok(())
    }

    fn flush_pending(&self) {
        let mut pending = std::mem::replace(
            &mut self.lock_link().pending,
            Outbox::new(PENDING_CAPACITY),
        );
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "flushing pending frames");
        while let Some(frame) = pending.pop() {
            if let Frame::Text(text) = frame {
                let _ = self.send_raw(text);
            }
        }
    }

    /// Link-local introduction: never routed, so ttl 0 and sent raw.
    fn send_hello(&self) {
        let announce = Payload::Announce(AnnouncePayload {
            name: self.inner.config.name.clone(),
            fingerprint: Some(self.fingerprint()),
        });
        let pubkey = Payload::Pubkey(KeyAnnouncement::create(&self.inner.keys));
        for payload in [announce, pubkey] {
            let mut msg = Message::new(0, payload);
            msg.from = self.self_id().to_string();
            msg.timestamp = Some(chrono::Utc::now().timestamp_millis().max(0) as u64);
            match msg.to_json() {
                Ok(json) => {
                    let _ = self.send_raw(json);
                }
                Err(e) => warn!(error = %e, "failed to encode hello"),
            }
        }
    }

    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.rtc.close();
        if let Some(relay) = self.lock_relay().take() {
            relay.close();
        }
        self.set_status(Status::Idle);
        self.push_log("closed");
    }

    // --- Transport events ---

    fn on_transport_event(&self, tag: &str, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                self.push_log(format!("{tag}-open"));
                if tag == "dc" {
                    self.set_status(Status::Connected);
                }
                self.flush_pending();
                self.send_hello();
            }
            TransportEvent::Close { reason } => {
                self.push_log(format!("{tag}-close:{reason}"));
                if tag == "dc" {
                    self.set_status(Status::Reconnecting);
                    if self.inner.config.relay.is_some() {
                        if let Err(e) = self.start_relay() {
                            warn!(error = %e, "relay fallback failed to start");
                        }
                    }
                }
            }
            TransportEvent::Error(e) => self.push_log(format!("{tag}-error:{e}")),
            TransportEvent::Message(Frame::Text(text)) => self.on_frame(&text),
            TransportEvent::Message(Frame::Binary(bytes)) => {
                debug!(len = bytes.len(), via = tag, "ignoring binary frame");
            }
            TransportEvent::State {
                connection, rtt, ..
            } => {
                if tag == "dc" {
                    let changed = {
                        let mut link = self.lock_link();
                        let changed = link.last_ice.as_deref() != Some(connection.as_str());
                        link.last_ice = Some(connection.clone());
                        changed
                    };
                    if changed {
                        self.push_log(format!("ice:{connection}"));
                    }
                }
                if let Some(rtt) = rtt {
                    self.inner.rtt.send_replace(Some(rtt));
                }
            }
            TransportEvent::Drain => debug!(via = tag, "transport drained"),
        }
    }

    fn on_frame(&self, text: &str) {
        let msg = match Message::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "dropping invalid frame");
                self.push_log("rx:invalid-msg");
                return;
            }
        };
        match &msg.payload {
            Payload::Announce(announce) => self.on_announce(&msg.from, announce),
            Payload::Pubkey(announcement) => self.on_pubkey(announcement),
            _ => {
                self.inner.router.ingress(msg);
            }
        }
    }

    fn on_announce(&self, from: &str, announce: &AnnouncePayload) {
        if from.is_empty() || from == self.self_id() {
            return;
        }
        self.lock_link().name = Some(announce.name.clone());
        self.connect_uplink(from);
        self.inner.peers.send_replace(vec![from.to_string()]);
        self.push_log(format!("peer:{}", announce.name));
        info!(peer_id = %from, name = %announce.name, "peer announced");
    }

    fn on_pubkey(&self, announcement: &KeyAnnouncement) {
        let derived = announcement
            .verify()
            .and_then(|remote| SharedKey::derive(&self.inner.keys.agreement, &remote));
        match derived {
            Ok(key) => {
                let fingerprint = announcement.fingerprint();
                {
                    let mut link = self.lock_link();
                    link.key = Some(key);
                    link.fingerprint = Some(fingerprint.clone());
                }
                info!(%fingerprint, "peer key trusted");
                self.push_log(format!("key:{fingerprint}"));
            }
            Err(e) => {
                warn!(error = %e, "rejected peer key announcement");
                self.push_log("rx:bad-key");
            }
        }
    }

    /// Register (or re-key) the router's single non-local peer.
    fn connect_uplink(&self, id: &str) {
        let previous = {
            let mut link = self.lock_link();
            std::mem::replace(&mut link.uplink_id, id.to_string())
        };
        if previous != id {
            self.inner.router.disconnect_peer(&previous);
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.router.connect_peer(
            id,
            move |msg: Message| -> Result<()> {
                let inner = weak
                    .upgrade()
                    .ok_or_else(|| MeshError::Transport("session closed".into()))?;
                MeshSession { inner }.send_raw(msg.to_json()?)
            },
            false,
        );
    }

    // --- Observable state ---

    fn set_status(&self, status: Status) {
        let previous = self.inner.status.send_replace(status);
        if previous != status {
            info!(%status, "session status");
        }
    }

    fn push_log(&self, entry: impl Into<String>) {
        let entry = entry.into();
        debug!(%entry, "session log");
        self.inner.log.send_modify(|log| push_newest_first(log, entry));
    }

    fn relay(&self) -> Option<RelayTransport> {
        self.lock_relay().clone()
    }

    fn lock_relay(&self) -> std::sync::MutexGuard<'_, Option<RelayTransport>> {
        self.inner
            .relay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Link> {
        self.inner
            .link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Never equal to `self_id`, so it cannot collide with the inbox.
fn placeholder_uplink(self_id: &str) -> String {
    format!("{self_id}/uplink")
}

fn push_newest_first(log: &mut Vec<String>, entry: String) {
    log.insert(0, entry);
    log.truncate(LOG_CAPACITY);
}

fn upgrade(weak: &Weak<Inner>) -> Option<MeshSession> {
    weak.upgrade().map(|inner| MeshSession { inner })
}

async fn transport_pump(
    tag: &'static str,
    weak: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            ev = events.recv() => {
                let Some(ev) = ev else { break };
                let Some(session) = upgrade(&weak) else { break };
                session.on_transport_event(tag, ev);
            }
        }
    }
    debug!(via = tag, "transport pump stopped");
}

/// Opens sealed messages and reassembles files before handing them out.
/// Messages this node originated are not delivered back to it.
async fn inbox_pump(
    weak: Weak<Inner>,
    mut routed: mpsc::UnboundedReceiver<Message>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    cancel: CancellationToken,
) {
    let mut assembler = FileAssembler::new();
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = routed.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let Some(session) = upgrade(&weak) else { break };
        if msg.from == session.self_id() {
            continue;
        }

        let msg = if msg.is_encrypted() {
            let key = session.lock_link().key.clone();
            match key.map(|k| msg.open(&k)) {
                Some(Ok(opened)) => opened,
                Some(Err(e)) => {
                    warn!(error = %e, "failed to open sealed message");
                    session.push_log("rx:decrypt-failed");
                    continue;
                }
                None => {
                    session.push_log("rx:decrypt-failed");
                    continue;
                }
            }
        } else {
            msg
        };

        let delivery = match msg.payload {
            Payload::File(chunk) => match assembler.accept(&msg.from, chunk) {
                Ok(Some(file)) => {
                    session.push_log(format!("rx:file:{}", file.name));
                    Delivery::File(file)
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, from = %msg.from, "dropping file chunk");
                    session.push_log("rx:bad-chunk");
                    continue;
                }
            },
            _ => Delivery::Message(msg),
        };
        if deliveries.send(delivery).is_err() {
            debug!("inbox receiver dropped");
        }
    }
}

async fn router_event_pump(
    weak: Weak<Inner>,
    mut events: broadcast::Receiver<RouterEvent>,
    cancel: CancellationToken,
) {
    loop {
        let ev = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = events.recv() => ev,
        };
        match ev {
            Ok(RouterEvent::DeliveryFailed { peer_id, .. }) => {
                let Some(session) = upgrade(&weak) else { break };
                session.push_log(format!("tx:failed:{peer_id}"));
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "router events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_is_kebab_case() {
        assert_eq!(Status::CreatingOffer.to_string(), "creating-offer");
        assert_eq!(Status::AnswerCreated.to_string(), "answer-created");
        assert_eq!(Status::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn log_is_newest_first_and_capped() {
        let mut log = Vec::new();
        for i in 0..(LOG_CAPACITY + 5) {
            push_newest_first(&mut log, i.to_string());
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(log[0], (LOG_CAPACITY + 4).to_string());
        assert_eq!(log.last().unwrap(), "5");
    }

    #[tokio::test]
    async fn encrypt_without_peer_key_fails() {
        let session = MeshSession::builder(SessionConfig::default())
            .build()
            .await
            .unwrap();
        let err = session.send_mesh("secret", true).unwrap_err();
        assert!(matches!(err, MeshError::Validation(_)));
    }

    #[tokio::test]
    async fn sends_before_any_transport_are_queued() {
        let session = MeshSession::builder(SessionConfig::default())
            .build()
            .await
            .unwrap();
        session.send_mesh("early", false).unwrap();
        for _ in 0..50 {
            if session.pending_len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(session.pending_len(), 1);
    }

    #[tokio::test]
    async fn pending_queue_drops_oldest_beyond_capacity() {
        let session = MeshSession::builder(SessionConfig::default())
            .build()
            .await
            .unwrap();
        for i in 0..PENDING_CAPACITY + 3 {
            session.send_raw(i.to_string()).unwrap();
        }
        assert_eq!(session.pending_len(), PENDING_CAPACITY);
        let mut link = session.lock_link();
        assert_eq!(link.pending.dropped(), 3);
        assert_eq!(link.pending.pop(), Some(Frame::Text("3".into())));
    }

    #[tokio::test]
    async fn relay_requires_url() {
        let session = MeshSession::builder(SessionConfig::default())
            .build()
            .await
            .unwrap();
        assert!(session.start_relay().is_err());
        assert!(!session.relay_active());
    }

    #[tokio::test]
    async fn restores_seen_ids_from_store() {
        let store = Arc::new(mesh_core::MemorySeenStore::with_entries(
            [("old".to_string(), chrono::Utc::now().timestamp_millis() as u64)].into(),
        ));
        let session = MeshSession::builder(SessionConfig::default())
            .seen_store(store)
            .build()
            .await
            .unwrap();
        assert!(session.router().has_seen("old"));
    }
}
