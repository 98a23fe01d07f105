//! TTL-bounded, deduplicating flood router.
//!
//! Every connected peer owns an unbounded queue drained by its own task, so
//! deliveries to one peer keep their order while a slow or failing peer never
//! blocks its siblings.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::{MeshError, Result};
use crate::message::Message;
use crate::seen_store::SeenStore;

/// Default recency window for seen ids. Unrelated to per-message ttl.
pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Receives messages routed to one peer. Returning an error (or panicking)
/// is reported as a [`RouterEvent::DeliveryFailed`]; other peers are unaffected.
pub trait PeerSink: Send + Sync + 'static {
    fn deliver(&self, msg: Message) -> Result<()>;
}

impl<F> PeerSink for F
where
    F: Fn(Message) -> Result<()> + Send + Sync + 'static,
{
    fn deliver(&self, msg: Message) -> Result<()> {
        self(msg)
    }
}

#[derive(Debug, Clone)]
pub enum RouterEvent {
    DeliveryFailed {
        peer_id: String,
        message: Message,
        error: String,
    },
}

/// What `ingress`/`send` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// ttl was negative.
    Expired,
    /// id already in the seen set.
    Duplicate,
    /// Marked seen and queued for `fanout` peers.
    Routed { fanout: usize },
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn wall_clock_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

struct PeerEntry {
    local: bool,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct State {
    peers: HashMap<String, PeerEntry>,
    seen: HashMap<String, u64>,
}

struct Inner {
    self_id: String,
    recency_window_ms: u64,
    state: Mutex<State>,
    store: Option<Arc<dyn SeenStore>>,
    events: broadcast::Sender<RouterEvent>,
    clock: Clock,
}

/// One router per node. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MeshRouter {
    inner: Arc<Inner>,
}

impl MeshRouter {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self::builder(self_id).build()
    }

    pub fn builder(self_id: impl Into<String>) -> MeshRouterBuilder {
        MeshRouterBuilder {
            self_id: self_id.into(),
            recency_window: DEFAULT_RECENCY_WINDOW,
            store: None,
            clock: None,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.inner.self_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.inner.events.subscribe()
    }

    /// Load persisted seen ids, skipping any already outside the window.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let entries = store.load().await?;
        let now = (self.inner.clock)();
        let mut state = self.lock();
        let mut restored = 0;
        for (id, ts) in entries {
            if now.saturating_sub(ts) <= self.inner.recency_window_ms {
                state.seen.entry(id).or_insert(ts);
                restored += 1;
            }
        }
        debug!(restored, "restored seen set");
        Ok(restored)
    }

    /// Register a peer's send capability. Replaces any previous entry for `id`.
    /// Must be called from within a tokio runtime.
    pub fn connect_peer(&self, id: impl Into<String>, sink: impl PeerSink, local: bool) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_peer(
            id.clone(),
            Arc::new(sink),
            rx,
            self.inner.events.clone(),
        ));
        debug!(peer_id = %id, local, "peer connected");
        self.lock().peers.insert(id, PeerEntry { local, tx });
    }

    /// Register a local sink and return the receiving end of its inbox.
    pub fn connect_inbox(&self, id: impl Into<String>) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connect_peer(
            id,
            move |msg: Message| tx.send(msg).map_err(|_| MeshError::Transport("inbox closed".into())),
            true,
        );
        rx
    }

    /// Already-queued deliveries to the peer still drain.
    pub fn disconnect_peer(&self, id: &str) {
        if self.lock().peers.remove(id).is_some() {
            debug!(peer_id = %id, "peer disconnected");
        }
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.lock().peers.keys().cloned().collect()
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.lock().seen.contains_key(id)
    }

    /// Originate a message: stamps `from` with this node's id and a timestamp
    /// when absent.
    pub fn send(&self, mut msg: Message) -> Disposition {
        msg.from = self.inner.self_id.clone();
        if msg.timestamp.is_none() {
            msg.timestamp = Some((self.inner.clock)());
        }
        self.deliver(msg)
    }

    /// Entry point for validated frames arriving from a transport.
    pub fn ingress(&self, msg: Message) -> Disposition {
        self.deliver(msg)
    }

    fn deliver(&self, msg: Message) -> Disposition {
        let now = (self.inner.clock)();
        let window = self.inner.recency_window_ms;
        let mut state = self.lock();

        let before = state.seen.len();
        state.seen.retain(|_, ts| now.saturating_sub(*ts) <= window);
        if state.seen.len() < before {
            self.spawn_store_prune(now.saturating_sub(window));
        }

        if msg.ttl < 0 {
            debug!(id = %msg.id, ttl = msg.ttl, "dropping expired message");
            return Disposition::Expired;
        }
        if state.seen.contains_key(&msg.id) {
            debug!(id = %msg.id, "dropping duplicate message");
            return Disposition::Duplicate;
        }
        state.seen.insert(msg.id.clone(), now);
        self.spawn_store_save(msg.id.clone(), now);

        let mut fanout = 0;
        for (peer_id, peer) in &state.peers {
            if *peer_id == msg.from {
                continue;
            }
            let out = if peer.local {
                msg.clone()
            } else if msg.ttl <= 0 {
                continue;
            } else {
                msg.forwarded(&self.inner.self_id)
            };
            if peer.tx.send(out).is_ok() {
                fanout += 1;
            }
        }
        Disposition::Routed { fanout }
    }

    fn spawn_store_save(&self, id: String, ts: u64) {
        if let Some(store) = self.inner.store.clone() {
            tokio::spawn(async move {
                if let Err(e) = store.save(&id, ts).await {
                    warn!(id = %id, error = %e, "failed to persist seen id");
                }
            });
        }
    }

    fn spawn_store_prune(&self, expire_before: u64) {
        if let Some(store) = self.inner.store.clone() {
            tokio::spawn(async move {
                if let Err(e) = store.prune(expire_before).await {
                    warn!(error = %e, "failed to prune seen store");
                }
            });
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // State stays consistent across a panic elsewhere: every mutation is a
        // single map operation.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MeshRouterBuilder {
    self_id: String,
    recency_window: Duration,
    store: Option<Arc<dyn SeenStore>>,
    clock: Option<Clock>,
}

impl MeshRouterBuilder {
    pub fn recency_window(mut self, window: Duration) -> Self {
        self.recency_window = window;
        self
    }

    pub fn store(mut self, store: Arc<dyn SeenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Millisecond clock used for seen timestamps. Defaults to wall time.
    pub fn clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> MeshRouter {
        let (events, _) = broadcast::channel(256);
        MeshRouter {
            inner: Arc::new(Inner {
                self_id: self.self_id,
                recency_window_ms: self.recency_window.as_millis() as u64,
                state: Mutex::new(State::default()),
                store: self.store,
                events,
                clock: self.clock.unwrap_or_else(|| Arc::new(wall_clock_ms)),
            }),
        }
    }
}

async fn run_peer(
    peer_id: String,
    sink: Arc<dyn PeerSink>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    events: broadcast::Sender<RouterEvent>,
) {
    while let Some(msg) = rx.recv().await {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(msg.clone())));
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };
        warn!(peer_id = %peer_id, id = %msg.id, error = %error, "peer handler failed");
        let _ = events.send(RouterEvent::DeliveryFailed {
            peer_id: peer_id.clone(),
            message: msg,
            error,
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::seen_store::MemorySeenStore;

    fn chat(id: &str, ttl: i64) -> Message {
        let mut m = Message::chat(ttl, "hi");
        m.id = id.to_string();
        m
    }

    #[tokio::test]
    async fn duplicate_id_delivered_once() {
        let router = MeshRouter::new("A");
        let mut inbox = router.connect_inbox("INBOX");

        let mut m = chat("dup", 1);
        m.from = "B".into();
        assert_eq!(router.ingress(m.clone()), Disposition::Routed { fanout: 1 });
        assert_eq!(router.ingress(m), Disposition::Duplicate);

        assert_eq!(inbox.recv().await.unwrap().id, "dup");
        tokio::task::yield_now().await;
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn negative_ttl_goes_nowhere() {
        let router = MeshRouter::new("A");
        let mut inbox = router.connect_inbox("INBOX");
        let mut m = chat("neg", -1);
        m.from = "B".into();
        assert_eq!(router.ingress(m), Disposition::Expired);
        assert!(!router.has_seen("neg"));
        tokio::task::yield_now().await;
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn local_sink_ignores_zero_ttl_but_relays_do_not() {
        let router = MeshRouter::new("A");
        let mut inbox = router.connect_inbox("INBOX");
        let (tx, mut relay_rx) = mpsc::unbounded_channel();
        router.connect_peer(
            "B",
            move |m: Message| tx.send(m).map_err(|_| MeshError::ChannelNotOpen),
            false,
        );

        let mut m = chat("zero", 0);
        m.from = "C".into();
        assert_eq!(router.ingress(m), Disposition::Routed { fanout: 1 });
        assert_eq!(inbox.recv().await.unwrap().ttl, 0);
        tokio::task::yield_now().await;
        assert!(relay_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn relayed_copy_has_lower_ttl_and_own_from() {
        let router = MeshRouter::new("B");
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.connect_peer(
            "C",
            move |m: Message| tx.send(m).map_err(|_| MeshError::ChannelNotOpen),
            false,
        );
        let mut m = chat("fwd", 3);
        m.from = "A".into();
        router.ingress(m);
        let out = rx.recv().await.unwrap();
        assert_eq!(out.ttl, 2);
        assert_eq!(out.from, "B");
    }

    #[tokio::test]
    async fn no_echo_to_sender() {
        let router = MeshRouter::new("B");
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.connect_peer(
            "A",
            move |m: Message| tx.send(m).map_err(|_| MeshError::ChannelNotOpen),
            false,
        );
        let mut m = chat("echo", 5);
        m.from = "A".into();
        assert_eq!(router.ingress(m), Disposition::Routed { fanout: 0 });
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_stamps_from_and_timestamp() {
        let router = MeshRouter::builder("A").clock(|| 42).build();
        let mut inbox = router.connect_inbox("INBOX");
        router.send(chat("s", 1));
        let got = inbox.recv().await.unwrap();
        assert_eq!(got.from, "A");
        assert_eq!(got.timestamp, Some(42));
    }

    #[tokio::test]
    async fn seen_id_expires_after_window() {
        let now = Arc::new(AtomicU64::new(1_000));
        let clock = now.clone();
        let router = MeshRouter::builder("A")
            .recency_window(Duration::from_secs(300))
            .clock(move || clock.load(Ordering::SeqCst))
            .build();
        let _inbox = router.connect_inbox("INBOX");

        let mut m = chat("again", 1);
        m.from = "B".into();
        assert!(matches!(router.ingress(m.clone()), Disposition::Routed { .. }));

        now.store(1_000 + 300_000, Ordering::SeqCst);
        assert_eq!(router.ingress(m.clone()), Disposition::Duplicate);

        now.store(1_000 + 300_001, Ordering::SeqCst);
        assert!(matches!(router.ingress(m), Disposition::Routed { .. }));
    }

    #[tokio::test]
    async fn seen_ids_persist_and_restore() {
        let store = Arc::new(MemorySeenStore::new());
        let router = MeshRouter::builder("A").store(store.clone()).clock(|| 5_000).build();
        let mut m = chat("persisted", 1);
        m.from = "B".into();
        router.ingress(m.clone());

        // Let the fire-and-forget save run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.len(), 1);

        let fresh = MeshRouter::builder("A").store(store).clock(|| 6_000).build();
        assert_eq!(fresh.restore().await.unwrap(), 1);
        assert_eq!(fresh.ingress(m), Disposition::Duplicate);
    }

    #[tokio::test]
    async fn restore_skips_stale_entries() {
        let store = Arc::new(MemorySeenStore::with_entries(HashMap::from([
            ("old".to_string(), 0u64),
            ("new".to_string(), 400_000u64),
        ])));
        let router = MeshRouter::builder("A")
            .store(store)
            .clock(|| 500_000)
            .build();
        assert_eq!(router.restore().await.unwrap(), 1);
        assert!(router.has_seen("new"));
        assert!(!router.has_seen("old"));
    }

    #[tokio::test]
    async fn panicking_handler_reported() {
        let router = MeshRouter::new("A");
        let mut events = router.subscribe();
        router.connect_peer("B", |_m: Message| -> Result<()> { panic!("boom") }, false);
        let mut inbox = router.connect_inbox("INBOX");

        router.send(chat("p", 1));
        let RouterEvent::DeliveryFailed { peer_id, error, .. } = events.recv().await.unwrap();
        assert_eq!(peer_id, "B");
        assert!(error.contains("boom"));
        assert_eq!(inbox.recv().await.unwrap().id, "p");
    }
}
