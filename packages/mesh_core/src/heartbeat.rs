//! Per-session keepalive: periodic "ping", transparent "pong", RTT, and a
//! liveness timeout at twice the interval.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::transport::Frame;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    Rtt(Duration),
    /// No pong for more than 2x the interval. Emitted once; the loop stops.
    Timeout,
}

/// Sends a control frame on the owning transport.
pub type ControlSender = Arc<dyn Fn(&'static str) -> Result<()> + Send + Sync>;

struct Timing {
    last_ping: Instant,
    last_pong: Instant,
    rtt: Duration,
}

pub struct Heartbeat {
    interval: Duration,
    send: ControlSender,
    timing: Arc<Mutex<Timing>>,
    events: mpsc::UnboundedSender<HeartbeatEvent>,
    cancel: Option<CancellationToken>,
}

impl Heartbeat {
    pub fn new(
        interval: Duration,
        send: ControlSender,
    ) -> (Self, mpsc::UnboundedReceiver<HeartbeatEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let hb = Self {
            interval,
            send,
            timing: Arc::new(Mutex::new(Timing {
                last_ping: now,
                last_pong: now,
                rtt: Duration::ZERO,
            })),
            events,
            cancel: None,
        };
        (hb, rx)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn rtt(&self) -> Duration {
        self.timing.lock().map(|t| t.rtt).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    /// (Re)start the ping loop. Liveness is measured from now.
    pub fn start(&mut self) {
        self.stop();
        if let Ok(mut t) = self.timing.lock() {
            t.last_pong = Instant::now();
        }
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let interval = self.interval;
        let send = self.send.clone();
        let timing = self.timing.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let now = Instant::now();
                let silent_for = match timing.lock() {
                    Ok(mut t) => {
                        t.last_ping = now;
                        now.duration_since(t.last_pong)
                    }
                    Err(_) => break,
                };
                if let Err(e) = send(PING) {
                    debug!(error = %e, "ping not sent");
                }
                if silent_for > interval * 2 {
                    warn!(silent_ms = silent_for.as_millis() as u64, "heartbeat timeout");
                    let _ = events.send(HeartbeatEvent::Timeout);
                    break;
                }
            }
        });
    }

    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    /// Returns true iff `frame` was a control frame consumed here.
    pub fn handle(&self, frame: &Frame) -> bool {
        let Frame::Text(text) = frame else {
            return false;
        };
        match text.as_str() {
            PING => {
                if let Err(e) = (self.send)(PONG) {
                    debug!(error = %e, "pong not sent");
                }
                true
            }
            PONG => {
                let now = Instant::now();
                if let Ok(mut t) = self.timing.lock() {
                    t.last_pong = now;
                    t.rtt = now.duration_since(t.last_ping);
                    let _ = self.events.send(HeartbeatEvent::Rtt(t.rtt));
                }
                true
            }
            _ => false,
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
