//! Transport sessions: a direct peer channel ([`rtc::RtcTransport`]) and a
//! relayed WebSocket fallback ([`relay::RelayTransport`]).
//!
//! Both report lifecycle and inbound data as [`TransportEvent`]s on an mpsc
//! channel handed out at construction, so a consumer sees them in the order
//! the transport produced them.

pub mod backoff;
pub mod descriptor;
pub mod loopback;
pub mod outbox;
pub mod relay;
pub mod rtc;

use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// One transport-level frame. Control frames ("ping"/"pong") are raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// idle → negotiating → open → {closing | failed | reconnecting} → closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Open,
    Closing,
    Failed,
    Reconnecting,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Failed => "failed",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Rtc,
    Relay,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtc => f.write_str("rtc"),
            Self::Relay => f.write_str("ws"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Close { reason: String },
    Error(String),
    Message(Frame),
    State {
        kind: TransportKind,
        /// Connection-level state (ICE state for rtc, "ws" for relay).
        connection: String,
        channel: SessionState,
        rtt: Option<Duration>,
    },
    /// The relay outbox emptied after backpressure.
    Drain,
}

/// Operations common to every transport.
pub trait TransportSession: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn state(&self) -> SessionState;
    /// Fails with `ChannelNotOpen` unless the channel is open.
    fn send(&self, frame: Frame) -> Result<()>;
    fn close(&self);
}
