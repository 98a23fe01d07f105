//! Mesh core: message model, flood router, heartbeat, and transport sessions.
//!
//! Platform capabilities (peer connection, relay socket, seen-set storage) are
//! traits; [`transport::loopback`] and [`seen_store::MemorySeenStore`] provide
//! in-memory implementations.

pub mod error;
pub mod file;
pub mod heartbeat;
pub mod message;
pub mod router;
pub mod seen_store;
pub mod transport;

pub use error::{MeshError, Result};
pub use heartbeat::{Heartbeat, HeartbeatEvent};
pub use message::{Message, MessageKind, Payload};
pub use router::{Disposition, MeshRouter, RouterEvent};
pub use seen_store::{MemorySeenStore, SeenStore};
pub use transport::{Frame, SessionState, TransportEvent, TransportKind, TransportSession};
