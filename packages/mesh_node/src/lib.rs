//! Mesh node: the session controller tying router, transports, and crypto
//! together, plus the pieces a running node needs around it (configuration,
//! device identity, durable seen set, WebSocket relay socket).

pub mod cli;
pub mod config;
pub mod identity;
pub mod seen_store;
pub mod session;
pub mod ws_connector;

pub use session::{Delivery, MeshSession, SessionConfig, Status};
