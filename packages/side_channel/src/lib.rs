//! Out-of-band side channels for exchanging pairing descriptors without a
//! network path: an audible FSK modem and a QR code codec.
//!
//! Hardware (speaker, microphone, camera, barcode decoder) is reached through
//! capability traits. [`acoustic::loopback`] simulates the air between a
//! speaker and a microphone.

pub mod acoustic;
pub mod error;
pub mod qr;

pub use error::{Result, SideChannelError};
