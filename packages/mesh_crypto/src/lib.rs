//! End-to-end envelope crypto for the mesh.
//!
//! - **Agreement**: ECDH P-256, raw shared x-coordinate keys AES-256-GCM.
//! - **Signing**: ECDSA P-256 / SHA-256, independent of the agreement key.
//! - **Announcement**: signed export of the agreement key, verified on receipt.
//! - **Fingerprint**: SHA-256 of the canonical JWK export, grouped hex.

pub mod announce;
mod encoding;
pub mod envelope;
pub mod error;
pub mod keys;

pub use announce::KeyAnnouncement;
pub use envelope::{Envelope, SharedKey, decrypt_envelope, encrypt_envelope};
pub use error::CryptoError;
pub use keys::{
    AgreementPublicKey, AgreementSecret, KEY_PAIR_LEN, KeyPair, Signature, SigningKey,
    VerifyingKey, verify,
};
