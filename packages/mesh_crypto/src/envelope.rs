//! Authenticated encryption of message payloads under an ECDH-derived key.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::keys::{AgreementPublicKey, AgreementSecret};

pub const IV_LEN: usize = 12;

/// Symmetric key derived from a local agreement secret and a remote agreement
/// public key. Both sides of a pair derive the same key.
#[derive(Clone)]
pub struct SharedKey {
    cipher: Aes256Gcm,
}

impl SharedKey {
    /// AES-256 keyed by the raw ECDH x-coordinate.
    pub fn derive(local: &AgreementSecret, remote: &AgreementPublicKey) -> Result<Self, CryptoError> {
        let shared = local.diffie_hellman(remote);
        let cipher = Aes256Gcm::new_from_slice(shared.raw_secret_bytes().as_slice())
            .map_err(|_| CryptoError::InvalidKey("derived key has wrong length".into()))?;
        Ok(Self { cipher })
    }

    /// Fresh random 96-bit IV per call.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        Ok(Envelope {
            iv: nonce.to_vec(),
            ciphertext,
        })
    }

    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        if envelope.iv.len() != IV_LEN {
            return Err(CryptoError::Decrypt);
        }
        let nonce = Nonce::from_slice(&envelope.iv);
        self.cipher
            .decrypt(nonce, envelope.ciphertext.as_slice())
            .map_err(|_| CryptoError::Decrypt)
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// `{iv, ciphertext}` as carried inside an encrypted message payload.
/// Both fields serialize as JSON byte arrays; the tag is appended to the
/// ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// One-shot form of [`SharedKey::derive`] + [`SharedKey::seal`].
pub fn encrypt_envelope(
    local: &AgreementSecret,
    remote: &AgreementPublicKey,
    plaintext: &[u8],
) -> Result<Envelope, CryptoError> {
    SharedKey::derive(local, remote)?.seal(plaintext)
}

/// One-shot form of [`SharedKey::derive`] + [`SharedKey::open`].
pub fn decrypt_envelope(
    local: &AgreementSecret,
    remote: &AgreementPublicKey,
    envelope: &Envelope,
) -> Result<Vec<u8>, CryptoError> {
    SharedKey::derive(local, remote)?.open(envelope)
}
