//! P-256 key types: an ECDH pair for key agreement and an independent ECDSA
//! pair for signing, plus standalone verification and fingerprints.

use std::fmt;

use aes_gcm::aead::OsRng;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::elliptic_curve::JwkEcKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::encoding::{base64_decode, base64_encode, grouped_hex};
use crate::error::CryptoError;

/// Number of digest bytes shown in a fingerprint (8 blocks of 4 hex chars).
const FINGERPRINT_BYTES: usize = 16;

/// Length of a serialized [`KeyPair`]: two 32-byte private scalars.
pub const KEY_PAIR_LEN: usize = 64;

// --- AgreementSecret / AgreementPublicKey (ECDH) ---

#[derive(Clone)]
pub struct AgreementSecret(p256::SecretKey);

impl AgreementSecret {
    pub fn generate() -> Self {
        Self(p256::SecretKey::random(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        p256::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey("agreement scalar out of range".into()))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.to_bytes());
        out
    }

    pub fn public_key(&self) -> AgreementPublicKey {
        AgreementPublicKey(self.0.public_key())
    }

    pub(crate) fn diffie_hellman(&self, peer: &AgreementPublicKey) -> p256::ecdh::SharedSecret {
        p256::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), peer.0.as_affine())
    }
}

impl fmt::Debug for AgreementSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementSecret({})", self.public_key().fingerprint())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AgreementPublicKey(p256::PublicKey);

impl AgreementPublicKey {
    pub fn from_jwk(jwk: &JwkEcKey) -> Result<Self, CryptoError> {
        p256::PublicKey::from_jwk(jwk)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey("not a P-256 public key".into()))
    }

    pub fn to_jwk(&self) -> JwkEcKey {
        self.0.to_jwk()
    }

    /// Canonical export: the JWK JSON string. Signatures and fingerprints
    /// are computed over these bytes.
    pub fn canonical_export(&self) -> String {
        self.0.to_jwk_string()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_export(&self.canonical_export())
    }
}

impl fmt::Debug for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementPublicKey({})", self.fingerprint())
    }
}

impl Serialize for AgreementPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_jwk().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AgreementPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let jwk = JwkEcKey::deserialize(deserializer)?;
        Self::from_jwk(&jwk).map_err(serde::de::Error::custom)
    }
}

// --- SigningKey / VerifyingKey (ECDSA) ---

#[derive(Clone)]
pub struct SigningKey(p256::SecretKey);

impl SigningKey {
    pub fn generate() -> Self {
        Self(p256::SecretKey::random(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        p256::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey("signing scalar out of range".into()))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.to_bytes());
        out
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.public_key())
    }

    /// ECDSA P-256 over SHA-256, fixed-width `r || s` encoding.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let key = p256::ecdsa::SigningKey::from(self.0.clone());
        let sig: p256::ecdsa::Signature = key.sign(message);
        let mut out = [0u8; 64];
        out.copy_from_slice(&sig.to_bytes());
        Signature(out)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({})", self.verifying_key().fingerprint())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(p256::PublicKey);

impl VerifyingKey {
    pub fn from_jwk(jwk: &JwkEcKey) -> Result<Self, CryptoError> {
        p256::PublicKey::from_jwk(jwk)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey("not a P-256 public key".into()))
    }

    pub fn to_jwk(&self) -> JwkEcKey {
        self.0.to_jwk()
    }

    pub fn canonical_export(&self) -> String {
        self.0.to_jwk_string()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_export(&self.canonical_export())
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", self.fingerprint())
    }
}

impl Serialize for VerifyingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_jwk().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let jwk = JwkEcKey::deserialize(deserializer)?;
        Self::from_jwk(&jwk).map_err(serde::de::Error::custom)
    }
}

// --- Signature ---

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CryptoError::Encoding(format!("signature must be 64 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        base64_encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = base64_decode(s).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &base64_encode(&self.0[..8]))
    }
}

// --- KeyPair ---

/// One device's keys: generated once, persisted, never mutated.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub agreement: AgreementSecret,
    pub signing: SigningKey,
}

impl KeyPair {
    /// Two independent draws; the agreement and signing keys never share a scalar.
    pub fn generate() -> Self {
        Self {
            agreement: AgreementSecret::generate(),
            signing: SigningKey::generate(),
        }
    }

    pub fn to_bytes(&self) -> [u8; KEY_PAIR_LEN] {
        let mut out = [0u8; KEY_PAIR_LEN];
        out[..32].copy_from_slice(&self.agreement.to_bytes());
        out[32..].copy_from_slice(&self.signing.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; KEY_PAIR_LEN]) -> Result<Self, CryptoError> {
        let mut agreement = [0u8; 32];
        let mut signing = [0u8; 32];
        agreement.copy_from_slice(&bytes[..32]);
        signing.copy_from_slice(&bytes[32..]);
        Ok(Self {
            agreement: AgreementSecret::from_bytes(&agreement)?,
            signing: SigningKey::from_bytes(&signing)?,
        })
    }

    pub fn agreement_public(&self) -> AgreementPublicKey {
        self.agreement.public_key()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }
}

// --- Standalone verify ---

pub fn verify(key: &VerifyingKey, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
    let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(&key.0.to_sec1_bytes())
        .map_err(|_| CryptoError::InvalidKey("unusable verifying key".into()))?;
    let sig = p256::ecdsa::Signature::from_slice(signature.as_bytes())
        .map_err(|_| CryptoError::InvalidSignature)?;
    vk.verify(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// SHA-256 of the canonical export, truncated and shown as grouped hex blocks.
fn fingerprint_export(export: &str) -> String {
    let digest = Sha256::digest(export.as_bytes());
    grouped_hex(&digest[..FINGERPRINT_BYTES], 4)
}
