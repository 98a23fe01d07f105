//! Signed public-key announcement exchanged once a channel opens.
//!
//! The ECDH public key is exported canonically, signed with the ECDSA key,
//! and sent together with the ECDSA public key. The receiver checks the
//! signature against the embedded signing key before trusting the ECDH key.
//! There is no certificate chain: trust is on first use, confirmed by
//! comparing fingerprints out of band.

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::keys::{AgreementPublicKey, KeyPair, Signature, VerifyingKey, verify};

/// Wire shape: `{key: JWK, sig: byte[], sigKey: JWK}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAnnouncement {
    pub key: AgreementPublicKey,
    pub sig: Vec<u8>,
    #[serde(rename = "sigKey")]
    pub sig_key: VerifyingKey,
}

impl KeyAnnouncement {
    pub fn create(keys: &KeyPair) -> Self {
        let key = keys.agreement_public();
        let sig = keys.signing.sign(key.canonical_export().as_bytes());
        Self {
            key,
            sig: sig.as_bytes().to_vec(),
            sig_key: keys.verifying_key(),
        }
    }

    /// Returns the announced agreement key only if the signature checks out.
    pub fn verify(&self) -> Result<AgreementPublicKey, CryptoError> {
        let sig = Signature::from_slice(&self.sig).map_err(|_| CryptoError::InvalidSignature)?;
        verify(&self.sig_key, self.key.canonical_export().as_bytes(), &sig)?;
        Ok(self.key.clone())
    }

    pub fn fingerprint(&self) -> String {
        self.key.fingerprint()
    }
}
