//! Pairing descriptors (`{"type":"offer"|"answer","sdp":...}`) and the
//! credential lines that may be appended to them.
//!
//! Credentials travel as extra SDP attribute lines:
//! - `a=psk:<value>`: pre-shared value, compared verbatim.
//! - `a=sig:<base64url>`: ECDSA P-256 signature over the SDP with all
//!   credential lines removed.
//!
//! Incoming descriptors are stripped and verified before anything touches
//! the peer connection.

use mesh_crypto::{Signature, SigningKey, VerifyingKey, verify};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeshError, Result};

const PSK_ATTR: &str = "psk";
const SIG_ATTR: &str = "sig";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    Offer,
    Answer,
}

impl DescriptorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptorKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: DescriptorKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    /// Parse a descriptor and check it is for the expected negotiation phase.
    pub fn parse(json: &str, expected: DescriptorKind) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| MeshError::InvalidDescriptor(format!("not JSON: {e}")))?;
        let Value::Object(obj) = value else {
            return Err(MeshError::InvalidDescriptor("not an object".into()));
        };
        match obj.get("type").and_then(Value::as_str) {
            Some(t) if t == expected.as_str() => {}
            Some(t) => {
                return Err(MeshError::InvalidDescriptor(format!(
                    "expected {}, got {t}",
                    expected.as_str()
                )));
            }
            None => return Err(MeshError::InvalidDescriptor("missing type".into())),
        }
        let Some(sdp) = obj.get("sdp").and_then(Value::as_str) else {
            return Err(MeshError::InvalidDescriptor("missing sdp".into()));
        };
        Ok(Self::new(expected, sdp))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        let prefix = format!("a={name}:");
        self.sdp
            .lines()
            .filter_map(|l| l.trim_end_matches('\r').strip_prefix(prefix.as_str()))
            .last()
    }

    pub fn append_attribute(&mut self, name: &str, value: &str) {
        self.terminate_last_line();
        self.sdp.push_str(&format!("a={name}:{value}\r\n"));
    }

    fn terminate_last_line(&mut self) {
        if !self.sdp.is_empty() && !self.sdp.ends_with('\n') {
            self.sdp.push_str("\r\n");
        }
    }

    /// Remove every `a=<name>:` line, returning the last value seen.
    pub fn take_attribute(&mut self, name: &str) -> Option<String> {
        let prefix = format!("a={name}:");
        let mut found = None;
        let mut kept = String::with_capacity(self.sdp.len());
        for line in self.sdp.split_inclusive('\n') {
            let bare = line.trim_end_matches(['\r', '\n']);
            match bare.strip_prefix(prefix.as_str()) {
                Some(value) => found = Some(value.to_string()),
                None => kept.push_str(line),
            }
        }
        self.sdp = kept;
        found
    }
}

/// Credential binding for descriptors.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub psk: Option<String>,
    /// Signs outgoing descriptors.
    pub signer: Option<SigningKey>,
    /// Required signer of incoming descriptors.
    pub trusted_signer: Option<VerifyingKey>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.psk.is_none() && self.signer.is_none() && self.trusted_signer.is_none()
    }

    /// Append configured credential lines to an outgoing descriptor. The
    /// signature covers the SDP exactly as the receiver sees it once the
    /// credential lines are stripped.
    pub fn bind(&self, desc: &mut SessionDescription) {
        if self.is_empty() {
            return;
        }
        desc.terminate_last_line();
        let sig = self.signer.as_ref().map(|k| k.sign(desc.sdp.as_bytes()));
        if let Some(psk) = &self.psk {
            desc.append_attribute(PSK_ATTR, psk);
        }
        if let Some(sig) = sig {
            desc.append_attribute(SIG_ATTR, &sig.to_base64());
        }
    }

    /// Strip credential lines from an incoming descriptor and verify them.
    /// Returns the descriptor to apply; on error nothing should be applied.
    pub fn verify(&self, mut desc: SessionDescription) -> Result<SessionDescription> {
        let psk = desc.take_attribute(PSK_ATTR);
        let sig = desc.take_attribute(SIG_ATTR);

        if let Some(expected) = &self.psk {
            match psk {
                Some(got) if got == *expected => {}
                Some(_) => {
                    return Err(MeshError::CredentialMismatch(
                        "pre-shared key does not match".into(),
                    ));
                }
                None => {
                    return Err(MeshError::CredentialMismatch("pre-shared key missing".into()));
                }
            }
        }

        if let Some(signer) = &self.trusted_signer {
            let sig = sig
                .ok_or_else(|| MeshError::CredentialMismatch("descriptor signature missing".into()))?;
            let sig = Signature::from_base64(&sig)
                .map_err(|_| MeshError::CredentialMismatch("descriptor signature malformed".into()))?;
            verify(signer, desc.sdp.as_bytes(), &sig).map_err(|_| {
                MeshError::CredentialMismatch("descriptor signature invalid".into())
            })?;
        }

        Ok(desc)
    }
}
