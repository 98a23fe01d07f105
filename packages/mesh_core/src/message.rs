//! Mesh message frame and boundary validation.
//!
//! Wire format (JSON text frame):
//! `{ "id", "ttl", "from", "type", "payload", "timestamp"?, "enc"? }`
//!
//! `payload` is shaped by `type`. When `enc` is true the payload is an
//! `{iv, ciphertext}` envelope whose plaintext is the JSON of the typed payload.

use mesh_crypto::{Envelope, KeyAnnouncement, SharedKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeshError, Result};

/// Frames larger than this are rejected before parsing.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Chat,
    File,
    Pubkey,
    Announce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
}

/// Node introduction, sent with ttl 0 right after a channel opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunkPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub size: u64,
    pub chunk: u32,
    pub total: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Chat(ChatPayload),
    File(FileChunkPayload),
    Pubkey(KeyAnnouncement),
    Announce(AnnouncePayload),
    /// Encrypted body; `kind` is the type of the plaintext payload.
    Sealed { kind: MessageKind, envelope: Envelope },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat(_) => MessageKind::Chat,
            Self::File(_) => MessageKind::File,
            Self::Pubkey(_) => MessageKind::Pubkey,
            Self::Announce(_) => MessageKind::Announce,
            Self::Sealed { kind, .. } => *kind,
        }
    }

    fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Chat(p) => serde_json::to_value(p)?,
            Self::File(p) => serde_json::to_value(p)?,
            Self::Pubkey(p) => serde_json::to_value(p)?,
            Self::Announce(p) => serde_json::to_value(p)?,
            Self::Sealed { envelope, .. } => serde_json::to_value(envelope)?,
        };
        Ok(value)
    }

    fn from_value(kind: MessageKind, value: Value) -> Result<Self> {
        let payload = match kind {
            MessageKind::Chat => Self::Chat(shaped(kind, value)?),
            MessageKind::File => {
                let chunk: FileChunkPayload = shaped(kind, value)?;
                if chunk.total == 0 || chunk.chunk >= chunk.total {
                    return Err(MeshError::Validation(format!(
                        "file chunk {} out of range (total {})",
                        chunk.chunk, chunk.total
                    )));
                }
                Self::File(chunk)
            }
            MessageKind::Pubkey => Self::Pubkey(shaped(kind, value)?),
            MessageKind::Announce => Self::Announce(shaped(kind, value)?),
        };
        Ok(payload)
    }
}

fn shaped<T: serde::de::DeserializeOwned>(kind: MessageKind, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| MeshError::Validation(format!("bad {kind:?} payload: {e}")))
}

/// A routed message. Never mutated in place once routed; forwarding makes a
/// copy with a decremented ttl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub id: String,
    pub ttl: i64,
    pub from: String,
    pub payload: Payload,
    pub timestamp: Option<u64>,
}

impl Message {
    /// Fresh message with a random v4 id. `from` is stamped by the router.
    pub fn new(ttl: i64, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ttl,
            from: String::new(),
            payload,
            timestamp: None,
        }
    }

    pub fn chat(ttl: i64, text: impl Into<String>) -> Self {
        Self::new(ttl, Payload::Chat(ChatPayload { text: text.into() }))
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.payload, Payload::Sealed { .. })
    }

    /// Parse and validate an inbound text frame.
    pub fn parse(frame: &str) -> Result<Self> {
        if frame.len() > MAX_FRAME_BYTES {
            return Err(MeshError::Validation(format!(
                "frame too large: {} bytes (max {MAX_FRAME_BYTES})",
                frame.len()
            )));
        }
        let wire: WireMessage = serde_json::from_str(frame)
            .map_err(|e| MeshError::Validation(e.to_string()))?;
        Self::try_from(wire)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Copy for the next hop: ttl - 1, `from` rewritten to the forwarding node.
    pub fn forwarded(&self, via: &str) -> Self {
        Self {
            ttl: self.ttl - 1,
            from: via.to_string(),
            ..self.clone()
        }
    }

    /// Encrypt the payload. Already-sealed messages are returned unchanged.
    pub fn seal(mut self, key: &SharedKey) -> Result<Self> {
        if self.is_encrypted() {
            return Ok(self);
        }
        let kind = self.kind();
        let plaintext = serde_json::to_vec(&self.payload.to_value()?)?;
        let envelope = key.seal(&plaintext)?;
        self.payload = Payload::Sealed { kind, envelope };
        Ok(self)
    }

    /// Decrypt a sealed payload. Fails closed on a bad tag or wrong key.
    pub fn open(mut self, key: &SharedKey) -> Result<Self> {
        let Payload::Sealed { kind, envelope } = &self.payload else {
            return Ok(self);
        };
        let plaintext = key.open(envelope)?;
        let value: Value = serde_json::from_slice(&plaintext)
            .map_err(|e| MeshError::Validation(format!("sealed payload is not JSON: {e}")))?;
        self.payload = Payload::from_value(*kind, value)?;
        Ok(self)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    id: String,
    ttl: i64,
    from: String,
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    enc: bool,
}

impl TryFrom<WireMessage> for Message {
    type Error = MeshError;

    fn try_from(wire: WireMessage) -> Result<Self> {
        if wire.id.is_empty() {
            return Err(MeshError::Validation("empty id".into()));
        }
        let payload = if wire.enc {
            let envelope: Envelope = serde_json::from_value(wire.payload)
                .map_err(|e| MeshError::Validation(format!("bad envelope: {e}")))?;
            Payload::Sealed {
                kind: wire.kind,
                envelope,
            }
        } else {
            Payload::from_value(wire.kind, wire.payload)?
        };
        Ok(Self {
            id: wire.id,
            ttl: wire.ttl,
            from: wire.from,
            payload,
            timestamp: wire.timestamp,
        })
    }
}

impl From<Message> for WireMessage {
    fn from(msg: Message) -> Self {
        let enc = msg.is_encrypted();
        let kind = msg.kind();
        // Payload variants are all plain serde structs; this cannot fail.
        let payload = msg.payload.to_value().unwrap_or(Value::Null);
        Self {
            id: msg.id,
            ttl: msg.ttl,
            from: msg.from,
            kind,
            payload,
            timestamp: msg.timestamp,
            enc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crypto::KeyPair;

    #[test]
    fn parse_chat_frame() {
        let msg = Message::parse(
            r#"{"id":"x","ttl":2,"from":"A","type":"chat","payload":{"text":"hi"},"timestamp":5}"#,
        )
        .unwrap();
        assert_eq!(msg.id, "x");
        assert_eq!(msg.ttl, 2);
        assert_eq!(msg.kind(), MessageKind::Chat);
        assert_eq!(msg.timestamp, Some(5));
        assert!(!msg.is_encrypted());
    }

    #[test]
    fn missing_fields_rejected() {
        let err = Message::parse(r#"{"ttl":2,"from":"A","type":"chat","payload":{"text":"hi"}}"#)
            .unwrap_err();
        assert!(matches!(err, MeshError::Validation(_)));
        assert!(Message::parse(r#"{"id":"x","ttl":"2","from":"A","type":"chat"}"#).is_err());
        assert!(Message::parse("ping").is_err());
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(Message::parse(r#"{"id":"x","ttl":1,"from":"A","type":"voice","payload":{}}"#).is_err());
    }

    #[test]
    fn wrong_payload_shape_rejected() {
        let err = Message::parse(r#"{"id":"x","ttl":1,"from":"A","type":"chat","payload":{"body":1}}"#)
            .unwrap_err();
        assert!(matches!(err, MeshError::Validation(_)));
    }

    #[test]
    fn file_chunk_index_checked() {
        let frame = r#"{"id":"f","ttl":1,"from":"A","type":"file","payload":{"name":"a.bin","type":"application/octet-stream","size":3,"chunk":2,"total":2,"data":[1,2,3]}}"#;
        assert!(Message::parse(frame).is_err());
    }

    #[test]
    fn oversized_frame_rejected() {
        let big = "x".repeat(MAX_FRAME_BYTES + 1);
        assert!(matches!(Message::parse(&big), Err(MeshError::Validation(_))));
    }

    #[test]
    fn wire_omits_absent_optionals() {
        let mut msg = Message::chat(8, "hello");
        msg.from = "A".into();
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["payload"]["text"], "hello");
        assert!(json.get("timestamp").is_none());
        assert!(json.get("enc").is_none());
    }

    #[test]
    fn forwarded_copy_decrements_ttl() {
        let mut msg = Message::chat(3, "hop");
        msg.from = "A".into();
        let next = msg.forwarded("B");
        assert_eq!(next.ttl, 2);
        assert_eq!(next.from, "B");
        assert_eq!(next.id, msg.id);
        assert_eq!(msg.ttl, 3);
    }

    #[test]
    fn sealed_roundtrip_over_wire() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let ka = SharedKey::derive(&a.agreement, &b.agreement_public()).unwrap();
        let kb = SharedKey::derive(&b.agreement, &a.agreement_public()).unwrap();

        let mut msg = Message::chat(8, "secret");
        msg.from = "A".into();
        let sealed = msg.clone().seal(&ka).unwrap();
        let frame = sealed.to_json().unwrap();
        let json: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["enc"], true);
        assert!(json["payload"]["iv"].is_array());

        let received = Message::parse(&frame).unwrap();
        assert!(received.is_encrypted());
        assert_eq!(received.kind(), MessageKind::Chat);
        assert_eq!(received.open(&kb).unwrap(), msg);
    }

    #[test]
    fn sealed_with_wrong_key_fails() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let c = KeyPair::generate();
        let ka = SharedKey::derive(&a.agreement, &b.agreement_public()).unwrap();
        let kc = SharedKey::derive(&c.agreement, &a.agreement_public()).unwrap();
        let sealed = Message::chat(1, "x").seal(&ka).unwrap();
        assert!(matches!(sealed.open(&kc), Err(MeshError::Crypto(_))));
    }
}
