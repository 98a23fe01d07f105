use mesh_crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Malformed or missing fields, oversized payloads. Rejected at the boundary.
    #[error("invalid message: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("credential mismatch: {0}")]
    CredentialMismatch(String),

    #[error("channel not open")]
    ChannelNotOpen,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("seen store: {0}")]
    Store(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MeshError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport(_) => "transport",
            Self::InvalidDescriptor(_) => "invalid_descriptor",
            Self::CredentialMismatch(_) => "credential_mismatch",
            Self::ChannelNotOpen => "channel_not_open",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "store",
            Self::Crypto(e) => e.error_code(),
            Self::Serialization(_) => "serialization",
        }
    }

    /// Transport and timeout failures can be retried or routed around via the
    /// relay; everything else fails the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ChannelNotOpen | Self::Timeout(_) | Self::Store(_)
        )
    }
}

pub type Result<T, E = MeshError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability() {
        assert!(MeshError::ChannelNotOpen.is_recoverable());
        assert!(MeshError::Timeout("ice".into()).is_recoverable());
        assert!(!MeshError::Validation("ttl".into()).is_recoverable());
        assert!(!MeshError::Crypto(CryptoError::Decrypt).is_recoverable());
        assert!(!MeshError::CredentialMismatch("pre-shared key".into()).is_recoverable());
    }

    #[test]
    fn crypto_code_passes_through() {
        let err = MeshError::from(CryptoError::InvalidSignature);
        assert_eq!(err.error_code(), "invalid_signature");
    }
}
