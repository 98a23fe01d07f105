//! Error types and stable error codes for the crypto layer.

/// Every variant fails closed: callers never receive partial plaintext or a
/// half-trusted key alongside one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl CryptoError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidSignature => "invalid_signature",
            Self::Encrypt => "encrypt_failed",
            Self::Decrypt => "decrypt_failed",
            Self::Encoding(_) => "encoding_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(CryptoError::InvalidSignature.error_code(), "invalid_signature");
        assert_eq!(CryptoError::Decrypt.error_code(), "decrypt_failed");
        assert_eq!(
            CryptoError::InvalidKey("short".into()).error_code(),
            "invalid_key"
        );
    }

    #[test]
    fn decrypt_message_leaks_nothing() {
        assert_eq!(CryptoError::Decrypt.to_string(), "decryption failed");
    }
}
