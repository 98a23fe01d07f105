//! Error types for the side channels.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SideChannelError {
    #[error("mic-permission-denied")]
    MicPermissionDenied,

    #[error("device error: {0}")]
    Device(String),

    #[error("timeout")]
    Timeout,

    #[error("aborted")]
    Cancelled,

    #[error("calibration failed")]
    CalibrationFailed,

    /// Both bit tones fell below the detection threshold mid-frame.
    #[error("carrier lost after {bits} bits")]
    CarrierLost { bits: usize },

    #[error("QR too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("encode error: {0}")]
    Encode(String),
}

impl SideChannelError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MicPermissionDenied => "mic_permission_denied",
            Self::Device(_) => "device_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CalibrationFailed => "calibration_failed",
            Self::CarrierLost { .. } => "carrier_lost",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Encode(_) => "encode_error",
        }
    }
}

pub type Result<T, E = SideChannelError> = std::result::Result<T, E>;
