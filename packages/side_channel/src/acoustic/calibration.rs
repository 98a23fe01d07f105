//! Per-device-pair bit duration calibration.
//!
//! The sender plays [`CALIBRATION_TEXT`] once per candidate duration; the
//! receiver listens at each candidate in the same order and keeps the first
//! duration that decodes the text exactly.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::device::{AudioInput, AudioOutput};
use super::modem::{ListenOptions, listen, play};
use crate::error::{Result, SideChannelError};

pub const CALIBRATION_TEXT: &str = "ping";

/// Candidate bit durations, longest first.
pub const CALIBRATION_STEPS: [Duration; 5] = [
    Duration::from_millis(80),
    Duration::from_millis(50),
    Duration::from_millis(30),
    Duration::from_millis(20),
    Duration::from_millis(10),
];

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_millis(3000);

/// Sender side: one calibration frame per step, each followed by a pause of
/// four bit durations.
pub async fn play_calibration_samples(
    output: &dyn AudioOutput,
    steps: &[Duration],
    cancel: &CancellationToken,
) -> Result<()> {
    for &bit in steps {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SideChannelError::Cancelled),
            r = async {
                play(output, CALIBRATION_TEXT, bit).await?;
                sleep(bit * 4).await;
                Ok::<_, SideChannelError>(())
            } => r?,
        }
    }
    Ok(())
}

/// Receiver side: the first step whose frame decodes to the calibration text.
pub async fn calibrate(
    input: &dyn AudioInput,
    steps: &[Duration],
    step_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Duration> {
    for &bit in steps {
        let options = ListenOptions {
            bit_duration: bit,
            timeout: step_timeout,
            ..Default::default()
        };
        match listen(input, &options, cancel).await {
            Ok(text) if text == CALIBRATION_TEXT => {
                info!(bit_ms = bit.as_millis() as u64, "acoustic calibration matched");
                return Ok(bit);
            }
            Ok(text) => {
                debug!(bit_ms = bit.as_millis() as u64, heard = %text, "calibration mismatch");
            }
            Err(
                e @ (SideChannelError::Cancelled
                | SideChannelError::MicPermissionDenied
                | SideChannelError::Device(_)),
            ) => return Err(e),
            Err(e) => {
                debug!(bit_ms = bit.as_millis() as u64, error = %e, "calibration step failed");
            }
        }
    }
    warn!("no calibration step decoded");
    Err(SideChannelError::CalibrationFailed)
}
