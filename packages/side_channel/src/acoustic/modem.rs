use std::time::Duration;

use tokio::time::{Instant, interval_at, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::device::{AudioInput, AudioOutput, Capture};
use super::framing::{bits_to_text, tone_schedule};
use super::{
    DEFAULT_BIT_DURATION, DEFAULT_FFT_SIZE, DEFAULT_LISTEN_TIMEOUT, DEFAULT_THRESHOLD_DB, FREQ_END,
    FREQ_ONE, FREQ_START, FREQ_ZERO, GAIN,
};
use crate::error::{Result, SideChannelError};

/// Upper bound on the start-tone polling period.
const MAX_POLL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub bit_duration: Duration,
    /// How long to wait for a start tone.
    pub timeout: Duration,
    pub threshold_db: f32,
    pub fft_size: usize,
    /// Frames longer than this are abandoned.
    pub max_bytes: usize,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            bit_duration: DEFAULT_BIT_DURATION,
            timeout: DEFAULT_LISTEN_TIMEOUT,
            threshold_db: DEFAULT_THRESHOLD_DB,
            fft_size: DEFAULT_FFT_SIZE,
            max_bytes: 4096,
        }
    }
}

/// Transmit `text` as one frame.
pub async fn play(output: &dyn AudioOutput, text: &str, bit: Duration) -> Result<()> {
    let tones = tone_schedule(text, bit);
    debug!(
        bytes = text.len(),
        bit_ms = bit.as_millis() as u64,
        "playing acoustic frame"
    );
    output.play(&tones, GAIN).await
}

/// Receive one frame.
///
/// Fails with `Timeout` when no start tone shows up in time and with
/// `Cancelled` when `cancel` fires. The microphone is released before this
/// returns, whichever way it ends.
pub async fn listen(
    input: &dyn AudioInput,
    options: &ListenOptions,
    cancel: &CancellationToken,
) -> Result<String> {
    if cancel.is_cancelled() {
        return Err(SideChannelError::Cancelled);
    }
    let mut capture = Capture::new(input.open(options.fft_size).await?);

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SideChannelError::Cancelled),
        r = receive(&mut capture, options) => r,
    };
    capture.release();
    result
}

async fn receive(capture: &mut Capture, options: &ListenOptions) -> Result<String> {
    let bit = options.bit_duration;
    let poll = (bit / 4).clamp(Duration::from_millis(1), MAX_POLL);

    timeout(options.timeout, async {
        loop {
            capture.refresh();
            if tone_present(capture, FREQ_START, options.threshold_db) {
                return;
            }
            sleep(poll).await;
        }
    })
    .await
    .map_err(|_| SideChannelError::Timeout)?;
    debug!("start tone detected");

    // Skip the rest of the start tone, then sample each bit at its midpoint.
    let mut ticks = interval_at(Instant::now() + bit * 2 + bit / 2, bit);
    let max_bits = options.max_bytes * 8;
    let mut bits = Vec::new();
    loop {
        ticks.tick().await;
        capture.refresh();
        if tone_present(capture, FREQ_END, options.threshold_db) {
            let text = bits_to_text(&bits);
            info!(bits = bits.len(), "acoustic frame received");
            return Ok(text);
        }
        let zero = capture.power_db(FREQ_ZERO);
        let one = capture.power_db(FREQ_ONE);
        if zero.max(one) <= options.threshold_db {
            return Err(SideChannelError::CarrierLost { bits: bits.len() });
        }
        // Equal power reads as 0.
        bits.push(one > zero);
        if bits.len() > max_bits {
            return Err(SideChannelError::PayloadTooLarge {
                len: bits.len() / 8,
                max: options.max_bytes,
            });
        }
    }
}

/// A framing tone counts when it clears the threshold and is at least as loud
/// as both bit tones.
fn tone_present(capture: &Capture, freq: f32, threshold_db: f32) -> bool {
    let power = capture.power_db(freq);
    power > threshold_db
        && power >= capture.power_db(FREQ_ZERO)
        && power >= capture.power_db(FREQ_ONE)
}
