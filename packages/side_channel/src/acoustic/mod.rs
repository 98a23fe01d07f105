//! Audible FSK modem.
//!
//! A frame is a start tone held for two bit durations, one tone per bit
//! (UTF-8 bytes, most significant bit first), then an end tone held for two
//! bit durations. The receiver polls a spectrum of the microphone input.

pub mod calibration;
pub mod device;
pub mod framing;
pub mod loopback;
pub mod modem;
pub mod pcm;

use std::time::Duration;

pub use calibration::{CALIBRATION_STEPS, CALIBRATION_TEXT, calibrate, play_calibration_samples};
pub use device::{AudioInput, AudioOutput, SpectrumSource};
pub use framing::{Tone, bits_to_text, estimate_duration, text_to_bits, tone_schedule};
pub use modem::{ListenOptions, listen, play};

pub const FREQ_ZERO: f32 = 1200.0;
pub const FREQ_ONE: f32 = 1800.0;
pub const FREQ_START: f32 = 2400.0;
pub const FREQ_END: f32 = 3000.0;

/// Output gain applied to every tone.
pub const GAIN: f32 = 0.2;

pub const DEFAULT_BIT_DURATION: Duration = Duration::from_millis(50);
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_THRESHOLD_DB: f32 = -60.0;

/// Spectrum bin holding `freq` for an analysis of `fft_size` samples.
pub fn freq_bin(freq: f32, sample_rate: f32, fft_size: usize) -> usize {
    ((freq / sample_rate) * fft_size as f32).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_at_48k() {
        assert_eq!(freq_bin(FREQ_ZERO, 48_000.0, 2048), 51);
        assert_eq!(freq_bin(FREQ_ONE, 48_000.0, 2048), 77);
        assert_eq!(freq_bin(FREQ_END, 48_000.0, 2048), 128);
    }
}
