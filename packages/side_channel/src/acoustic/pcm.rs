//! Raw PCM: tone synthesis for speakers and Goertzel analysis for microphones.

use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::device::SpectrumSource;
use super::framing::Tone;

/// Reported for bins with no energy.
pub const SILENCE_DB: f32 = -160.0;

/// Render a tone schedule to mono samples. Phase carries across tone
/// boundaries so transitions do not click.
pub fn synthesize(tones: &[Tone], sample_rate: u32, gain: f32) -> Vec<f32> {
    let sr = sample_rate as f64;
    let total: usize = tones
        .iter()
        .map(|t| (t.duration.as_secs_f64() * sr).round() as usize)
        .sum();
    let mut out = Vec::with_capacity(total);
    let mut phase = 0.0f64;
    for tone in tones {
        let n = (tone.duration.as_secs_f64() * sr).round() as usize;
        let step = TAU * tone.freq as f64 / sr;
        for _ in 0..n {
            out.push((phase.sin() * gain as f64) as f32);
            phase = (phase + step) % TAU;
        }
    }
    out
}

/// Hann-windowed Goertzel magnitude of `bin` over `frame`, in dBFS. A full
/// scale sine centred on the bin reads 0 dB.
pub fn goertzel_db(frame: &[f32], bin: usize) -> f32 {
    let n = frame.len();
    if n == 0 {
        return SILENCE_DB;
    }
    let coeff = 2.0 * (TAU * bin as f64 / n as f64).cos();
    let (mut s1, mut s2) = (0.0f64, 0.0f64);
    let mut window_sum = 0.0f64;
    for (i, &x) in frame.iter().enumerate() {
        let w = 0.5 - 0.5 * (TAU * i as f64 / n as f64).cos();
        window_sum += w;
        let s = x as f64 * w + coeff * s1 - s2;
        s2 = s1;
        s1 = s;
    }
    let power = (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0);
    let magnitude = 2.0 * power.sqrt() / window_sum;
    if magnitude <= 0.0 {
        return SILENCE_DB;
    }
    ((20.0 * magnitude.log10()) as f32).max(SILENCE_DB)
}

/// Spectrum over the most recent `fft_size` samples pushed through a
/// [`PcmFeeder`].
pub struct PcmSpectrum {
    sample_rate: f32,
    fft_size: usize,
    ring: Arc<Mutex<VecDeque<f32>>>,
    released: Arc<AtomicBool>,
    frame: Vec<f32>,
}

/// Producer half, handed to the platform's microphone callback.
#[derive(Clone)]
pub struct PcmFeeder {
    fft_size: usize,
    ring: Arc<Mutex<VecDeque<f32>>>,
    released: Arc<AtomicBool>,
}

impl PcmSpectrum {
    pub fn new(sample_rate: u32, fft_size: usize) -> (Self, PcmFeeder) {
        let ring = Arc::new(Mutex::new(VecDeque::with_capacity(fft_size)));
        let released = Arc::new(AtomicBool::new(false));
        let feeder = PcmFeeder {
            fft_size,
            ring: ring.clone(),
            released: released.clone(),
        };
        let spectrum = Self {
            sample_rate: sample_rate as f32,
            fft_size,
            ring,
            released,
            frame: vec![0.0; fft_size],
        };
        (spectrum, feeder)
    }
}

impl PcmFeeder {
    /// Append captured samples. Returns false once the spectrum was released,
    /// telling the callback to stop the stream.
    pub fn push(&self, samples: &[f32]) -> bool {
        if self.released.load(Ordering::SeqCst) {
            return false;
        }
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.extend(samples.iter().copied());
        let excess = ring.len().saturating_sub(self.fft_size);
        ring.drain(..excess);
        true
    }
}

impl SpectrumSource for PcmSpectrum {
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn refresh(&mut self) {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let pad = self.fft_size - ring.len();
        self.frame[..pad].fill(0.0);
        for (dst, &src) in self.frame[pad..].iter_mut().zip(ring.iter()) {
            *dst = src;
        }
    }

    fn bin_db(&self, bin: usize) -> f32 {
        goertzel_db(&self.frame, bin)
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::acoustic::{FREQ_END, FREQ_ONE, FREQ_ZERO, GAIN, freq_bin};

    const SR: u32 = 48_000;

    fn tone(freq: f32, ms: u64) -> Tone {
        Tone {
            freq,
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn synthesized_length_matches_schedule() {
        let pcm = synthesize(&[tone(FREQ_ZERO, 10), tone(FREQ_ONE, 20)], SR, GAIN);
        assert_eq!(pcm.len(), 1440);
        assert!(pcm.iter().all(|s| s.abs() <= GAIN + f32::EPSILON));
    }

    #[test]
    fn goertzel_finds_the_playing_tone() {
        let pcm = synthesize(&[tone(FREQ_ONE, 80)], SR, GAIN);
        let frame = &pcm[pcm.len() - 2048..];
        let one = goertzel_db(frame, freq_bin(FREQ_ONE, SR as f32, 2048));
        let zero = goertzel_db(frame, freq_bin(FREQ_ZERO, SR as f32, 2048));
        let end = goertzel_db(frame, freq_bin(FREQ_END, SR as f32, 2048));
        assert!(one > -20.0, "one = {one}");
        assert!(one > zero + 40.0);
        assert!(end < -60.0, "end = {end}");
    }

    #[test]
    fn silence_is_floor() {
        assert_eq!(goertzel_db(&[0.0; 2048], 51), SILENCE_DB);
        assert_eq!(goertzel_db(&[], 51), SILENCE_DB);
    }

    #[test]
    fn spectrum_keeps_latest_window() {
        let (mut spectrum, feeder) = PcmSpectrum::new(SR, 2048);
        assert!(feeder.push(&synthesize(&[tone(FREQ_ZERO, 80)], SR, GAIN)));
        assert!(feeder.push(&synthesize(&[tone(FREQ_ONE, 80)], SR, GAIN)));
        spectrum.refresh();
        let one = spectrum.bin_db(freq_bin(FREQ_ONE, SR as f32, 2048));
        let zero = spectrum.bin_db(freq_bin(FREQ_ZERO, SR as f32, 2048));
        assert!(one > zero);

        spectrum.release();
        assert!(!feeder.push(&[0.1; 16]));
    }
}
