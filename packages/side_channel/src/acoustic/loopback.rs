//! A simulated room: whatever the output plays, every opened input hears.
//!
//! [`AirModel::Ideal`] reports the playing tone alone at a clean level.
//! [`AirModel::Pcm`] synthesizes the waveform and analyses a sliding window
//! of it the way a real microphone path would.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use super::device::{AudioInput, AudioOutput, SpectrumSource};
use super::framing::Tone;
use super::freq_bin;
use super::pcm::{SILENCE_DB, goertzel_db, synthesize};
use crate::error::{Result, SideChannelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirModel {
    Ideal,
    Pcm { sample_rate: u32 },
}

struct Transmission {
    started: Instant,
    tones: Vec<Tone>,
    gain: f32,
    pcm: Vec<f32>,
}

struct Shared {
    model: AirModel,
    air: Mutex<Option<Transmission>>,
    deny_microphone: AtomicBool,
    opened: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Clone)]
pub struct AcousticLoopback {
    shared: Arc<Shared>,
}

impl AcousticLoopback {
    pub fn new(model: AirModel) -> Self {
        Self {
            shared: Arc::new(Shared {
                model,
                air: Mutex::new(None),
                deny_microphone: AtomicBool::new(false),
                opened: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
        }
    }

    pub fn ideal() -> Self {
        Self::new(AirModel::Ideal)
    }

    /// Refuse every subsequent microphone request.
    pub fn deny_microphone(&self) {
        self.shared.deny_microphone.store(true, Ordering::SeqCst);
    }

    /// Number of sources opened so far.
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of release calls received so far.
    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for AcousticLoopback {
    async fn play(&self, tones: &[Tone], gain: f32) -> Result<()> {
        let pcm = match self.shared.model {
            AirModel::Ideal => Vec::new(),
            AirModel::Pcm { sample_rate } => synthesize(tones, sample_rate, gain),
        };
        let total: Duration = tones.iter().map(|t| t.duration).sum();
        *self.shared.air.lock().unwrap_or_else(|e| e.into_inner()) = Some(Transmission {
            started: Instant::now(),
            tones: tones.to_vec(),
            gain,
            pcm,
        });
        sleep(total).await;
        Ok(())
    }
}

#[async_trait]
impl AudioInput for AcousticLoopback {
    async fn open(&self, fft_size: usize) -> Result<Box<dyn SpectrumSource>> {
        if self.shared.deny_microphone.load(Ordering::SeqCst) {
            return Err(SideChannelError::MicPermissionDenied);
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        let sample_rate = match self.shared.model {
            AirModel::Ideal => 48_000,
            AirModel::Pcm { sample_rate } => sample_rate,
        };
        Ok(Box::new(Listener {
            shared: self.shared.clone(),
            sample_rate: sample_rate as f32,
            fft_size,
            heard: Heard::Silence,
        }))
    }
}

enum Heard {
    Silence,
    Tone { freq: f32, gain: f32 },
    Window(Vec<f32>),
}

struct Listener {
    shared: Arc<Shared>,
    sample_rate: f32,
    fft_size: usize,
    heard: Heard,
}

impl SpectrumSource for Listener {
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn refresh(&mut self) {
        let air = self.shared.air.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = air.as_ref() else {
            self.heard = Heard::Silence;
            return;
        };
        let elapsed = Instant::now().saturating_duration_since(tx.started);
        self.heard = match self.shared.model {
            AirModel::Ideal => {
                let mut at = Duration::ZERO;
                let mut heard = Heard::Silence;
                for tone in &tx.tones {
                    if elapsed < at + tone.duration {
                        heard = Heard::Tone {
                            freq: tone.freq,
                            gain: tx.gain,
                        };
                        break;
                    }
                    at += tone.duration;
                }
                heard
            }
            AirModel::Pcm { .. } => {
                let end = (elapsed.as_secs_f64() * self.sample_rate as f64) as usize;
                let window = (end.saturating_sub(self.fft_size)..end)
                    .map(|i| tx.pcm.get(i).copied().unwrap_or(0.0));
                let mut frame = vec![0.0; self.fft_size.saturating_sub(end)];
                frame.extend(window);
                Heard::Window(frame)
            }
        };
    }

    fn bin_db(&self, bin: usize) -> f32 {
        match &self.heard {
            Heard::Silence => SILENCE_DB,
            Heard::Tone { freq, gain } => {
                if freq_bin(*freq, self.sample_rate, self.fft_size) == bin {
                    20.0 * gain.log10()
                } else {
                    SILENCE_DB
                }
            }
            Heard::Window(frame) => goertzel_db(frame, bin),
        }
    }

    fn release(&mut self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}
