//! Speaker and microphone capabilities.

use async_trait::async_trait;
use tracing::debug;

use super::framing::Tone;
use super::freq_bin;
use crate::error::Result;

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play `tones` back to back. Resolves once playback has finished.
    async fn play(&self, tones: &[Tone], gain: f32) -> Result<()>;
}

#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Acquire the microphone. A refusal surfaces as
    /// [`SideChannelError::MicPermissionDenied`](crate::SideChannelError::MicPermissionDenied).
    async fn open(&self, fft_size: usize) -> Result<Box<dyn SpectrumSource>>;
}

/// Frequency-domain view of live microphone input.
pub trait SpectrumSource: Send {
    fn sample_rate(&self) -> f32;
    fn fft_size(&self) -> usize;
    /// Capture the current analysis frame.
    fn refresh(&mut self);
    /// Power of `bin` in the last captured frame, in dBFS.
    fn bin_db(&self, bin: usize) -> f32;
    /// Stop capture and free the device.
    fn release(&mut self);
}

/// Owns an opened source and releases it exactly once, on [`release`] or drop.
///
/// [`release`]: Capture::release
pub(crate) struct Capture {
    source: Option<Box<dyn SpectrumSource>>,
}

impl Capture {
    pub(crate) fn new(source: Box<dyn SpectrumSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub(crate) fn refresh(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.refresh();
        }
    }

    /// Power at `freq` in the last refreshed frame. Silence once released.
    pub(crate) fn power_db(&self, freq: f32) -> f32 {
        match self.source.as_ref() {
            Some(source) => {
                source.bin_db(freq_bin(freq, source.sample_rate(), source.fft_size()))
            }
            None => f32::NEG_INFINITY,
        }
    }

    pub(crate) fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            debug!("audio capture released");
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.release();
    }
}
