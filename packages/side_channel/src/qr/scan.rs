//! Camera scan loop.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SideChannelError};

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_MAX_PAYLOAD: usize = 2048;

/// One grayscale camera frame, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
}

impl VideoFrame {
    /// Nearest-neighbor downscale so neither side exceeds `max_dimension`.
    pub fn downscaled(self, max_dimension: u32) -> VideoFrame {
        let longest = self.width.max(self.height);
        if longest <= max_dimension || max_dimension == 0 {
            return self;
        }
        let scale = max_dimension as f64 / longest as f64;
        let width = ((self.width as f64 * scale).round() as u32).clamp(1, max_dimension);
        let height = ((self.height as f64 * scale).round() as u32).clamp(1, max_dimension);
        let (sw, sh) = (self.width as usize, self.height as usize);
        let mut luma = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height as usize {
            let sy = y * sh / height as usize;
            for x in 0..width as usize {
                let sx = x * sw / width as usize;
                luma.push(self.luma.get(sy * sw + sx).copied().unwrap_or(255));
            }
        }
        VideoFrame {
            width,
            height,
            luma,
        }
    }
}

/// A camera.
#[async_trait]
pub trait FrameSource: Send {
    /// The latest frame, or `None` while the camera is warming up.
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>>;
    /// Stop the camera.
    fn release(&mut self);
}

/// Finds and decodes a code in a frame.
pub trait BarcodeScanner: Send + Sync {
    fn scan(&self, frame: &VideoFrame) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub timeout: Duration,
    pub max_dimension: u32,
    pub max_payload: usize,
    /// Pause between frames that yield nothing.
    pub frame_interval: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCAN_TIMEOUT,
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_payload: DEFAULT_MAX_PAYLOAD,
            frame_interval: Duration::from_millis(16),
        }
    }
}

struct Camera {
    source: Option<Box<dyn FrameSource>>,
}

impl Camera {
    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            debug!("camera released");
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Sample frames until a code decodes.
///
/// Ends with the decoded text, `PayloadTooLarge` when the decoded text is over
/// `max_payload` bytes, `Timeout`, or `Cancelled`. The camera is released
/// exactly once in every case.
pub async fn scan_barcode(
    source: Box<dyn FrameSource>,
    scanner: &dyn BarcodeScanner,
    options: &ScanOptions,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut camera = Camera {
        source: Some(source),
    };
    if cancel.is_cancelled() {
        return Err(SideChannelError::Cancelled);
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SideChannelError::Cancelled),
        r = timeout(options.timeout, sample(&mut camera, scanner, options)) => {
            r.unwrap_or(Err(SideChannelError::Timeout))
        }
    };
    camera.release();
    match &result {
        Ok(text) => info!(bytes = text.len(), "barcode scanned"),
        Err(e) => warn!(error = %e, "barcode scan ended"),
    }
    result
}

async fn sample(
    camera: &mut Camera,
    scanner: &dyn BarcodeScanner,
    options: &ScanOptions,
) -> Result<String> {
    loop {
        let Some(source) = camera.source.as_mut() else {
            return Err(SideChannelError::Cancelled);
        };
        if let Some(frame) = source.next_frame().await? {
            let frame = frame.downscaled(options.max_dimension);
            if let Some(text) = scanner.scan(&frame) {
                if text.len() > options.max_payload {
                    return Err(SideChannelError::PayloadTooLarge {
                        len: text.len(),
                        max: options.max_payload,
                    });
                }
                return Ok(text);
            }
        }
        sleep(options.frame_interval).await;
    }
}
