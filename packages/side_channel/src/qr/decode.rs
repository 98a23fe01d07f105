//! QR decoding of grayscale frames.

use tracing::debug;

use super::scan::{BarcodeScanner, VideoFrame};

/// Locates every code in a frame and returns the first one that decodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDecoder;

impl BarcodeScanner for QrDecoder {
    fn scan(&self, frame: &VideoFrame) -> Option<String> {
        let (width, height) = (frame.width as usize, frame.height as usize);
        if width == 0 || height == 0 || frame.luma.len() < width * height {
            return None;
        }
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
            frame.luma[y * width + x]
        });
        let grids = prepared.detect_grids();
        grids.iter().find_map(|grid| match grid.decode() {
            Ok((_, text)) => Some(text),
            Err(e) => {
                debug!(error = ?e, "grid found but did not decode");
                None
            }
        })
    }
}
