//! QR codes for pairing payloads.

pub mod decode;
pub mod scan;

use qrcode::render::unicode;
use qrcode::{Color, EcLevel, QrCode};

use crate::error::{Result, SideChannelError};

pub use decode::QrDecoder;
pub use scan::{BarcodeScanner, FrameSource, ScanOptions, VideoFrame, scan_barcode};

/// Error correction level used for every code.
pub const EC_LEVEL: EcLevel = EcLevel::M;
/// Quiet zone, in modules, around rasterized codes.
pub const MARGIN: usize = 4;
/// Pixels per module when rasterizing.
pub const SCALE: usize = 4;

/// Displays an encoded code next to its payload.
pub trait BarcodeRenderer {
    fn render(&mut self, image: &BarcodeImage, text: &str) -> Result<()>;
}

/// Module matrix of an encoded code, row-major, `true` = dark.
#[derive(Clone)]
pub struct BarcodeImage {
    code: QrCode,
    modules: Vec<bool>,
}

impl BarcodeImage {
    pub fn encode(text: &str) -> Result<Self> {
        let code = QrCode::with_error_correction_level(text.as_bytes(), EC_LEVEL)
            .map_err(|e| SideChannelError::Encode(e.to_string()))?;
        let modules = code.to_colors().into_iter().map(|c| c == Color::Dark).collect();
        Ok(Self { code, modules })
    }

    /// Modules per side.
    pub fn width(&self) -> usize {
        self.code.width()
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.modules[y * self.width() + x]
    }

    /// Two rows per character line using half blocks, quiet zone included.
    pub fn to_terminal(&self) -> String {
        self.code
            .render::<unicode::Dense1x2>()
            .quiet_zone(true)
            .build()
    }

    /// Grayscale raster (0 = dark, 255 = light) at [`SCALE`] pixels per
    /// module with a [`MARGIN`] module border.
    pub fn rasterize(&self) -> VideoFrame {
        let side = (self.width() + 2 * MARGIN) * SCALE;
        let mut luma = vec![255u8; side * side];
        for y in 0..self.width() {
            for x in 0..self.width() {
                if !self.is_dark(x, y) {
                    continue;
                }
                let (px, py) = ((x + MARGIN) * SCALE, (y + MARGIN) * SCALE);
                for row in py..py + SCALE {
                    luma[row * side + px..row * side + px + SCALE].fill(0);
                }
            }
        }
        VideoFrame {
            width: side as u32,
            height: side as u32,
            luma,
        }
    }
}

impl std::fmt::Debug for BarcodeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarcodeImage")
            .field("width", &self.width())
            .finish()
    }
}

/// Writes codes to the terminal.
pub struct TerminalRenderer<W> {
    out: W,
}

impl<W: std::io::Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: std::io::Write> BarcodeRenderer for TerminalRenderer<W> {
    fn render(&mut self, image: &BarcodeImage, text: &str) -> Result<()> {
        writeln!(self.out, "{}", image.to_terminal())
            .and_then(|_| writeln!(self.out, "{text}"))
            .map_err(|e| SideChannelError::Device(e.to_string()))
    }
}
