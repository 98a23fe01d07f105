use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use side_channel::SideChannelError;
use side_channel::qr::scan::DEFAULT_SCAN_TIMEOUT;
use side_channel::qr::{
    BarcodeImage, BarcodeScanner, FrameSource, MARGIN, QrDecoder, ScanOptions, VideoFrame,
    scan_barcode,
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Yields nothing for `warmup` frames, then the same frame forever.
struct FakeCamera {
    warmup: usize,
    frame: Option<VideoFrame>,
    fail: bool,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSource for FakeCamera {
    async fn next_frame(&mut self) -> side_channel::Result<Option<VideoFrame>> {
        if self.fail {
            return Err(SideChannelError::Device("camera unplugged".into()));
        }
        if self.warmup > 0 {
            self.warmup -= 1;
            return Ok(None);
        }
        Ok(self.frame.clone())
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reads module centres of frames produced by `BarcodeImage::rasterize` and
/// matches them against codes it was told about.
struct KnownCodes {
    codes: Vec<(BarcodeImage, String)>,
    widest: AtomicU32,
}

impl KnownCodes {
    fn new(texts: &[&str]) -> Self {
        Self {
            codes: texts
                .iter()
                .map(|t| (BarcodeImage::encode(t).unwrap(), t.to_string()))
                .collect(),
            widest: AtomicU32::new(0),
        }
    }
}

impl BarcodeScanner for KnownCodes {
    fn scan(&self, frame: &VideoFrame) -> Option<String> {
        self.widest.fetch_max(frame.width.max(frame.height), Ordering::SeqCst);
        self.codes.iter().find_map(|(image, text)| {
            let span = (image.width() + 2 * MARGIN) as f64;
            let matches = (0..image.width()).all(|y| {
                (0..image.width()).all(|x| {
                    let px = ((x + MARGIN) as f64 + 0.5) / span * frame.width as f64;
                    let py = ((y + MARGIN) as f64 + 0.5) / span * frame.height as f64;
                    let idx = py as usize * frame.width as usize + px as usize;
                    frame.luma.get(idx).is_some_and(|&l| l < 128) == image.is_dark(x, y)
                })
            });
            matches.then(|| text.clone())
        })
    }
}

struct Always(String);

impl BarcodeScanner for Always {
    fn scan(&self, _frame: &VideoFrame) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Nearest-neighbor upscale, standing in for a high resolution camera.
fn upscale(frame: &VideoFrame, factor: u32) -> VideoFrame {
    let (w, h) = (frame.width * factor, frame.height * factor);
    let luma = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x / factor, y / factor)))
        .map(|(x, y)| frame.luma[(y * frame.width + x) as usize])
        .collect();
    VideoFrame {
        width: w,
        height: h,
        luma,
    }
}

fn camera(frame: Option<VideoFrame>, warmup: usize) -> (Box<FakeCamera>, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicUsize::new(0));
    let cam = Box::new(FakeCamera {
        warmup,
        frame,
        fail: false,
        released: released.clone(),
    });
    (cam, released)
}

#[tokio::test(start_paused = true)]
async fn scans_downscaled_frame_after_warmup() {
    let payload = r#"{"type":"offer","sdp":"v=0\r\na=psk:secret\r\n"}"#;
    let raster = BarcodeImage::encode(payload).unwrap().rasterize();
    let big = upscale(&raster, 12);
    assert!(big.width > 1024);

    let scanner = KnownCodes::new(&["something else", payload]);
    let (cam, released) = camera(Some(big), 5);
    let text = scan_barcode(cam, &scanner, &ScanOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(text, payload);
    assert!(scanner.widest.load(Ordering::SeqCst) <= 1024);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn decodes_unknown_code_from_large_frame() {
    let payload = r#"{"type":"answer","sdp":"v=0\r\no=- 42 2 IN IP4 127.0.0.1\r\n"}"#;
    let big = upscale(&BarcodeImage::encode(payload).unwrap().rasterize(), 12);
    assert!(big.width > 1024);

    let (cam, released) = camera(Some(big), 2);
    let text = scan_barcode(cam, &QrDecoder, &ScanOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(text, payload);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn oversized_payload_rejected() {
    let (cam, released) = camera(Some(VideoFrame { width: 1, height: 1, luma: vec![0] }), 0);
    let err = scan_barcode(
        cam,
        &Always("x".repeat(3000)),
        &ScanOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err, SideChannelError::PayloadTooLarge { len: 3000, max: 2048 });
    assert!(err.to_string().starts_with("QR too large"));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn blank_camera_times_out() {
    let (cam, released) = camera(None, 0);
    let started = Instant::now();
    let err = scan_barcode(
        cam,
        &KnownCodes::new(&["x"]),
        &ScanOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err, SideChannelError::Timeout);
    assert!(started.elapsed() >= DEFAULT_SCAN_TIMEOUT);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_scan() {
    let (cam, released) = camera(None, 0);
    let cancel = CancellationToken::new();
    let scanner = KnownCodes::new(&["x"]);
    let options = ScanOptions::default();
    let (result, _) = tokio::join!(scan_barcode(cam, &scanner, &options, &cancel), async {
        sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    assert_eq!(result.unwrap_err(), SideChannelError::Cancelled);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn camera_failure_propagates() {
    let released = Arc::new(AtomicUsize::new(0));
    let cam = Box::new(FakeCamera {
        warmup: 0,
        frame: None,
        fail: true,
        released: released.clone(),
    });
    let err = scan_barcode(
        cam,
        &KnownCodes::new(&["x"]),
        &ScanOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SideChannelError::Device(_)));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}
