use std::time::Duration;

use proptest::prelude::*;
use side_channel::SideChannelError;
use side_channel::acoustic::calibration::DEFAULT_STEP_TIMEOUT;
use side_channel::acoustic::loopback::{AcousticLoopback, AirModel};
use side_channel::acoustic::{
    CALIBRATION_STEPS, ListenOptions, calibrate, listen, play, play_calibration_samples,
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

async fn exchange(
    air: &AcousticLoopback,
    text: &str,
    bit: Duration,
) -> side_channel::Result<String> {
    let cancel = CancellationToken::new();
    let options = ListenOptions {
        bit_duration: bit,
        ..Default::default()
    };
    let (heard, played) = tokio::join!(listen(air, &options, &cancel), play(air, text, bit));
    played?;
    heard
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn decodes_at_some_calibration_step(text in "[ -~]{1,12}") {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let air = AcousticLoopback::ideal();
        let decoded: Vec<String> = rt.block_on(async {
            let mut out = Vec::new();
            for bit in CALIBRATION_STEPS {
                if let Ok(heard) = exchange(&air, &text, bit).await {
                    out.push(heard);
                }
            }
            out
        });
        prop_assert!(decoded.iter().any(|heard| heard == &text));
        prop_assert_eq!(air.opened(), air.released());
    }
}

#[tokio::test(start_paused = true)]
async fn pcm_path_roundtrip() {
    let air = AcousticLoopback::new(AirModel::Pcm { sample_rate: 48_000 });
    let heard = exchange(&air, "hi", Duration::from_millis(80)).await.unwrap();
    assert_eq!(heard, "hi");
    assert_eq!(air.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn utf8_text_survives() {
    let air = AcousticLoopback::ideal();
    let heard = exchange(&air, "héllo ✓", Duration::from_millis(20)).await.unwrap();
    assert_eq!(heard, "héllo ✓");
}

#[tokio::test(start_paused = true)]
async fn no_start_tone_times_out_and_releases() {
    let air = AcousticLoopback::ideal();
    let options = ListenOptions {
        timeout: Duration::from_millis(500),
        ..Default::default()
    };
    let started = Instant::now();
    let err = listen(&air, &options, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, SideChannelError::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(air.opened(), 1);
    assert_eq!(air.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_frame_releases_once() {
    let air = AcousticLoopback::ideal();
    let cancel = CancellationToken::new();
    let options = ListenOptions::default();
    let (heard, _) = tokio::join!(listen(&air, &options, &cancel), async {
        let player = play(&air, "a fairly long message", options.bit_duration);
        let stop = async {
            sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        };
        tokio::join!(player, stop)
    });
    assert_eq!(heard.unwrap_err(), SideChannelError::Cancelled);
    assert_eq!(air.released(), 1);

    // Cancelling again, or listening with a fired token, touches nothing.
    cancel.cancel();
    assert_eq!(
        listen(&air, &options, &cancel).await.unwrap_err(),
        SideChannelError::Cancelled
    );
    assert_eq!(air.opened(), 1);
    assert_eq!(air.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_listen_releases() {
    let air = AcousticLoopback::ideal();
    let options = ListenOptions::default();
    let cancel = CancellationToken::new();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), listen(&air, &options, &cancel)).await;
    assert!(abandoned.is_err());
    assert_eq!(air.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn silence_after_start_is_carrier_loss() {
    let air = AcousticLoopback::ideal();
    let cancel = CancellationToken::new();
    let bit = Duration::from_millis(20);
    let options = ListenOptions {
        bit_duration: bit,
        ..Default::default()
    };
    let start_only = [side_channel::acoustic::Tone {
        freq: side_channel::acoustic::FREQ_START,
        duration: bit * 2,
    }];
    let (heard, _) = tokio::join!(listen(&air, &options, &cancel), async {
        use side_channel::acoustic::AudioOutput;
        air.play(&start_only, 0.2).await
    });
    assert_eq!(heard.unwrap_err(), SideChannelError::CarrierLost { bits: 0 });
}

#[tokio::test]
async fn denied_microphone_surfaces() {
    let air = AcousticLoopback::ideal();
    air.deny_microphone();
    let err = listen(&air, &ListenOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, SideChannelError::MicPermissionDenied);
    assert_eq!(err.to_string(), "mic-permission-denied");
    assert_eq!(air.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn calibration_picks_first_matching_step() {
    let air = AcousticLoopback::ideal();
    let cancel = CancellationToken::new();
    let (picked, played) = tokio::join!(
        calibrate(&air, &CALIBRATION_STEPS, DEFAULT_STEP_TIMEOUT, &cancel),
        play_calibration_samples(&air, &CALIBRATION_STEPS, &cancel),
    );
    played.unwrap();
    assert_eq!(picked.unwrap(), CALIBRATION_STEPS[0]);
    assert_eq!(air.opened(), air.released());
}

#[tokio::test(start_paused = true)]
async fn calibration_without_sender_fails() {
    let air = AcousticLoopback::ideal();
    let steps = [Duration::from_millis(20), Duration::from_millis(10)];
    let err = calibrate(&air, &steps, DEFAULT_STEP_TIMEOUT, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, SideChannelError::CalibrationFailed);
    assert_eq!(air.opened(), 2);
    assert_eq!(air.released(), 2);
}

#[tokio::test]
async fn calibration_stops_on_denied_microphone() {
    let air = AcousticLoopback::ideal();
    air.deny_microphone();
    let err = calibrate(&air, &CALIBRATION_STEPS, DEFAULT_STEP_TIMEOUT, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, SideChannelError::MicPermissionDenied);
}
