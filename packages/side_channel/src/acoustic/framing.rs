use std::time::Duration;

use super::{FREQ_END, FREQ_ONE, FREQ_START, FREQ_ZERO};

/// One scheduled tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub freq: f32,
    pub duration: Duration,
}

/// UTF-8 bytes of `text` as bits, most significant first.
pub fn text_to_bits(text: &str) -> Vec<bool> {
    text.bytes()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1 == 1))
        .collect()
}

/// Pack bits back into UTF-8 text. A trailing partial byte is dropped and
/// invalid sequences become U+FFFD.
pub fn bits_to_text(bits: &[bool]) -> String {
    let bytes: Vec<u8> = bits
        .chunks_exact(8)
        .map(|byte| byte.iter().fold(0u8, |acc, &bit| (acc << 1) | bit as u8))
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// The full tone sequence for one frame.
pub fn tone_schedule(text: &str, bit: Duration) -> Vec<Tone> {
    let bits = text_to_bits(text);
    let mut tones = Vec::with_capacity(bits.len() + 2);
    tones.push(Tone {
        freq: FREQ_START,
        duration: bit * 2,
    });
    tones.extend(bits.into_iter().map(|one| Tone {
        freq: if one { FREQ_ONE } else { FREQ_ZERO },
        duration: bit,
    }));
    tones.push(Tone {
        freq: FREQ_END,
        duration: bit * 2,
    });
    tones
}

/// Air time of one frame: `(bits + 4) * bit`.
pub fn estimate_duration(text: &str, bit: Duration) -> Duration {
    bit * (text.len() as u32 * 8 + 4)
}
