//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_MIN: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX: Duration = Duration::from_millis(16000);

#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
    /// Up to this fraction of the base delay is added at random.
    jitter: f64,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
            jitter: 0.2,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt; doubles the base up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let extra = if self.jitter > 0.0 {
            base.mul_f64(rand::rng().random::<f64>() * self.jitter)
        } else {
            Duration::ZERO
        };
        (base + extra).min(self.max)
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN, DEFAULT_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_max() {
        let mut b = Backoff::default().with_jitter(0.0);
        let delays: Vec<u64> = (0..7).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 16000, 16000]);
    }

    #[test]
    fn reset_returns_to_min() {
        let mut b = Backoff::default().with_jitter(0.0);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), DEFAULT_MIN);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        for _ in 0..50 {
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(1000));
        }
    }
}
