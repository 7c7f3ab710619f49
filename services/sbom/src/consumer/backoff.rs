use std::time::Duration;

use rand::Rng as _;

/// Bounded exponential backoff with uniform jitter. Each retry context gets
/// its own instance; the attempt counter never resets.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = if base.is_zero() {
            Duration::from_secs(1)
        } else {
            base
        };
        Self {
            attempt: 0,
            base,
            max: max.max(base),
        }
    }

    /// `min(max, base * 2^min(attempt, 5)) + jitter(0, base/2)`; advances
    /// the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(5);
        let delay = self.base.saturating_mul(1 << shift).min(self.max);
        self.attempt += 1;
        delay + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let mut window = self.base / 2;
        if window.is_zero() {
            window = Duration::from_millis(50);
        }
        let nanos = window.as_nanos() as u64;
        Duration::from_nanos(rand::rng().random_range(0..nanos))
    }
}
