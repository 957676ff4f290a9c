use std::time::Duration;

use rand::Rng;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_FACTOR: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.2;

/// Delays between reconnect attempts: `base * factor^(attempt - 1)`, randomized by `jitter` in
/// both directions and capped at `max`. Never runs out, the caller stops reconnecting on shutdown.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    /// Between 0.0 and 1.0.
    jitter: f64,
    attempt: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_FACTOR,
            DEFAULT_JITTER,
        )
    }
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            base,
            max,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Starts over from the base delay, called once a connection is established.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn delay(&self) -> Duration {
        let exponent = i32::try_from(self.attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut delay_ms = self.base.as_millis() as f64 * self.factor.powi(exponent);

        if self.jitter > 0.0 {
            delay_ms *= rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        }

        // float to int casts saturate, an overflowing power ends up at the cap
        Duration::from_millis(delay_ms as u64).min(self.max)
    }
}

impl Iterator for ReconnectBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.delay())
    }
}
