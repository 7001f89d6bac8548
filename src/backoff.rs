//! Exponential backoff with cap, jitter, and success-reset (C11).
//!
//! Used by clients reconnecting to the bridge (and by the SSE/session
//! recovery path). Kept deliberately dependency-free — it is a pure
//! counter plus a `rand`-driven jitter draw.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    /// Jitter fraction in [0, 1]; delay is scaled by `1 + Uniform(-jitter, +jitter)`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// `min(baseMs * factor^failures, maxMs) * (1 + Uniform(-jitter, +jitter))`.
    pub fn delay(&self) -> Duration {
        let raw = (self.config.base_ms as f64) * self.config.factor.powi(self.failures as i32);
        let capped = raw.min(self.config.max_ms as f64);
        let jitter = self.config.jitter;
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }

    pub async fn wait(&mut self) {
        let delay = self.delay();
        tokio::time::sleep(delay).await;
        self.failures = self.failures.saturating_add(1);
    }

    pub fn succeed(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_failures_zero_jitter_returns_base() {
        let b = Backoff::new(BackoffConfig {
            base_ms: 1000,
            max_ms: 30_000,
            factor: 2.0,
            jitter: 0.0,
        });
        assert_eq!(b.delay(), Duration::from_millis(1000));
    }

    #[test]
    fn delay_never_exceeds_cap() {
        let mut b = Backoff::new(BackoffConfig {
            base_ms: 1000,
            max_ms: 5000,
            factor: 2.0,
            jitter: 0.0,
        });
        b.failures = 10;
        assert_eq!(b.delay(), Duration::from_millis(5000));
    }

    #[test]
    fn jitter_bounds_the_delay() {
        let mut b = Backoff::new(BackoffConfig {
            base_ms: 1000,
            max_ms: 30_000,
            factor: 2.0,
            jitter: 0.3,
        });
        b.failures = 2;
        let raw = 1000.0 * 2f64.powi(2);
        for _ in 0..50 {
            let d = b.delay().as_millis() as f64;
            assert!(d >= raw * 0.7 - 1.0 && d <= raw * 1.3 + 1.0);
        }
    }

    #[test]
    fn succeed_resets_failures() {
        let mut b = Backoff::new(BackoffConfig::default());
        b.failures = 7;
        b.succeed();
        assert_eq!(b.failures(), 0);
    }
}
