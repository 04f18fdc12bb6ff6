//! Exponential retry backoff.

use std::time::Duration;

use rand::Rng;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default upper bound on the retry delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Doubling stops growing after this many attempts; the cap is reached long before.
const MAX_EXPONENT: u32 = 16;

/// Configuration for reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any delay.
    pub cap: Duration,
    /// Randomize each delay between half and all of its nominal value.
    pub jitter: bool,
}

impl BackoffConfig {
    /// Creates a backoff configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
            jitter: true,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry delay generator. Doubles per attempt until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff in its initial state.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Nominal (unjittered) delay for the given attempt.
    #[must_use]
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.config
            .base
            .saturating_mul(factor)
            .min(self.config.cap)
    }

    /// Returns the next delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if !self.config.jitter {
            return nominal;
        }
        let half = nominal / 2;
        half + rand::thread_rng().gen_range(Duration::ZERO..=half)
    }

    /// Starts over from the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
