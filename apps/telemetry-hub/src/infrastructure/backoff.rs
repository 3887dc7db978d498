//! Retry Backoff
//!
//! Exponential backoff with jitter, shared by stream reconnects and stats
//! request retries.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::{StatsSettings, StreamSettings};

/// Default jitter as a fraction of the base delay.
const DEFAULT_JITTER: f64 = 0.1;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay returned for the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on any un-jittered delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt.
    pub multiplier: f64,
    /// Jitter as a fraction (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempt budget (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from_stream_settings(&StreamSettings::default())
    }
}

impl BackoffConfig {
    /// Reconnect backoff for the telemetry stream.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: DEFAULT_JITTER,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Retry backoff for stats requests. The request loop bounds the
    /// attempt count itself.
    #[must_use]
    pub const fn from_stats_settings(settings: &StatsSettings) -> Self {
        Self {
            initial_delay: settings.retry_delay_initial,
            max_delay: settings.retry_delay_max,
            multiplier: 2.0,
            jitter_factor: DEFAULT_JITTER,
            max_attempts: 0,
        }
    }

    /// Same parameters without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Stateful backoff sequence.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use telemetry_hub::infrastructure::backoff::{Backoff, BackoffConfig};
///
/// let mut backoff = Backoff::new(BackoffConfig {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(1),
///     multiplier: 2.0,
///     jitter_factor: 0.0,
///     max_attempts: 2,
/// });
///
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next_delay(), None);
///
/// backoff.reset();
/// assert_eq!(backoff.attempts(), 0);
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Start a fresh sequence.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Next delay, or `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;

        let delay = jittered(self.current, self.config.jitter_factor);
        self.current = grow(self.current, self.config.multiplier).min(self.config.max_delay);
        Some(delay)
    }

    /// Restart from the initial delay after a success.
    pub const fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }
}

fn grow(delay: Duration, multiplier: f64) -> Duration {
    #[allow(clippy::cast_precision_loss)]
    let scaled = (delay.as_millis() as f64 * multiplier).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        return Duration::ZERO;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = scaled.min(u64::MAX as f64) as u64;
    Duration::from_millis(millis)
}

fn jittered(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }

    #[allow(clippy::cast_precision_loss)]
    let base = delay.as_millis() as f64;
    let spread = base * factor;
    let offset: f64 = rand::rng().random_range(-spread..=spread);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = (base + offset).max(1.0) as u64;
    Duration::from_millis(millis)
}
