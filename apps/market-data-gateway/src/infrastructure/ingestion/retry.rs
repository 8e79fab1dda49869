//! Stream Retry Policy
//!
//! Fixed-interval backoff with optional jitter for reopening upstream
//! streams. Attempts are counted for observability only; readers retry
//! until cancelled.

use std::time::Duration;

use rand::Rng;

/// Configuration for stream retry behavior.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Delay between a failure and the next connection attempt.
    pub interval: Duration,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, jitter_factor: f64) -> Self {
        Self {
            interval,
            jitter_factor,
        }
    }

    /// Create configuration from `IngestionSettings`.
    #[must_use]
    pub const fn from_ingestion_settings(settings: &crate::IngestionSettings) -> Self {
        Self {
            interval: settings.retry_interval,
            jitter_factor: settings.retry_jitter,
        }
    }
}

/// Retry policy for one reader.
///
/// # Example
///
/// ```rust
/// use market_data_gateway::infrastructure::ingestion::{RetryConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let mut policy = RetryPolicy::new(RetryConfig::new(Duration::from_secs(5), 0.0));
///
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// assert_eq!(policy.attempt_count(), 1);
///
/// // Stream opened again
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt_count: u32,
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the next delay and count the attempt.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.apply_jitter(self.config.interval)
    }

    /// Reset after the stream opened successfully.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Consecutive failed attempts since the last successful open.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * factor.min(1.0);
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = RetryConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn delay_is_fixed_without_jitter() {
        let mut policy = RetryPolicy::new(RetryConfig::new(Duration::from_millis(250), 0.0));

        for attempt in 1..=5 {
            assert_eq!(policy.next_delay(), Duration::from_millis(250));
            assert_eq!(policy.attempt_count(), attempt);
        }
    }

    #[test]
    fn reset_clears_attempts() {
        let mut policy = RetryPolicy::new(RetryConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
    }

    #[test]
    fn non_finite_jitter_is_ignored() {
        for factor in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.5] {
            let mut policy = RetryPolicy::new(RetryConfig::new(Duration::from_millis(300), factor));
            assert_eq!(policy.next_delay(), Duration::from_millis(300));
        }
    }

    #[test]
    fn oversized_jitter_is_capped() {
        let mut policy = RetryPolicy::new(RetryConfig::new(Duration::from_millis(100), 5.0));

        for _ in 0..100 {
            let millis = policy.next_delay().as_millis();
            assert!((1..=200).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn jitter_bounds() {
        let mut policy = RetryPolicy::new(RetryConfig::new(Duration::from_millis(1000), 0.1));

        for _ in 0..100 {
            let millis = policy.next_delay().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }
}
