//! Reconnect delay calculation: exponential backoff with jitter.

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;
/// No reconnect attempt follows a failure sooner than this.
pub const MIN_DELAY_MS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap applied before jitter.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 0.0 to 1.0; 0.2 spreads each delay by up to ±20%.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Rejects settings that would let a reconnect loop spin.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("retry base_delay_ms must be greater than zero".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "retry max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(format!(
                "retry jitter_factor {} is outside 0.0..=1.0",
                self.jitter_factor
            ));
        }
        Ok(())
    }
}

/// `min(max_delay, base_delay * 2^attempt)`, scaled by `1 + (2r - 1) * jitter`.
///
/// `random` is expected in `[0.0, 1.0)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms) as f64;

    let jitter = jitter_factor.clamp(0.0, 1.0);
    let spread = (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter;

    (capped * (1.0 + spread)).max(0.0).round() as u64
}

/// Tracks consecutive failures for one reconnect loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt; grows with each call until [`reset`](Self::reset).
    ///
    /// Never shorter than [`MIN_DELAY_MS`], whatever the config says.
    pub fn next_delay(&mut self) -> Duration {
        let ms = calculate_backoff_delay(
            self.attempt,
            self.config.base_delay_ms,
            self.config.max_delay_ms,
            self.config.jitter_factor,
            rand::random::<f64>(),
        );
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms.max(MIN_DELAY_MS))
    }

    /// Call after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
