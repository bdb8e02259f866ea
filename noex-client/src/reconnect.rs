//! Reconnection strategies
//!
//! When the connection drops unexpectedly the client asks a strategy how long
//! to wait before each attempt, and whether to try at all. Strategies are pure
//! functions of the zero-based attempt number, so the same instance can be
//! shared by every reconnect loop the client ever runs.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `initial * multiplier^attempt`, capped, plus
//!   uniform jitter (default)
//! - **FixedDelay**: constant delay between attempts
//!
//! # Examples
//!
//! ```rust
//! use noex_client::{ExponentialBackoff, ReconnectOptions, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let strategy = ExponentialBackoff::from(
//!     ReconnectOptions::default()
//!         .with_initial_delay(Duration::from_millis(100))
//!         .with_jitter(Duration::ZERO)
//!         .with_max_retries(3),
//! );
//!
//! assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(100)));
//! assert_eq!(strategy.next_delay(2), Some(Duration::from_millis(400)));
//! assert_eq!(strategy.next_delay(3), None);
//! ```

use crate::config::ReconnectOptions;
use rand::Rng;
use std::time::Duration;

/// Trait for reconnection strategies
///
/// Implement it to plug custom behaviour into
/// [`ClientBuilder::with_reconnect_strategy`](crate::ClientBuilder::with_reconnect_strategy).
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed)
    ///
    /// `None` means give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Exponential backoff with uniform jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    options: ReconnectOptions,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            options: ReconnectOptions::default()
                .with_initial_delay(initial_delay)
                .with_max_delay(max_delay),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.options.max_retries = Some(max_attempts);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.options.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.options.jitter = jitter;
        self
    }

    pub fn options(&self) -> &ReconnectOptions {
        &self.options
    }

    /// Capped delay without jitter
    fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.options.initial_delay.as_millis() as f64;
        let max_ms = self.options.max_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;

        let raw = initial_ms * self.options.backoff_multiplier.powi(exponent);
        let capped = if raw.is_finite() { raw.min(max_ms) } else { max_ms };

        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from(ReconnectOptions::default())
    }
}

impl From<ReconnectOptions> for ExponentialBackoff {
    fn from(options: ReconnectOptions) -> Self {
        Self { options }
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.options.max_retries {
            if attempt >= max {
                return None;
            }
        }

        let delay = self.base_delay(attempt);

        let jitter_ms = self.options.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Some(delay);
        }

        let extra = rand::thread_rng().gen_range(0..jitter_ms);
        Some(delay + Duration::from_millis(extra))
    }
}

/// Fixed delay reconnection strategy
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        Some(self.delay)
    }
}
