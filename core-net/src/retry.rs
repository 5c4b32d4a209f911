//! Retry policy: exponential backoff with jitter.
//!
//! The policy only computes delays and classifies errors; the queue owns
//! the retry budget bookkeeping and the coordinator owns scheduling.

use bridge_traits::TransportError;
use rand::Rng;
use std::time::Duration;

/// Default base delay between attempts.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);
/// Default cap on the exponential delay.
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(30);
/// Default retry budget for ordinary operations.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default retry budget for payment-class operations.
pub const DEFAULT_PAYMENT_MAX_RETRIES: u32 = 1;

/// Exponential backoff with full jitter over the base delay.
///
/// `delay(attempt) = min(cap, base * 2^attempt) + jitter(0, base)`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_retries: u32,
    payment_max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, max_retries: u32, payment_max_retries: u32) -> Self {
        Self {
            base,
            cap,
            max_retries,
            payment_max_retries,
        }
    }

    /// Retry budget for an operation class.
    pub fn max_retries_for(&self, payment_class: bool) -> u32 {
        if payment_class {
            self.payment_max_retries
        } else {
            self.max_retries
        }
    }

    /// Backoff delay before retry number `attempt` (0-based).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;

        let exponential_ms = 2u64
            .checked_pow(attempt)
            .and_then(|factor| base_ms.checked_mul(factor))
            .unwrap_or(cap_ms)
            .min(cap_ms);

        let jitter_ms = if base_ms > 0 {
            rand::thread_rng().gen_range(0..base_ms)
        } else {
            0
        };

        Duration::from_millis(exponential_ms + jitter_ms)
    }

    /// Delay before retrying after `error`, or `None` when the error is
    /// not retryable. A server `Retry-After` hint takes precedence over
    /// the computed backoff.
    pub fn delay_for(&self, error: &TransportError, attempt: u32) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        if let Some(hint) = error.retry_after() {
            return Some(hint);
        }
        Some(self.compute_delay(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETRY_BASE,
            DEFAULT_RETRY_CAP,
            DEFAULT_MAX_RETRIES,
            DEFAULT_PAYMENT_MAX_RETRIES,
        )
    }
}
