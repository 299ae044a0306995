//! Backoff schedule for unconfirmed sends.
//!
//! Stateless, like the rest of the retry helpers: all logic lives in
//! associated functions that take the policy as a parameter. Only the sender
//! of an unconfirmed message retries; confirmation waits are governed by
//! their deadline alone.

use std::time::Duration;

use framebus_types::config::RetryPolicy;

/// Upper bound on any single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(30);

pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` failed.
    ///
    /// `attempt` is 1-based (first post is attempt 1).
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Delay to wait after failed attempt `attempt` before the next one:
    /// `base_delay * backoff_factor^(attempt - 1)`, capped at 30s.
    pub fn delay_after(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = policy.base_delay_ms as f64 * policy.backoff_factor.powi(exponent);
        if !millis.is_finite() || millis >= MAX_DELAY.as_millis() as f64 {
            return MAX_DELAY;
        }
        Duration::from_millis(millis.max(0.0) as u64)
    }
}
