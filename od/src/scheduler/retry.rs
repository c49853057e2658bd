//! Backoff delay computation
//!
//! Exponential backoff with uniform jitter. The floor is the base delay:
//! jitter may stretch a delay but never shrink it below base.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before the given attempt (1-based: the delay after the first
/// failure uses `attempt = 1`)
pub fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let base_ms = retry.base_delay_seconds.saturating_mul(1000);
    let exp = retry.factor.powi(attempt.saturating_sub(1) as i32);
    let jitter = if retry.jitter > 0.0 {
        rand::rng().random_range((1.0 - retry.jitter)..=(1.0 + retry.jitter))
    } else {
        1.0
    };
    let ms = (base_ms as f64 * exp * jitter).round() as u64;
    Duration::from_millis(ms.max(base_ms))
}
