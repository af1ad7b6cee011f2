//! Retry timing as plain functions, so the schedule can be checked without
//! running any timers.

use std::time::Duration;

/// Delay before the next reconnect cycle: double the previous one, capped.
pub fn next_backoff(prior: Duration, max: Duration) -> Duration {
    prior.saturating_mul(2).min(max)
}

/// Pause after connect attempt number `failed_attempt` (1-based) failed.
pub fn connect_retry_delay(step: Duration, failed_attempt: u32) -> Duration {
    step.saturating_mul(failed_attempt)
}
