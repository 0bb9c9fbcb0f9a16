//! Exponential backoff for supervisor restarts.
//!
//! Formula: `base * 2^attempt`, saturating at a one-hour cap so a long
//! outage cannot push the delay into useless territory.

use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Delay before restart attempt `attempt` (0-indexed: the first restart
/// waits `base`, the second `2*base`, then `4*base`, ...).
pub fn restart_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.min(32));
    let millis = (base.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis).min(MAX_BACKOFF)
}
