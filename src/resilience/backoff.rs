use rand::Rng;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);
pub const MAX_JITTER_MS: u64 = 1_000;

fn as_millis_u64(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

/// `min(base * 2^attempt + jitter, 30s)`.
pub fn backoff_with_jitter(base: Duration, attempt: u32, jitter: Duration) -> Duration {
    let multiplier = 1_u64 << attempt.min(32);
    let delay_ms = as_millis_u64(base)
        .saturating_mul(multiplier)
        .saturating_add(as_millis_u64(jitter));
    Duration::from_millis(delay_ms.min(as_millis_u64(MAX_BACKOFF)))
}

/// Exponential backoff with up to one second of uniform jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    backoff_with_jitter(base, attempt, Duration::from_millis(jitter_ms))
}
