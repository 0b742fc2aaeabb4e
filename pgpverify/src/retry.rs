use std::time::Duration;

use rand::Rng;

const MAX_SHIFT: u32 = 10;

/// Exponential backoff with jitter for retrying a key-server endpoint.
///
/// `attempt` is zero-based. The delay is `base * 2^attempt`, scaled by a random
/// factor in [0.5, 1.5] so that concurrent fetches do not retry in lockstep.
pub fn backoff(base: Duration, attempt: u32) -> Duration {
    let scaled = base
        .as_millis()
        .max(1)
        .saturating_mul(1u128 << attempt.min(MAX_SHIFT));
    let millis = u64::try_from(scaled).unwrap_or(u64::MAX);
    let jitter: f64 = rand::rng().random_range(0.5..=1.5);
    let jittered = (millis as f64 * jitter).round().clamp(1.0, u64::MAX as f64);
    Duration::from_millis(jittered as u64)
}
