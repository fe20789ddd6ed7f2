//! Randomized exponential backoff for dead-proxy re-checks.
//!
//! Dead proxies are retried after an exponentially growing, fully jittered
//! delay: a uniform random value in `[0, min(cap, base * 2^attempt)]`.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff bound: `min(cap, base * 2^attempt)`.
pub fn exp_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    // 2^1024 overflows f64; past that exponent the cap always wins.
    let factor = 2f64.powi(attempt.min(1023) as i32);
    let bound = (base.as_secs_f64() * factor).min(cap.as_secs_f64());
    Duration::from_secs_f64(bound)
}

/// Exponential backoff with full jitter, drawn from the process-wide RNG.
pub fn exp_backoff_full_jitter(attempt: u32, base: Duration, cap: Duration) -> Duration {
    exp_backoff_full_jitter_with(attempt, base, cap, &mut rand::thread_rng())
}

/// Exponential backoff with full jitter, drawn from a caller-supplied RNG.
///
/// Deterministic given a seeded `rng`.
pub fn exp_backoff_full_jitter_with<R: Rng + ?Sized>(
    attempt: u32,
    base: Duration,
    cap: Duration,
    rng: &mut R,
) -> Duration {
    let bound = exp_backoff(attempt, base, cap).as_secs_f64();
    Duration::from_secs_f64(rng.gen_range(0.0..=bound))
}

/// Closure form consumed by the registry: `attempt -> jittered delay`.
pub fn full_jitter(base: Duration, cap: Duration) -> impl Fn(u32) -> Duration + Send + Sync {
    move |attempt| exp_backoff_full_jitter(attempt, base, cap)
}
