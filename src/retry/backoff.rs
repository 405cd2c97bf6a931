use rand::Rng;

use super::classifier::RetryPolicy;

/// Computes the delay before the next attempt: exponential backoff capped
/// at the policy's ceiling, with up to 20% jitter added so that a burst of
/// items failing together does not retry in lockstep. When the server
/// supplied a `Retry-After` hint, the delay is the larger of the hint and
/// the computed backoff, never smaller.
pub fn compute_delay_ms(policy: &RetryPolicy, attempt: u32, retry_after_hint_ms: Option<u64>) -> u64 {
    let exponent = attempt.min(32);
    let raw = policy.base_delay_ms as f64 * policy.multiplier.powi(exponent as i32);
    let capped = raw.min(policy.max_delay_ms as f64);
    let jitter_fraction = rand::thread_rng().gen_range(0.0..0.2);
    let with_jitter = capped + capped * jitter_fraction;
    let computed = with_jitter.round() as u64;
    match retry_after_hint_ms {
        Some(hint) => computed.max(hint),
        None => computed,
    }
}
