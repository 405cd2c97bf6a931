mod backoff;
mod classifier;

pub use backoff::compute_delay_ms;
pub use classifier::{classify, policy_for, RetryPolicy};
