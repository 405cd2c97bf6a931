use crate::error::ErrorCategory;

/// Per-category retry policy: whether the category is retryable at all,
/// the backoff base/multiplier/ceiling, and the maximum number of retries
/// before the item is given up on for good.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retryable: bool,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

/// A matcher tried in order against an error's message/source before
/// falling back to `Unknown`. Ordered so more specific signals (explicit
/// status codes, auth hints) are checked before generic ones.
struct Matcher {
    category: ErrorCategory,
    predicate: fn(&str) -> bool,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// True if any 3-digit token in `s` falls in the 500-599 range, e.g. the
/// `"500 Internal Server Error"` rendering of `ClientError::Http`.
fn is_5xx(s: &str) -> bool {
    s.split(|c: char| !c.is_ascii_digit())
        .filter(|tok| tok.len() == 3)
        .any(|tok| tok.starts_with('5'))
}

static MATCHERS: &[Matcher] = &[
    Matcher {
        category: ErrorCategory::RateLimit,
        predicate: |s| contains_any(s, &["429", "rate limit", "too many requests"]),
    },
    Matcher {
        category: ErrorCategory::Authentication,
        predicate: |s| contains_any(s, &["401", "unauthorized", "invalid credentials"]),
    },
    Matcher {
        category: ErrorCategory::Authorization,
        predicate: |s| contains_any(s, &["403", "forbidden", "access denied"]),
    },
    Matcher {
        category: ErrorCategory::Network,
        predicate: |s| {
            contains_any(
                s,
                &["connection", "timed out", "timeout", "dns", "broken pipe", "reset by peer"],
            ) || is_5xx(s)
        },
    },
    Matcher {
        category: ErrorCategory::Validation,
        predicate: |s| contains_any(s, &["400", "invalid", "malformed", "validation"]),
    },
    Matcher {
        category: ErrorCategory::Transformation,
        predicate: |s| contains_any(s, &["parse", "transform", "markdown", "html"]),
    },
    Matcher {
        category: ErrorCategory::Filesystem,
        predicate: |s| contains_any(s, &["permission denied", "no space", "io error", "filesystem"]),
    },
    Matcher {
        category: ErrorCategory::Queue,
        predicate: |s| contains_any(s, &["queue", "capacity", "invariant"]),
    },
    Matcher {
        category: ErrorCategory::Configuration,
        predicate: |s| contains_any(s, &["config", "missing required", "not configured"]),
    },
];

/// Classifies an error message into one of the closed `ErrorCategory`
/// variants. Rules are evaluated top-to-bottom; the first match wins.
/// Nothing matching falls back to `Unknown`.
pub fn classify(message: &str) -> ErrorCategory {
    MATCHERS
        .iter()
        .find(|m| (m.predicate)(message))
        .map(|m| m.category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// Returns the retry policy for a category. This is the table referenced
/// throughout the retry and failure-governor design: network/rate-limit
/// errors are retried with increasingly patient backoff, validation and
/// configuration errors are never retried (retrying a malformed request
/// just wastes the attempt budget).
pub fn policy_for(category: ErrorCategory) -> RetryPolicy {
    match category {
        ErrorCategory::Network => RetryPolicy {
            retryable: true,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_retries: 5,
        },
        ErrorCategory::RateLimit => RetryPolicy {
            retryable: true,
            base_delay_ms: 60_000,
            multiplier: 2.0,
            max_delay_ms: 600_000,
            max_retries: 10,
        },
        ErrorCategory::Authentication => RetryPolicy {
            retryable: false,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            max_retries: 0,
        },
        ErrorCategory::Authorization => RetryPolicy {
            retryable: false,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            max_retries: 0,
        },
        ErrorCategory::Validation => RetryPolicy {
            retryable: false,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            max_retries: 0,
        },
        ErrorCategory::Transformation => RetryPolicy {
            retryable: true,
            base_delay_ms: 250,
            multiplier: 1.5,
            max_delay_ms: 5_000,
            max_retries: 2,
        },
        ErrorCategory::Filesystem => RetryPolicy {
            retryable: true,
            base_delay_ms: 250,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            max_retries: 3,
        },
        ErrorCategory::Queue => RetryPolicy {
            retryable: true,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 2_000,
            max_retries: 3,
        },
        ErrorCategory::Configuration => RetryPolicy {
            retryable: false,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            max_retries: 0,
        },
        ErrorCategory::Unknown => RetryPolicy {
            retryable: true,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 15_000,
            max_retries: 3,
        },
    }
}
