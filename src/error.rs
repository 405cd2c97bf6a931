use thiserror::Error;

/// Closed set of failure categories used by the retry classifier and the
/// failure governor. Every error that can surface from a worker task is
/// mapped into exactly one of these before it is acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Authorization,
    RateLimit,
    Validation,
    Transformation,
    Filesystem,
    Queue,
    Configuration,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::RateLimit => "rateLimit",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Transformation => "transformation",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Queue => "queue",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// Top-level error type for the queue core. Variants that callers need to
/// branch on (classification, queue invariants) are distinct; everything
/// else collapses into `Other`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("queue invariant violated: {0}")]
    Queue(#[from] QueueError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("recovery failure: {0}")]
    Recovery(String),

    #[error("too many failures: {0}")]
    AbortThreshold(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Maps an error to the process exit code documented for the CLI.
    ///
    /// 0 success, 1 aborted by the failure governor or a non-retryable
    /// error, 2 invalid configuration, 3 corruption unrecoverable with the
    /// current resume options.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Configuration(_) => 2,
            AppError::Recovery(_) => 3,
            AppError::AbortThreshold(_) => 1,
            _ => 1,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("item {0} is not pending")]
    NotPending(String),
    #[error("item {0} is not processing")]
    NotProcessing(String),
    #[error("item {0} is not failed")]
    NotFailed(String),
    #[error("item {0} already present in queue")]
    Duplicate(String),
    #[error("queue is at capacity ({0})")]
    AtCapacity(usize),
    #[error("unknown item {0}")]
    UnknownItem(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write snapshot: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read snapshot: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to (de)serialize snapshot: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("snapshot checksum mismatch: expected {expected}, computed {computed}")]
    Corruption { expected: String, computed: String },
    #[error("no usable snapshot or backup could be loaded")]
    Unrecoverable,
}
