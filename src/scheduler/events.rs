use crate::domain::QueueMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The queue ran to completion: every item is `Completed` or `Failed`.
    Drained,
    /// Cancellation was requested before the queue drained; in-flight work
    /// was allowed to finish and a final snapshot was written.
    Cancelled,
    /// The `--limit` cap on terminal items was reached with pending work
    /// still remaining; a resume picks the rest back up.
    LimitReached,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub metrics: QueueMetrics,
}
