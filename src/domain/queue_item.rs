use serde::{Deserialize, Serialize};

/// How an item entered the queue. Drives discovery-rule suppression and is
/// reported in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    /// One of the run's initial seed pages.
    Initial,
    /// Discovered via a child-listing or page-include macro.
    Macro,
    /// Discovered via an internal page link.
    Reference,
    /// Discovered via a user mention / @mention / profile URL.
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A single unit of work: one wiki page (or synthetic `user:<name>` item)
/// waiting to be fetched, transformed, and written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub page_id: String,
    pub title: String,
    pub source_type: SourceType,
    pub status: QueueItemStatus,
    #[serde(default)]
    pub attempts: u32,
    pub discovered_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl QueueItem {
    pub fn new_pending(page_id: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        QueueItem {
            page_id: page_id.into(),
            title: title.into(),
            source_type,
            status: QueueItemStatus::Pending,
            attempts: 0,
            discovered_at: chrono::Utc::now(),
            last_error: None,
            parent_id: None,
            next_attempt_at: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Running counters over the lifetime of a queue. Updated in the same
/// critical section as the state transition that changes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub added: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub deduplicated: u64,
}
