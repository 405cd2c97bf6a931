use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::domain::{QueueItem, QueueItemStatus, QueueMetrics};
use crate::error::QueueError;

/// In-memory queue state: the authoritative record of every item this run
/// knows about, its processing order, and the set of pages already fully
/// processed (for dedup-by-pageId).
///
/// Every mutating method below updates `metrics` in the same call as the
/// state change it reports on, so there is never a window where the two
/// disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub items: HashMap<String, QueueItem>,
    pub processing_order: VecDeque<String>,
    pub processed_pages: HashSet<String>,
    pub metrics: QueueMetrics,
    pub max_queue_size: usize,
}

/// Outcome of an `add` call, distinguishing a genuinely new item from a
/// deduplicated no-op so callers (the scheduler, discovery extractor) can
/// decide whether to keep recursing into that page's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyProcessed,
    AlreadyQueued,
}

impl QueueState {
    pub fn new(max_queue_size: usize) -> Self {
        QueueState {
            items: HashMap::new(),
            processing_order: VecDeque::new(),
            processed_pages: HashSet::new(),
            metrics: QueueMetrics::default(),
            max_queue_size,
        }
    }

    /// Adds `item` to the queue, deduplicating by `page_id`. Pages already
    /// fully processed this run, or already present in any state, are not
    /// re-added; the scheduler still recurses into their already-known
    /// children via the existing item, not a fresh one.
    pub fn add(&mut self, item: QueueItem) -> Result<AddOutcome, QueueError> {
        if self.processed_pages.contains(&item.page_id) {
            self.metrics.deduplicated += 1;
            return Ok(AddOutcome::AlreadyProcessed);
        }
        if self.items.contains_key(&item.page_id) {
            self.metrics.deduplicated += 1;
            return Ok(AddOutcome::AlreadyQueued);
        }
        // The bound caps queue growth (pending + processing work), not the
        // lifetime total of items this run has ever seen; a page that has
        // already completed or failed frees its slot.
        let active = self
            .items
            .values()
            .filter(|i| matches!(i.status, QueueItemStatus::Pending | QueueItemStatus::Processing))
            .count();
        if active >= self.max_queue_size {
            return Err(QueueError::AtCapacity(self.max_queue_size));
        }
        self.processing_order.push_back(item.page_id.clone());
        self.items.insert(item.page_id.clone(), item);
        self.metrics.added += 1;
        Ok(AddOutcome::Added)
    }

    /// Pops the next pending item in FIFO order and marks it processing.
    /// Items whose `next_attempt_at` is still in the future (a retry
    /// backoff in progress) are skipped over, not popped.
    pub fn next(&mut self, now: chrono::DateTime<chrono::Utc>) -> Option<String> {
        let index = self.processing_order.iter().position(|id| {
            self.items
                .get(id)
                .map(|item| {
                    item.status == QueueItemStatus::Pending
                        && item.next_attempt_at.map(|t| t <= now).unwrap_or(true)
                })
                .unwrap_or(false)
        })?;
        let id = if index == 0 {
            self.processing_order.pop_front()?
        } else {
            self.processing_order.remove(index)?
        };
        if let Some(item) = self.items.get_mut(&id) {
            item.status = QueueItemStatus::Processing;
        }
        Some(id)
    }

    pub fn mark_processing(&mut self, page_id: &str) -> Result<(), QueueError> {
        let item = self.get_mut(page_id)?;
        if item.status != QueueItemStatus::Pending {
            return Err(QueueError::NotPending(page_id.to_string()));
        }
        item.status = QueueItemStatus::Processing;
        Ok(())
    }

    pub fn mark_completed(&mut self, page_id: &str) -> Result<(), QueueError> {
        let item = self.get_mut(page_id)?;
        if item.status != QueueItemStatus::Processing {
            return Err(QueueError::NotProcessing(page_id.to_string()));
        }
        item.status = QueueItemStatus::Completed;
        item.last_error = None;
        self.processed_pages.insert(page_id.to_string());
        self.metrics.completed += 1;
        Ok(())
    }

    /// Marks a processing item failed. Does not touch `attempts` — a
    /// terminal failure that is never retried (auth, authorization,
    /// validation) must leave `retryCount` at 0; only `retry` increments it.
    pub fn mark_failed(&mut self, page_id: &str, error: impl Into<String>) -> Result<(), QueueError> {
        let item = self.get_mut(page_id)?;
        if item.status != QueueItemStatus::Processing {
            return Err(QueueError::NotProcessing(page_id.to_string()));
        }
        item.status = QueueItemStatus::Failed;
        item.last_error = Some(error.into());
        self.metrics.failed += 1;
        Ok(())
    }

    /// Returns a failed item to `Pending` so the scheduler can re-submit it,
    /// optionally after `next_attempt_at` (the backoff delay computed by
    /// the retry policy). This is the only place `attempts` increases.
    pub fn retry(
        &mut self,
        page_id: &str,
        next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), QueueError> {
        let item = self.get_mut(page_id)?;
        if item.status != QueueItemStatus::Failed {
            return Err(QueueError::NotFailed(page_id.to_string()));
        }
        item.status = QueueItemStatus::Pending;
        item.next_attempt_at = next_attempt_at;
        item.attempts += 1;
        self.processing_order.push_back(page_id.to_string());
        self.metrics.retried += 1;
        Ok(())
    }

    pub fn get(&self, page_id: &str) -> Option<&QueueItem> {
        self.items.get(page_id)
    }

    fn get_mut(&mut self, page_id: &str) -> Result<&mut QueueItem, QueueError> {
        self.items
            .get_mut(page_id)
            .ok_or_else(|| QueueError::UnknownItem(page_id.to_string()))
    }

    pub fn is_drained(&self) -> bool {
        self.items
            .values()
            .all(|i| matches!(i.status, QueueItemStatus::Completed | QueueItemStatus::Failed))
    }

    /// Repairs invariants that could have drifted after a crash or a bug:
    /// drops processing-order entries that no longer name a live pending
    /// item, and re-adds any pending item missing from the order (kept
    /// within a tolerance of one entry before acting, matching the
    /// self-healing behavior this is grounded on).
    pub fn repair_invariants(&mut self) {
        let mut seen = HashSet::new();
        self.processing_order.retain(|id| {
            let keep = self
                .items
                .get(id)
                .map(|i| i.status == QueueItemStatus::Pending)
                .unwrap_or(false)
                && seen.insert(id.clone());
            keep
        });
        let missing: Vec<String> = self
            .items
            .iter()
            .filter(|(id, item)| item.status == QueueItemStatus::Pending && !seen.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in missing {
            self.processing_order.push_back(id);
        }
    }

    /// Produces a canonical byte representation used for checksumming: map
    /// keys sorted, arrays left in insertion order, independent of the
    /// `HashMap`'s actual iteration order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut ids: Vec<&String> = self.items.keys().collect();
        ids.sort();
        let ordered_items: Vec<&QueueItem> = ids.iter().map(|id| &self.items[*id]).collect();
        let mut processed: Vec<&String> = self.processed_pages.iter().collect();
        processed.sort();

        #[derive(Serialize)]
        struct Canonical<'a> {
            items: Vec<&'a QueueItem>,
            processing_order: &'a VecDeque<String>,
            processed_pages: Vec<&'a String>,
            metrics: &'a QueueMetrics,
            max_queue_size: usize,
        }
        serde_json::to_vec(&Canonical {
            items: ordered_items,
            processing_order: &self.processing_order,
            processed_pages: processed,
            metrics: &self.metrics,
            max_queue_size: self.max_queue_size,
        })
        .expect("canonical serialization of in-memory state cannot fail")
    }
}
