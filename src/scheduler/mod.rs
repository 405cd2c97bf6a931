mod events;

pub use events::{RunOutcome, RunSummary};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::{AttachmentRef, ClientError, UserCache, UserInfo, WikiClient};
use crate::diff::{self, RemotePageRef};
use crate::discovery::{self, DiscoveryConfig, DiscoveryContext};
use crate::domain::{
    FetchedPage, ManifestEntry, ManifestEntryStatus, ManifestProcessingStatus, QueueItem,
    QueueItemStatus, SourceType, TransformedPage,
};
use crate::error::{AppError, ErrorCategory};
use crate::fs_util;
use crate::governor::FailureGovernor;
use crate::manifest_store::ManifestStore;
use crate::queue::{AddOutcome, QueueState, SnapshotStore};
use crate::retry;
use crate::transform::Transformer;

/// Tunables that shape the scheduler's admission and checkpoint policy.
/// Distinct from the retry/backoff table (`crate::retry`), which governs a
/// single item's delay, not how many items run at once.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    /// Hard cap on the number of discovery phases (one phase = a drain of
    /// everything pending at phase start) a run will advance through.
    pub discovery_phase_cap: usize,
    pub persistence_threshold: u32,
    /// Force a snapshot even if `persistence_threshold` mutations haven't
    /// accumulated, once this many milliseconds have elapsed since the last
    /// one.
    pub checkpoint_interval_ms: u64,
    /// Stop admitting new dispatches once this many items have reached a
    /// terminal state (completed or failed) this run. `None` disables the
    /// cap; in-flight work is still allowed to finish.
    pub limit: Option<usize>,
    /// Treat every page as `Modified` regardless of what the manifest diff
    /// says, forcing a full re-export.
    pub force_full: bool,
}

/// Cooperative cancellation handle: `CancellationFlag::trigger` can be
/// called from a signal handler or another task; the scheduler observes it
/// between dispatch rounds, finishes in-flight work, and force-snapshots
/// before returning.
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        CancellationFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum WorkOutcome {
    Completed {
        id: String,
        page: FetchedPage,
        transformed: TransformedPage,
        discovered: Vec<QueueItem>,
        attachments_total: u32,
        attachments_failed: u32,
    },
    Failed {
        id: String,
        error: ClientError,
    },
    /// A synthetic `user:<name>` item resolved through `WikiClient::fetch_user`
    /// instead of the page-fetch path. Carries no page content, so it never
    /// touches the manifest or discovery.
    UserCompleted {
        id: String,
        user: UserInfo,
    },
    UserFailed {
        id: String,
        error: ClientError,
    },
}

/// Fetches and writes every attachment on a page, returning the total
/// attempted and how many failed. Failures are logged and otherwise
/// tolerated here; the failure governor decides whether the accumulated
/// rate crosses an abort threshold.
async fn fetch_attachments(
    client: &dyn WikiClient,
    page_id: &str,
    output_dir: &PathBuf,
) -> (u32, u32) {
    let attachments: Vec<AttachmentRef> = match client.list_attachments(page_id).await {
        Ok(attachments) => attachments,
        Err(error) => {
            debug!(page_id, error = %error, "could not list attachments for page");
            return (0, 0);
        }
    };
    let total = attachments.len() as u32;
    let mut failed = 0u32;
    for attachment in &attachments {
        let write_result = match client.download_attachment(attachment).await {
            Ok(bytes) => {
                let rel_path = format!("attachments/{page_id}/{}", attachment.file_name);
                fs_util::atomic_write(&output_dir.join(&rel_path), &bytes)
            }
            Err(error) => {
                warn!(page_id, attachment = %attachment.id, error = %error, "attachment download failed");
                failed += 1;
                continue;
            }
        };
        if let Err(error) = write_result {
            warn!(page_id, attachment = %attachment.id, error = %error, "attachment write failed");
            failed += 1;
        }
    }
    (total, failed)
}

/// Drives the queue to completion: dequeues pending items up to
/// `max_concurrency` at a time, fetches and transforms each on its own
/// task, applies the result back to the single in-process `QueueState`
/// (the scheduler is this state's only mutator — no lock is needed because
/// nothing else ever touches it concurrently), runs discovered items back
/// through the same queue, and checkpoints via `SnapshotStore` on a
/// mutation-count threshold.
pub struct Scheduler {
    client: Arc<dyn WikiClient>,
    transformer: Arc<dyn Transformer>,
    discovery_config: DiscoveryConfig,
    discovery_context: DiscoveryContext,
    config: SchedulerConfig,
    snapshot_store: SnapshotStore,
    manifest_store: ManifestStore,
    output_dir: PathBuf,
    user_cache: Arc<UserCache>,
}

impl Scheduler {
    pub fn new(
        client: Arc<dyn WikiClient>,
        transformer: Arc<dyn Transformer>,
        discovery_config: DiscoveryConfig,
        discovery_context: DiscoveryContext,
        config: SchedulerConfig,
        snapshot_store: SnapshotStore,
        manifest_store: ManifestStore,
        output_dir: PathBuf,
    ) -> Self {
        Scheduler {
            client,
            transformer,
            discovery_config,
            discovery_context,
            config,
            snapshot_store,
            manifest_store,
            output_dir,
            user_cache: Arc::new(UserCache::new()),
        }
    }

    pub async fn run(
        &self,
        mut state: QueueState,
        mut governor: FailureGovernor,
        cancellation: CancellationFlag,
    ) -> Result<RunSummary, AppError> {
        let prior_manifest = self.manifest_store.load().map_err(AppError::from)?;
        let mut manifest = prior_manifest.clone();
        let prior_by_id = prior_manifest.by_id();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut in_flight: JoinSet<WorkOutcome> = JoinSet::new();
        let mut mutations_since_checkpoint: u32 = 0;
        let mut last_checkpoint_at = std::time::Instant::now();
        let mut cancelled = false;

        // Phase 1's frontier is whatever the queue already holds (the
        // initial seeds, or a resumed run's leftovers); discoveries made
        // while draining it accumulate in `pending_next_phase` rather than
        // being admitted immediately, so the phase cap below gates real
        // phase boundaries instead of a live pending-item count.
        let mut discovery_phase: usize = 1;
        let mut phase_frontier: HashSet<String> = state.items.keys().cloned().collect();
        let mut pending_next_phase: Vec<QueueItem> = Vec::new();

        loop {
            if cancellation.is_triggered() {
                cancelled = true;
                break;
            }

            if let Some(reason) = governor.should_abort() {
                self.checkpoint(&state, &mut mutations_since_checkpoint, true)?;
                self.manifest_store.save(&manifest).map_err(AppError::from)?;
                return Err(AppError::AbortThreshold(reason));
            }

            let phase_drained = phase_frontier.iter().all(|id| {
                state
                    .items
                    .get(id)
                    .map(|item| matches!(item.status, QueueItemStatus::Completed | QueueItemStatus::Failed))
                    .unwrap_or(true)
            });
            if phase_drained && !pending_next_phase.is_empty() {
                if discovery_phase < self.config.discovery_phase_cap {
                    discovery_phase += 1;
                    let mut next_frontier = HashSet::new();
                    for item in pending_next_phase.drain(..) {
                        let page_id = item.page_id.clone();
                        match state.add(item) {
                            Ok(AddOutcome::Added) => {
                                next_frontier.insert(page_id);
                            }
                            Ok(_) => {}
                            Err(crate::error::QueueError::AtCapacity(max)) => {
                                warn!(max, "queue at capacity, dropping further discoveries");
                                break;
                            }
                            Err(e) => debug!(error = %e, "discovery item not added"),
                        }
                    }
                    phase_frontier = next_frontier;
                } else {
                    debug!(
                        discovery_phase,
                        cap = self.config.discovery_phase_cap,
                        dropped = pending_next_phase.len(),
                        "discovery phase cap reached, dropping buffered discoveries"
                    );
                    pending_next_phase.clear();
                }
            }

            let limit_reached = self
                .config
                .limit
                .map(|limit| (state.metrics.completed + state.metrics.failed) as usize >= limit)
                .unwrap_or(false);

            let mut dispatched_any = false;
            while !limit_reached {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else { break };
                let now = chrono::Utc::now();
                let Some(id) = state.next(now) else { break };
                dispatched_any = true;
                let source_type = state.get(&id).map(|item| item.source_type);
                let client = Arc::clone(&self.client);

                if source_type == Some(SourceType::User) {
                    // Synthetic user-mention items never carry page content;
                    // resolve them through the single-flight user cache
                    // instead of the page-fetch path.
                    let user_cache = Arc::clone(&self.user_cache);
                    let username = id.strip_prefix("user:").unwrap_or(&id).to_string();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        match user_cache.fetch(client.as_ref(), &username).await {
                            Ok(user) => WorkOutcome::UserCompleted { id, user },
                            Err(error) => WorkOutcome::UserFailed { id, error },
                        }
                    });
                    continue;
                }

                let transformer = Arc::clone(&self.transformer);
                let discovery_config = self.discovery_config.clone();
                let discovery_context = self.discovery_context.clone();
                let output_dir = self.output_dir.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    match client.fetch_page(&id).await {
                        Ok(page) => {
                            let transformed = transformer.transform(&page);
                            let discovered =
                                discovery::extract(&page, &discovery_config, &discovery_context, client.as_ref())
                                    .await;
                            let (attachments_total, attachments_failed) =
                                fetch_attachments(client.as_ref(), &id, &output_dir).await;
                            WorkOutcome::Completed {
                                id,
                                page,
                                transformed,
                                discovered,
                                attachments_total,
                                attachments_failed,
                            }
                        }
                        Err(error) => WorkOutcome::Failed { id, error },
                    }
                });
            }

            if !dispatched_any && in_flight.is_empty() {
                if (state.is_drained() && pending_next_phase.is_empty()) || state.items.is_empty() || limit_reached {
                    break;
                }
                // Everything eligible is either backoff-delayed or capped
                // by discovery admission; wait briefly instead of busy
                // looping.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            }

            let Some(joined) = in_flight.join_next().await else {
                continue;
            };
            let outcome = joined.map_err(|e| AppError::Other(anyhow::anyhow!("worker task panicked: {e}")))?;
            mutations_since_checkpoint += 1;

            match outcome {
                WorkOutcome::Completed {
                    id,
                    page,
                    transformed,
                    discovered,
                    attachments_total,
                    attachments_failed,
                } => {
                    state
                        .mark_completed(&id)
                        .map_err(AppError::from)?;

                    let remote = RemotePageRef {
                        id: id.clone(),
                        version: page.version,
                        hash: Some(transformed.content_hash.clone()),
                    };
                    let status = diff::classify_page(&remote, &prior_by_id, self.config.force_full);
                    let path = prior_by_id
                        .get(id.as_str())
                        .filter(|_| status == ManifestEntryStatus::Unchanged)
                        .map(|entry| entry.path.clone())
                        .unwrap_or_else(|| format!("{id}.md"));

                    if status != ManifestEntryStatus::Unchanged {
                        let full_path = self.output_dir.join(&path);
                        fs_util::atomic_write(&full_path, transformed.markdown.as_bytes())
                            .map_err(AppError::from)?;
                    }
                    // The manifest's persisted status records processing
                    // outcome (exported/skipped/failed), not the diff
                    // classification that decided whether to write a file.
                    let processing_status = if status == ManifestEntryStatus::Unchanged {
                        ManifestProcessingStatus::Skipped
                    } else {
                        ManifestProcessingStatus::Exported
                    };
                    manifest.upsert(ManifestEntry {
                        id: id.clone(),
                        title: page.title.clone(),
                        path,
                        hash: transformed.content_hash,
                        version: page.version,
                        status: processing_status,
                        parent_id: page.parent_id.clone(),
                    });
                    governor.record_discovered(1);
                    governor.record_total_attachments(attachments_total);
                    for _ in 0..attachments_failed {
                        governor.record_attachment_failure();
                    }

                    // Unchanged pages contribute nothing new: their links
                    // were already walked the run that produced the
                    // manifest entry, so there is nothing further to
                    // discover from them.
                    if status != ManifestEntryStatus::Unchanged {
                        pending_next_phase.extend(discovered);
                    }
                }
                WorkOutcome::Failed { id, error } => {
                    let message = error.classification_message();
                    state.mark_failed(&id, message.clone()).map_err(AppError::from)?;
                    let category = retry::classify(&message);
                    let policy = retry::policy_for(category);
                    let attempts = state.get(&id).map(|i| i.attempts).unwrap_or(0);
                    if policy.retryable && attempts < policy.max_retries {
                        let delay_ms = retry::compute_delay_ms(&policy, attempts, error.retry_after_ms());
                        let next_attempt = chrono::Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
                        state.retry(&id, Some(next_attempt)).map_err(AppError::from)?;
                    } else {
                        // Give-up, not a transient failure about to be
                        // retried: this is the point C9 gets notified, per
                        // the "otherwise markFailed(id) and notify C9" step.
                        if category == ErrorCategory::Authorization {
                            governor.record_restricted_page();
                        } else {
                            governor.record_page_failure();
                        }
                        warn!(id, category = category.as_str(), "giving up on item after exhausting retries");
                        let prior_entry = prior_by_id.get(id.as_str());
                        manifest.upsert(ManifestEntry {
                            id: id.clone(),
                            title: prior_entry.map(|e| e.title.clone()).unwrap_or_else(|| id.clone()),
                            path: prior_entry
                                .map(|e| e.path.clone())
                                .unwrap_or_else(|| format!("{id}.md")),
                            hash: prior_entry.map(|e| e.hash.clone()).unwrap_or_default(),
                            version: prior_entry.map(|e| e.version).unwrap_or(0),
                            status: ManifestProcessingStatus::Failed,
                            parent_id: prior_entry.and_then(|e| e.parent_id.clone()),
                        });
                    }
                }
                WorkOutcome::UserCompleted { id, user } => {
                    state.mark_completed(&id).map_err(AppError::from)?;
                    debug!(id, display_name = %user.display_name, "resolved user reference");
                }
                WorkOutcome::UserFailed { id, error } => {
                    // User-mention items are metadata, not pages; a failure
                    // here never counts against the failure governor's page
                    // tally (spec.md §4.9's thresholds govern pages and
                    // attachments, not synthetic user references).
                    let message = error.classification_message();
                    state.mark_failed(&id, message.clone()).map_err(AppError::from)?;
                    let category = retry::classify(&message);
                    let policy = retry::policy_for(category);
                    let attempts = state.get(&id).map(|i| i.attempts).unwrap_or(0);
                    if policy.retryable && attempts < policy.max_retries {
                        let delay_ms = retry::compute_delay_ms(&policy, attempts, error.retry_after_ms());
                        let next_attempt = chrono::Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
                        state.retry(&id, Some(next_attempt)).map_err(AppError::from)?;
                    } else {
                        warn!(id, category = category.as_str(), "giving up on user reference after exhausting retries");
                    }
                }
            }

            let elapsed_since_checkpoint = last_checkpoint_at.elapsed().as_millis() as u64;
            if mutations_since_checkpoint >= self.config.persistence_threshold
                || elapsed_since_checkpoint >= self.config.checkpoint_interval_ms
            {
                self.checkpoint(&state, &mut mutations_since_checkpoint, true)?;
                last_checkpoint_at = std::time::Instant::now();
            }
        }

        if cancelled {
            // Drain whatever was already in flight before checkpointing so
            // the snapshot reflects real terminal states, not phantom
            // in-progress items.
            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok(WorkOutcome::Completed { id, .. }) | Ok(WorkOutcome::UserCompleted { id, .. }) => {
                        let _ = state.mark_completed(&id);
                    }
                    Ok(WorkOutcome::Failed { id, error }) | Ok(WorkOutcome::UserFailed { id, error }) => {
                        let _ = state.mark_failed(&id, error.classification_message());
                    }
                    Err(_) => {}
                }
            }
            info!("cancellation requested, force-checkpointing and stopping");
        }

        self.checkpoint(&state, &mut mutations_since_checkpoint, true)?;
        self.manifest_store.save(&manifest).map_err(AppError::from)?;

        let limit_left_work_pending = self
            .config
            .limit
            .map(|limit| (state.metrics.completed + state.metrics.failed) as usize >= limit)
            .unwrap_or(false)
            && !state.is_drained();
        let outcome = if cancelled {
            RunOutcome::Cancelled
        } else if limit_left_work_pending {
            RunOutcome::LimitReached
        } else {
            RunOutcome::Drained
        };

        Ok(RunSummary {
            outcome,
            metrics: state.metrics.clone(),
        })
    }

    fn checkpoint(
        &self,
        state: &QueueState,
        mutations_since_checkpoint: &mut u32,
        force: bool,
    ) -> Result<(), AppError> {
        if !force && *mutations_since_checkpoint == 0 {
            return Ok(());
        }
        self.snapshot_store.save(state).map_err(AppError::from)?;
        *mutations_since_checkpoint = 0;
        Ok(())
    }
}
