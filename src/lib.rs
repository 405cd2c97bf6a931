pub mod client;
pub mod config;
pub mod diff;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod governor;
pub mod logging;
pub mod manifest_store;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod transform;

use std::sync::Arc;

use crate::client::{ReqwestWikiClient, WikiClient};
use crate::config::ExportArgs;
use crate::domain::{QueueItem, SourceType};
use crate::error::AppError;
use crate::governor::FailureGovernor;
use crate::manifest_store::ManifestStore;
use crate::queue::SnapshotStore;
use crate::scheduler::{CancellationFlag, RunSummary, Scheduler, SchedulerConfig};
use crate::transform::PlainTextTransformer;

/// Wires together the queue core components and runs a single export,
/// exactly as `main.rs`'s `export` subcommand does. Exposed as a library
/// function so integration tests can exercise the whole pipeline against a
/// `MockWikiClient` without going through the CLI.
pub async fn run_export(
    args: &ExportArgs,
    client: Arc<dyn WikiClient>,
    seed_pages: Vec<(String, String)>,
    cancellation: CancellationFlag,
) -> Result<RunSummary, AppError> {
    std::fs::create_dir_all(&args.output_dir)
        .map_err(|e| AppError::Configuration(format!("cannot create output dir: {e}")))?;

    let snapshot_store = SnapshotStore::new(args.snapshot_path(), args.backup_retention);
    let manifest_store = ManifestStore::new(args.manifest_path());

    let recovery::RecoveryOutcome { mut state, items_lost } =
        recovery::recover(&snapshot_store, &args.resume_options())?;
    if items_lost > 0 {
        tracing::warn!(items_lost, "corruption recovery restored fewer items than the prior snapshot held");
    }
    if state.items.is_empty() {
        state.max_queue_size = args.max_queue_size;
        for (id, title) in seed_pages {
            state
                .add(QueueItem::new_pending(id, title, SourceType::Initial))
                .map_err(AppError::from)?;
        }
    }

    let governor = FailureGovernor::new(args.failure_thresholds());
    let discovery_context = discovery::DiscoveryContext {
        space_key: args.space.clone(),
        base_url: args.base_url.clone(),
    };
    let scheduler = Scheduler::new(
        client,
        Arc::new(PlainTextTransformer),
        discovery::DiscoveryConfig::default(),
        discovery_context,
        SchedulerConfig {
            max_concurrency: args.max_concurrency,
            discovery_phase_cap: args.discovery_phase_cap,
            persistence_threshold: args.persistence_threshold,
            checkpoint_interval_ms: args.checkpoint_interval_ms,
            limit: args.limit,
            force_full: args.force_full,
        },
        snapshot_store,
        manifest_store,
        args.output_dir.clone(),
    );

    scheduler.run(state, governor, cancellation).await
}

/// Constructs the production `WikiClient` for a given set of CLI args.
pub fn build_wiki_client(args: &ExportArgs) -> Result<Arc<dyn WikiClient>, AppError> {
    let client = ReqwestWikiClient::new(args.base_url.clone(), args.api_token.clone())
        .map_err(|e| AppError::Configuration(e.to_string()))?;
    Ok(Arc::new(client))
}
