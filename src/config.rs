use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Export a Confluence space into a local Markdown archive.
#[derive(Debug, Parser)]
#[command(name = "wikivault", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Overrides the `LOG_LEVEL` environment variable.
    #[arg(long, global = true, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Overrides the `LOG_FORMAT` environment variable (`pretty` or `json`).
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run (or resume) an export of a Confluence space.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
pub struct ExportArgs {
    /// Base URL of the Confluence instance, e.g. https://wiki.example.com.
    #[arg(long, env = "WIKIVAULT_BASE_URL")]
    pub base_url: String,

    /// API token used to authenticate against the wiki.
    #[arg(long, env = "WIKIVAULT_API_TOKEN", hide_env_values = true)]
    pub api_token: String,

    /// Space key to export.
    #[arg(long)]
    pub space: String,

    /// Root directory the archive is written into.
    #[arg(long, default_value = "./export")]
    pub output_dir: PathBuf,

    /// Seed the crawl from a specific page id instead of the space's root.
    #[arg(long)]
    pub root_id: Option<String>,

    /// Stop admitting new work once this many pages have reached a
    /// terminal state (completed or failed) this run. `None` means no cap.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Maximum number of concurrent fetch/transform workers.
    #[arg(long, default_value_t = 5)]
    pub max_concurrency: usize,

    /// Maximum number of pages resolved during the discovery phase before
    /// the scheduler starts draining the backlog.
    #[arg(long, default_value_t = 10)]
    pub discovery_phase_cap: usize,

    /// Upper bound on the number of items the queue will ever hold at once.
    #[arg(long, default_value_t = 100_000)]
    pub max_queue_size: usize,

    /// Number of queue mutations between forced snapshot writes.
    #[arg(long, default_value_t = 20)]
    pub persistence_threshold: u32,

    /// Force a snapshot write after this many milliseconds even if
    /// `--persistence-threshold` mutations haven't accumulated yet.
    #[arg(long, default_value_t = 30_000)]
    pub checkpoint_interval_ms: u64,

    /// Number of corruption backups to retain for the snapshot and manifest.
    #[arg(long, default_value_t = 3)]
    pub backup_retention: usize,

    /// Re-export every page regardless of what the manifest says changed.
    #[arg(long)]
    pub force_full: bool,

    /// Resume even if the previous run's marker says it finished cleanly.
    #[arg(long)]
    pub force_resume: bool,

    /// Fail the run instead of falling back to a backup snapshot on
    /// corruption.
    #[arg(long)]
    pub no_allow_corrupted: bool,

    /// Disable falling back to corruption backups during recovery.
    #[arg(long)]
    pub no_use_backup: bool,

    /// Tolerate page failures instead of aborting on the very first one.
    /// Off by default: a single terminal page failure aborts the run
    /// unless this is set, in which case `--max-page-failures` governs.
    #[arg(long)]
    pub allow_failures: bool,

    /// Maximum number of page failures tolerated before the run aborts.
    /// Only consulted when `--allow-failures` is set.
    #[arg(long)]
    pub max_page_failures: Option<u32>,

    /// Maximum number of attachment failures tolerated before the run
    /// aborts.
    #[arg(long)]
    pub max_attachment_failures: Option<u32>,

    /// Maximum percentage (0-100) of discovered attachments allowed to
    /// fail before the run aborts.
    #[arg(long)]
    pub max_attachment_failure_percent: Option<f64>,

    /// Abort the run the first time a permission-restricted page is
    /// encountered, instead of skipping it and continuing.
    #[arg(long)]
    pub disallow_restricted_pages: bool,
}

impl ExportArgs {
    pub fn snapshot_path(&self) -> PathBuf {
        self.output_dir.join(".wikivault").join("queue-state.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(".wikivault").join("manifest.json")
    }

    pub fn resume_options(&self) -> crate::recovery::ResumeOptions {
        crate::recovery::ResumeOptions {
            force_resume: self.force_resume,
            allow_corrupted: !self.no_allow_corrupted,
            use_backup: !self.no_use_backup,
            validate_integrity: true,
            repair_corruption: true,
        }
    }

    pub fn failure_thresholds(&self) -> crate::governor::FailureThresholds {
        let defaults = crate::governor::FailureThresholds::default();
        crate::governor::FailureThresholds {
            allow_failures: self.allow_failures,
            max_page_failures: self.max_page_failures.or(defaults.max_page_failures),
            max_attachment_failures: self
                .max_attachment_failures
                .or(defaults.max_attachment_failures),
            max_attachment_failure_percent: self
                .max_attachment_failure_percent
                .or(defaults.max_attachment_failure_percent),
            restricted_pages_allowed: !self.disallow_restricted_pages,
        }
    }
}
