mod manifest;
mod queue_item;

pub use manifest::{Manifest, ManifestEntry, ManifestEntryStatus, ManifestProcessingStatus};
pub use queue_item::{QueueItem, QueueItemStatus, QueueMetrics, SourceType};

/// A page as returned by the wiki client, prior to transformation. This is
/// the payload the discovery extractor inspects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub id: String,
    pub title: String,
    pub version: u64,
    pub body_html: String,
    pub parent_id: Option<String>,
}

/// The result of running a fetched page through the transformer: Markdown
/// content ready to write, plus the content hash used by the manifest diff.
#[derive(Debug, Clone)]
pub struct TransformedPage {
    pub markdown: String,
    pub content_hash: String,
}
