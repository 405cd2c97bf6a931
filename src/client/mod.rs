mod mock;
mod reqwest_client;
mod user_cache;

pub use mock::MockWikiClient;
pub use reqwest_client::ReqwestWikiClient;
pub use user_cache::UserCache;

use async_trait::async_trait;

use crate::domain::FetchedPage;

#[derive(Debug, Clone)]
pub struct UserInfo {
    pub username: String,
    pub display_name: String,
    pub profile_page_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChildRef {
    pub id: String,
    pub title: String,
}

/// The target of a page-include macro once its title has been resolved to
/// a concrete page id.
#[derive(Debug, Clone)]
pub struct PageRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct AttachmentRef {
    pub id: String,
    pub file_name: String,
    pub media_type: String,
    pub size: u64,
    pub download_url: String,
}

/// The boundary between the queue core and the remote wiki. Implementors
/// own transport, auth, and rate-limit header parsing; everything above
/// this trait only ever sees `FetchedPage`/`UserInfo`/`ClientError`.
#[async_trait]
pub trait WikiClient: Send + Sync {
    async fn fetch_page(&self, page_id: &str) -> Result<FetchedPage, ClientError>;
    async fn list_children(&self, page_id: &str) -> Result<Vec<ChildRef>, ClientError>;
    async fn fetch_user(&self, username: &str) -> Result<UserInfo, ClientError>;
    /// Resolves a page-include macro's title to a concrete page, scoped to
    /// `space_key`. `Ok(None)` means the title does not resolve to any
    /// page in that space (the include macro is left unexpanded).
    async fn get_page_by_title(
        &self,
        space_key: &str,
        title: &str,
    ) -> Result<Option<PageRef>, ClientError>;
    async fn list_attachments(&self, page_id: &str) -> Result<Vec<AttachmentRef>, ClientError>;
    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, ClientError>;
}

/// A transport-level error from the wiki client, carrying enough
/// information (status code, retry-after hint) for the retry classifier
/// and backoff calculator to act on without re-parsing a raw message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("http {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("page {0} not found")]
    NotFound(String),
}

impl ClientError {
    pub fn classification_message(&self) -> String {
        match self {
            ClientError::Http { status, message, .. } => format!("{status} {message}"),
            ClientError::Transport(msg) => msg.clone(),
            ClientError::NotFound(id) => format!("404 page {id} not found"),
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ClientError::Http { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
