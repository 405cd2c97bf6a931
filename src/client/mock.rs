use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::FetchedPage;

use super::{AttachmentRef, ChildRef, ClientError, PageRef, UserInfo, WikiClient};

/// In-memory `WikiClient` double for tests: pages, children, and users are
/// seeded up front; fetches beyond the seeded set return `NotFound`. A
/// page id can be pre-loaded with a scripted error instead of content to
/// exercise retry/classification paths deterministically.
#[derive(Default)]
pub struct MockWikiClient {
    pages: Mutex<HashMap<String, FetchedPage>>,
    children: Mutex<HashMap<String, Vec<ChildRef>>>,
    users: Mutex<HashMap<String, UserInfo>>,
    titles: Mutex<HashMap<(String, String), PageRef>>,
    attachments: Mutex<HashMap<String, Vec<AttachmentRef>>>,
    attachment_bytes: Mutex<HashMap<String, Vec<u8>>>,
    scripted_errors: Mutex<HashMap<String, ScriptedError>>,
}

#[derive(Clone)]
struct ScriptedError {
    kind: ScriptedErrorKind,
    /// Remaining number of times this script still fires. `None` means it
    /// fires forever until cleared.
    remaining: Option<u32>,
}

#[derive(Clone)]
enum ScriptedErrorKind {
    Http { status: u16, message: String, retry_after_ms: Option<u64> },
    Transport(String),
}

impl MockWikiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_page(&self, page: FetchedPage) {
        self.pages.lock().unwrap().insert(page.id.clone(), page);
    }

    pub fn seed_children(&self, page_id: impl Into<String>, children: Vec<ChildRef>) {
        self.children.lock().unwrap().insert(page_id.into(), children);
    }

    pub fn seed_user(&self, user: UserInfo) {
        self.users.lock().unwrap().insert(user.username.clone(), user);
    }

    /// Seeds the id a page-include macro's title resolves to within
    /// `space_key`.
    pub fn seed_title(&self, space_key: impl Into<String>, title: impl Into<String>, page: PageRef) {
        self.titles
            .lock()
            .unwrap()
            .insert((space_key.into(), title.into()), page);
    }

    pub fn seed_attachments(&self, page_id: impl Into<String>, attachments: Vec<AttachmentRef>) {
        self.attachments.lock().unwrap().insert(page_id.into(), attachments);
    }

    pub fn seed_attachment_bytes(&self, attachment_id: impl Into<String>, bytes: Vec<u8>) {
        self.attachment_bytes.lock().unwrap().insert(attachment_id.into(), bytes);
    }

    /// Makes every fetch of `page_id` fail with an HTTP error until the
    /// script is cleared or replaced.
    pub fn script_http_error(&self, page_id: impl Into<String>, status: u16, message: impl Into<String>) {
        self.script_http_error_times(page_id, status, message, None, None);
    }

    /// Makes fetches of `page_id` fail with an HTTP error (optionally
    /// carrying a `Retry-After` hint in milliseconds) exactly `times`
    /// times, after which the underlying seeded page (if any) is served
    /// normally. `times = None` fails forever.
    pub fn script_http_error_times(
        &self,
        page_id: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
        times: Option<u32>,
    ) {
        self.scripted_errors.lock().unwrap().insert(
            page_id.into(),
            ScriptedError {
                kind: ScriptedErrorKind::Http {
                    status,
                    message: message.into(),
                    retry_after_ms,
                },
                remaining: times,
            },
        );
    }

    pub fn script_transport_error(&self, page_id: impl Into<String>, message: impl Into<String>) {
        self.scripted_errors.lock().unwrap().insert(
            page_id.into(),
            ScriptedError {
                kind: ScriptedErrorKind::Transport(message.into()),
                remaining: None,
            },
        );
    }

    pub fn clear_script(&self, page_id: &str) {
        self.scripted_errors.lock().unwrap().remove(page_id);
    }
}

#[async_trait]
impl WikiClient for MockWikiClient {
    async fn fetch_page(&self, page_id: &str) -> Result<FetchedPage, ClientError> {
        let fire = {
            let mut errors = self.scripted_errors.lock().unwrap();
            match errors.get_mut(page_id) {
                Some(scripted) => {
                    let kind = scripted.kind.clone();
                    let exhausted = match &mut scripted.remaining {
                        Some(n) if *n > 0 => {
                            *n -= 1;
                            *n == 0
                        }
                        Some(_) => true,
                        None => false,
                    };
                    if exhausted {
                        errors.remove(page_id);
                    }
                    Some(kind)
                }
                None => None,
            }
        };
        if let Some(kind) = fire {
            return Err(match kind {
                ScriptedErrorKind::Http { status, message, retry_after_ms } => {
                    ClientError::Http { status, message, retry_after_ms }
                }
                ScriptedErrorKind::Transport(message) => ClientError::Transport(message),
            });
        }
        self.pages
            .lock()
            .unwrap()
            .get(page_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(page_id.to_string()))
    }

    async fn list_children(&self, page_id: &str) -> Result<Vec<ChildRef>, ClientError> {
        Ok(self.children.lock().unwrap().get(page_id).cloned().unwrap_or_default())
    }

    async fn fetch_user(&self, username: &str) -> Result<UserInfo, ClientError> {
        self.users
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("user:{username}")))
    }

    async fn get_page_by_title(
        &self,
        space_key: &str,
        title: &str,
    ) -> Result<Option<PageRef>, ClientError> {
        Ok(self
            .titles
            .lock()
            .unwrap()
            .get(&(space_key.to_string(), title.to_string()))
            .cloned())
    }

    async fn list_attachments(&self, page_id: &str) -> Result<Vec<AttachmentRef>, ClientError> {
        Ok(self.attachments.lock().unwrap().get(page_id).cloned().unwrap_or_default())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, ClientError> {
        self.attachment_bytes
            .lock()
            .unwrap()
            .get(&attachment.id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(attachment.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_page_is_returned() {
        let client = MockWikiClient::new();
        client.seed_page(FetchedPage {
            id: "1".into(),
            title: "Home".into(),
            version: 1,
            body_html: "<p>hi</p>".into(),
            parent_id: None,
        });
        let page = client.fetch_page("1").await.unwrap();
        assert_eq!(page.title, "Home");
    }

    #[tokio::test]
    async fn unseeded_page_is_not_found() {
        let client = MockWikiClient::new();
        assert!(matches!(client.fetch_page("missing").await, Err(ClientError::NotFound(_))));
    }

    #[tokio::test]
    async fn scripted_error_overrides_any_seeded_page() {
        let client = MockWikiClient::new();
        client.seed_page(FetchedPage {
            id: "1".into(),
            title: "Home".into(),
            version: 1,
            body_html: String::new(),
            parent_id: None,
        });
        client.script_http_error("1", 429, "slow down");
        let err = client.fetch_page("1").await.unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 429, .. }));
    }
}
