use async_trait::async_trait;
use reqwest::Client;

use crate::domain::FetchedPage;

use super::{AttachmentRef, ChildRef, ClientError, PageRef, UserInfo, WikiClient};

/// `reqwest`-backed wiki client. Talks to the Confluence REST API
/// (`/rest/api/content/{id}` and friends); response-shape parsing is kept
/// intentionally small since body transformation itself is out of scope.
pub struct ReqwestWikiClient {
    http: Client,
    base_url: String,
    api_token: String,
}

#[derive(serde::Deserialize)]
struct ContentResponse {
    id: String,
    title: String,
    version: VersionField,
    body: BodyField,
    #[serde(default)]
    ancestors: Vec<AncestorField>,
}

#[derive(serde::Deserialize)]
struct VersionField {
    number: u64,
}

#[derive(serde::Deserialize)]
struct BodyField {
    storage: StorageField,
}

#[derive(serde::Deserialize)]
struct StorageField {
    value: String,
}

#[derive(serde::Deserialize)]
struct AncestorField {
    id: String,
}

#[derive(serde::Deserialize)]
struct ChildrenResponse {
    results: Vec<ChildResult>,
}

#[derive(serde::Deserialize)]
struct ChildResult {
    id: String,
    title: String,
}

#[derive(serde::Deserialize)]
struct UserResponse {
    username: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(serde::Deserialize)]
struct ContentSearchResponse {
    results: Vec<ContentSearchResult>,
}

#[derive(serde::Deserialize)]
struct ContentSearchResult {
    id: String,
    title: String,
}

#[derive(serde::Deserialize)]
struct AttachmentsResponse {
    results: Vec<AttachmentResult>,
}

#[derive(serde::Deserialize)]
struct AttachmentResult {
    id: String,
    title: String,
    #[serde(default)]
    extensions: AttachmentExtensions,
    #[serde(rename = "_links")]
    links: AttachmentLinks,
}

#[derive(Default, serde::Deserialize)]
struct AttachmentExtensions {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    #[serde(rename = "fileSize", default)]
    file_size: u64,
}

#[derive(serde::Deserialize)]
struct AttachmentLinks {
    download: String,
}

impl ReqwestWikiClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(ReqwestWikiClient {
            http,
            base_url: base_url.into(),
            api_token: api_token.into(),
        })
    }

    async fn send(&self, url: String) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(url));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ClientError::Http {
                status,
                message,
                retry_after_ms,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl WikiClient for ReqwestWikiClient {
    async fn fetch_page(&self, page_id: &str) -> Result<FetchedPage, ClientError> {
        let url = format!(
            "{}/rest/api/content/{page_id}?expand=body.storage,version,ancestors",
            self.base_url
        );
        let response = self.send(url).await?;
        let body: ContentResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(FetchedPage {
            id: body.id,
            title: body.title,
            version: body.version.number,
            body_html: body.body.storage.value,
            parent_id: body.ancestors.last().map(|a| a.id.clone()),
        })
    }

    async fn list_children(&self, page_id: &str) -> Result<Vec<ChildRef>, ClientError> {
        let url = format!("{}/rest/api/content/{page_id}/child/page", self.base_url);
        let response = self.send(url).await?;
        let body: ChildrenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(body
            .results
            .into_iter()
            .map(|c| ChildRef { id: c.id, title: c.title })
            .collect())
    }

    async fn fetch_user(&self, username: &str) -> Result<UserInfo, ClientError> {
        let url = format!("{}/rest/api/user?username={username}", self.base_url);
        let response = self.send(url).await?;
        let body: UserResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(UserInfo {
            username: body.username,
            display_name: body.display_name,
            profile_page_id: None,
        })
    }

    async fn get_page_by_title(
        &self,
        space_key: &str,
        title: &str,
    ) -> Result<Option<PageRef>, ClientError> {
        let cql = format!("space=\"{space_key}\" and title=\"{title}\" and type=page");
        let mut url = reqwest::Url::parse(&format!("{}/rest/api/content/search", self.base_url))
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        url.query_pairs_mut().append_pair("cql", &cql);
        let response = self.send(url.to_string()).await?;
        let body: ContentSearchResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(body
            .results
            .into_iter()
            .next()
            .map(|r| PageRef { id: r.id, title: r.title }))
    }

    async fn list_attachments(&self, page_id: &str) -> Result<Vec<AttachmentRef>, ClientError> {
        let url = format!(
            "{}/rest/api/content/{page_id}/child/attachment?expand=extensions",
            self.base_url
        );
        let response = self.send(url).await?;
        let body: AttachmentsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(body
            .results
            .into_iter()
            .map(|a| AttachmentRef {
                id: a.id,
                file_name: a.title,
                media_type: a.extensions.media_type,
                size: a.extensions.file_size,
                download_url: format!("{}{}", self.base_url, a.links.download),
            })
            .collect())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, ClientError> {
        let response = self.send(attachment.download_url.clone()).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
