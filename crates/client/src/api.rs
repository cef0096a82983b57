//! REST API client for the capture service.
//!
//! [`CaptureApi`] is the contract the session depends on; [`HttpCaptureApi`]
//! implements it over HTTP with [`reqwest`]. Every call carries the bearer
//! token its [`TokenSource`] holds at send time.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shotline_core::capture::{CaptureItem, CaptureKind, CaptureStatus, Metadata};
use shotline_core::types::{CaptureId, ProjectId, Timestamp};

use crate::auth::TokenSource;

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Capture API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ApiError {
    /// Whether the service rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A screenshot or collection as the REST endpoints return it.
///
/// Older endpoints omit `kind` for plain screenshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: CaptureId,
    #[serde(default = "default_kind", alias = "type")]
    pub kind: CaptureKind,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    pub status: CaptureStatus,
    #[serde(default)]
    pub collection_id: Option<CaptureId>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

fn default_kind() -> CaptureKind {
    CaptureKind::Screenshot
}

impl From<CaptureRecord> for CaptureItem {
    fn from(record: CaptureRecord) -> Self {
        CaptureItem {
            id: record.id,
            kind: record.kind,
            url: record.url,
            title: record.title,
            metadata: record.metadata,
            image_path: record.image_path,
            thumbnail_path: record.thumbnail_path,
            status: record.status,
            collection_id: record.collection_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            status_at: None,
            is_optimistic: false,
        }
    }
}

/// Response of `GET /projects/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSnapshot {
    pub project: ProjectSummary,
    #[serde(default)]
    pub screenshots: Vec<CaptureRecord>,
}

impl ProjectSnapshot {
    pub fn into_items(self) -> Vec<CaptureItem> {
        self.screenshots.into_iter().map(CaptureItem::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateScreenshotRequest {
    pub project_id: ProjectId,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Capture options (viewport, full page, delay, ...).
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub options: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateCrawlRequest {
    pub project_id: ProjectId,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SelectUrlsBody<'a> {
    urls: &'a [String],
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Remote capture operations used by a project session.
#[async_trait]
pub trait CaptureApi: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<ProjectSnapshot, ApiError>;

    async fn create_screenshot(
        &self,
        request: &CreateScreenshotRequest,
    ) -> Result<CaptureRecord, ApiError>;

    /// Start a crawl; the returned record is the collection.
    async fn create_crawl_screenshot(
        &self,
        request: &CreateCrawlRequest,
    ) -> Result<CaptureRecord, ApiError>;

    /// Choose which discovered URLs of a crawl get captured.
    async fn select_crawl_urls(
        &self,
        collection_id: &CaptureId,
        urls: &[String],
    ) -> Result<(), ApiError>;

    async fn delete_screenshot(&self, id: &CaptureId) -> Result<(), ApiError>;

    async fn delete_collection(&self, id: &CaptureId) -> Result<(), ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// HTTP client for the capture service REST API.
pub struct HttpCaptureApi {
    client: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpCaptureApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000/api`.
    /// * `tokens`  - consulted on every request.
    pub fn new(api_url: String, tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, tokens)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool with
    /// the image fetcher).
    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.api_url));
        match self.tokens.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Ensure the response has a success status code, or turn it into
    /// [`ApiError::Status`] carrying the body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CaptureApi for HttpCaptureApi {
    async fn get_project(&self, project_id: &str) -> Result<ProjectSnapshot, ApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/projects/{project_id}"))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn create_screenshot(
        &self,
        request: &CreateScreenshotRequest,
    ) -> Result<CaptureRecord, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/screenshots")
            .json(request)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn create_crawl_screenshot(
        &self,
        request: &CreateCrawlRequest,
    ) -> Result<CaptureRecord, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/screenshots/crawl")
            .json(request)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn select_crawl_urls(
        &self,
        collection_id: &CaptureId,
        urls: &[String],
    ) -> Result<(), ApiError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection_id}/select-urls"),
            )
            .json(&SelectUrlsBody { urls })
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn delete_screenshot(&self, id: &CaptureId) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/screenshots/{id}"))
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn delete_collection(&self, id: &CaptureId) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/collections/{id}"))
            .send()
            .await?;
        Self::check_status(response).await
    }
}
