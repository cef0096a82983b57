//! Authenticated image downloads.
//!
//! Capture images are served by `GET {api}/images/{id}?type=thumbnail|full`
//! and require a bearer token. [`ImageFetcher`] is the seam the blob cache
//! fetches through.

use std::fmt;

use async_trait::async_trait;
use shotline_core::types::CaptureId;

/// Which rendition of a capture to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageVariant {
    Thumbnail,
    Full,
}

impl ImageVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnail",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for ImageVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw image body plus its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageFetchError {
    #[error("Image request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx response; treated as a failed fetch.
    #[error("Image endpoint returned {status}")]
    Status { status: u16 },
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(
        &self,
        id: &CaptureId,
        variant: ImageVariant,
        token: &str,
    ) -> Result<ImageBytes, ImageFetchError>;
}

/// [`ImageFetcher`] over HTTP.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    api_url: String,
}

impl HttpImageFetcher {
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn image_url(&self, id: &CaptureId, variant: ImageVariant) -> String {
        format!("{}/images/{id}?type={variant}", self.api_url)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(
        &self,
        id: &CaptureId,
        variant: ImageVariant,
        token: &str,
    ) -> Result<ImageBytes, ImageFetchError> {
        let response = self
            .client
            .get(self.image_url(id, variant))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(id = %id, variant = %variant, status = status.as_u16(), "Image fetch rejected");
            return Err(ImageFetchError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(ImageBytes {
            bytes,
            content_type,
        })
    }
}
