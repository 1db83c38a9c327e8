//! Cover art fetcher
//!
//! One fetch attempt per request, no retry. Under [`CoverPolicy::Degrade`] a
//! failure yields [`Cover::Absent`] and the output simply carries no picture;
//! under [`CoverPolicy::Strict`] it fails the request.

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::CoverPolicy;
use crate::services::resources::{ResourceKind, ResourceScope, TempResource};

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("network error: {0}")]
    Network(String),

    #[error("cover host returned {0}")]
    Status(u16),

    #[error("cover exceeds {0} bytes")]
    TooLarge(u64),

    #[error("not an image ({0})")]
    NotAnImage(String),

    #[error("cover fetch timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cover temp file: {0}")]
    Resource(#[from] std::io::Error),
}

/// Image formats the muxer knows how to embed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    /// Decodable but not embeddable as-is; re-encoded to JPEG by the engine
    Other,
}

impl ImageFormat {
    /// Embeddable in an ID3 attached-picture frame without re-encoding
    pub fn embeds_directly(&self) -> bool {
        matches!(self, ImageFormat::Jpeg | ImageFormat::Png)
    }
}

/// A fetched cover image spooled into a temp resource
#[derive(Debug)]
pub struct CoverArt {
    pub format: ImageFormat,
    pub resource: TempResource,
}

/// Outcome of a cover fetch
#[derive(Debug)]
pub enum Cover {
    Present(CoverArt),
    Absent,
}

impl Cover {
    pub fn is_present(&self) -> bool {
        matches!(self, Cover::Present(_))
    }
}

/// Sniff image bytes; returns format and file extension
fn sniff_image(bytes: &[u8]) -> Result<(ImageFormat, &'static str), CoverError> {
    let kind = infer::get(bytes)
        .ok_or_else(|| CoverError::NotAnImage("unrecognized bytes".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(CoverError::NotAnImage(kind.mime_type().to_string()));
    }

    let format = match kind.mime_type() {
        "image/jpeg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        "image/webp" | "image/gif" | "image/bmp" => ImageFormat::Other,
        // Raw, layered and newer codecs the engine may not decode
        other => return Err(CoverError::NotAnImage(other.to_string())),
    };
    Ok((format, kind.extension()))
}

pub struct CoverFetcher {
    http_client: reqwest::Client,
    policy: CoverPolicy,
    timeout: Duration,
    max_bytes: u64,
}

impl CoverFetcher {
    pub fn new(
        http_client: reqwest::Client,
        policy: CoverPolicy,
        timeout: Duration,
        max_bytes: u64,
    ) -> Self {
        Self {
            http_client,
            policy,
            timeout,
            max_bytes,
        }
    }

    pub fn policy(&self) -> CoverPolicy {
        self.policy
    }

    /// Fetch `cover_url` into a cover temp resource of `scope`, applying the policy
    pub async fn fetch(
        &self,
        cover_url: Option<&str>,
        scope: &ResourceScope,
    ) -> Result<Cover, CoverError> {
        let Some(url) = cover_url else {
            tracing::info!(request_id = %scope.request_id(), "No cover URL, output will carry no picture");
            return Ok(Cover::Absent);
        };

        let outcome = tokio::time::timeout(self.timeout, self.fetch_once(url, scope))
            .await
            .unwrap_or(Err(CoverError::TimedOut(self.timeout)));

        match (outcome, self.policy) {
            (Ok(art), _) => Ok(Cover::Present(art)),
            (Err(e), CoverPolicy::Degrade) => {
                tracing::warn!(
                    request_id = %scope.request_id(),
                    url = %url,
                    error = %e,
                    "Cover fetch failed, continuing without picture"
                );
                Ok(Cover::Absent)
            }
            (Err(e), CoverPolicy::Strict) => {
                tracing::error!(
                    request_id = %scope.request_id(),
                    url = %url,
                    error = %e,
                    "Cover fetch failed"
                );
                Err(e)
            }
        }
    }

    async fn fetch_once(&self, url: &str, scope: &ResourceScope) -> Result<CoverArt, CoverError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| CoverError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoverError::Status(status.as_u16()));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(CoverError::TooLarge(self.max_bytes));
        }

        let mut body = response.bytes_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| CoverError::Network(e.to_string()))?;
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(CoverError::TooLarge(self.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        let (format, ext) = sniff_image(&bytes)?;

        let mut resource = scope.create(ResourceKind::Cover, ext).await?;
        let mut file = resource.open_truncated().await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        tracing::debug!(
            request_id = %scope.request_id(),
            format = ?format,
            bytes = bytes.len(),
            "Cover fetched"
        );

        Ok(CoverArt { format, resource })
    }
}
