//! Audio source selector
//!
//! Providers are attempted strictly in configured order. One attempt is the
//! upstream request plus spooling its body into the request's audio temp
//! file, bounded by the attempt timeout. Any failure moves on to the next
//! provider; a provider is never retried. The first complete body wins.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::ProviderConfig;
use crate::models::MediaRequest;
use crate::services::resources::{ResourceKind, ResourceScope, TempResource};

/// Why a single provider attempt failed
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned {0}")]
    Status(u16),

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error("empty body")]
    EmptyBody,

    #[error("body truncated: {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("body exceeds {0} bytes")]
    TooLarge(u64),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("spool error: {0}")]
    Spool(String),
}

/// An opened upstream body
pub struct AudioStream {
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, UpstreamError>>,
}

/// Audio provider contract
#[async_trait::async_trait]
pub trait AudioProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, request: &MediaRequest) -> Result<AudioStream, UpstreamError>;
}

/// JSON document some providers return instead of audio
#[derive(Debug, Deserialize)]
struct RedirectDocument {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default, rename = "downloadUrl")]
    download_url: Option<String>,
}

impl RedirectDocument {
    fn target(self) -> Option<String> {
        [self.url, self.link, self.download_url]
            .into_iter()
            .flatten()
            .find(|u| !u.trim().is_empty())
    }
}

/// Provider reached over HTTP through a URL template
pub struct HttpAudioProvider {
    name: String,
    url_template: String,
    http_client: reqwest::Client,
}

impl HttpAudioProvider {
    pub fn new(config: &ProviderConfig, http_client: reqwest::Client) -> Self {
        Self {
            name: config.name.clone(),
            url_template: config.url.clone(),
            http_client,
        }
    }

    /// `{url}` is the percent-encoded source URL, `{id}` the media ID
    fn url_for(&self, request: &MediaRequest) -> String {
        self.url_template
            .replace("{url}", &urlencoding::encode(&request.source_url))
            .replace("{id}", &urlencoding::encode(&request.media_id))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

fn content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[async_trait::async_trait]
impl AudioProvider for HttpAudioProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, request: &MediaRequest) -> Result<AudioStream, UpstreamError> {
        let url = self.url_for(request);
        tracing::debug!(provider = %self.name, url = %url, "Opening audio provider");

        let mut response = self.get(&url).await?;

        // One redirect hop through a JSON document
        if content_type(&response).contains("json") {
            let document: RedirectDocument = response
                .json()
                .await
                .map_err(|e| UpstreamError::InvalidBody(format!("unreadable JSON: {}", e)))?;
            let target = document
                .target()
                .ok_or_else(|| UpstreamError::InvalidBody("JSON without audio URL".to_string()))?;
            tracing::debug!(provider = %self.name, target = %target, "Following provider redirect document");
            response = self.get(&target).await?;
        }

        let kind = content_type(&response);
        if kind.contains("json") || kind.starts_with("text/") {
            return Err(UpstreamError::InvalidBody(format!(
                "unexpected content type {}",
                kind
            )));
        }

        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map_err(|e| UpstreamError::Network(e.to_string()))
            .boxed();

        Ok(AudioStream {
            content_length,
            body,
        })
    }
}

/// One provider's failure, kept for the exhausted report
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: UpstreamError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("all audio sources exhausted ({})", format_failures(.0))]
    AllSourcesExhausted(Vec<ProviderFailure>),

    #[error("audio temp file: {0}")]
    Resource(#[from] std::io::Error),
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Winning provider and the spooled audio it delivered
#[derive(Debug)]
pub struct SelectedAudio {
    pub provider: String,
    pub bytes: u64,
    pub resource: TempResource,
}

/// Ordered provider fallback
pub struct SourceSelector {
    providers: Vec<Arc<dyn AudioProvider>>,
    attempt_timeout: Duration,
    max_bytes: Option<u64>,
}

impl SourceSelector {
    pub fn new(
        providers: Vec<Arc<dyn AudioProvider>>,
        attempt_timeout: Duration,
        max_bytes: Option<u64>,
    ) -> Self {
        Self {
            providers,
            attempt_timeout,
            max_bytes,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Fetch the audio for `request` into a new audio temp resource of `scope`
    pub async fn select_into(
        &self,
        request: &MediaRequest,
        scope: &ResourceScope,
    ) -> Result<SelectedAudio, SourceError> {
        let mut resource = scope.create(ResourceKind::Audio, "src").await?;
        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                self.attempt_timeout,
                self.attempt(provider.as_ref(), request, &mut resource),
            )
            .await
            .unwrap_or(Err(UpstreamError::TimedOut(self.attempt_timeout)));

            match outcome {
                Ok(bytes) => {
                    tracing::info!(
                        request_id = %request.request_id,
                        provider = %provider.name(),
                        bytes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Audio source selected"
                    );
                    return Ok(SelectedAudio {
                        provider: provider.name().to_string(),
                        bytes,
                        resource,
                    });
                }
                Err(reason) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        provider = %provider.name(),
                        error = %reason,
                        "Audio provider failed, trying next"
                    );
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        reason,
                    });
                }
            }
        }

        Err(SourceError::AllSourcesExhausted(failures))
    }

    async fn attempt(
        &self,
        provider: &dyn AudioProvider,
        request: &MediaRequest,
        resource: &mut TempResource,
    ) -> Result<u64, UpstreamError> {
        let AudioStream {
            content_length,
            mut body,
        } = provider.open(request).await?;

        if let (Some(max), Some(declared)) = (self.max_bytes, content_length) {
            if declared > max {
                return Err(UpstreamError::TooLarge(max));
            }
        }

        let spool = |e: std::io::Error| UpstreamError::Spool(e.to_string());
        let mut file = resource.open_truncated().await.map_err(spool)?;
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if let Some(max) = self.max_bytes {
                if written > max {
                    return Err(UpstreamError::TooLarge(max));
                }
            }
            file.write_all(&chunk).await.map_err(spool)?;
        }
        file.flush().await.map_err(spool)?;

        if written == 0 {
            return Err(UpstreamError::EmptyBody);
        }
        if let Some(expected) = content_length {
            if written < expected {
                return Err(UpstreamError::Truncated {
                    expected,
                    received: written,
                });
            }
        }

        Ok(written)
    }
}
