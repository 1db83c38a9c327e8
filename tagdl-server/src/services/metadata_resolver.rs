//! Metadata resolver
//!
//! Media ID → title, artist and cover URL. Exactly one provider call per
//! request, bounded by the configured timeout, never retried.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::MediaMetadata;

/// Artist used when the provider does not name one
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Metadata lookup errors
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("media not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("metadata provider returned {0}")]
    Status(u16),

    #[error("unusable metadata: {0}")]
    Parse(String),

    #[error("metadata lookup timed out after {0:?}")]
    TimedOut(Duration),
}

/// Metadata provider contract
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn lookup(&self, media_id: &str) -> Result<MediaMetadata, MetadataError>;
}

/// Provider response document
#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "author", alias = "channel", alias = "uploader")]
    artist: Option<String>,
    #[serde(default, alias = "thumbnailUrl", alias = "cover")]
    thumbnail: Option<String>,
}

impl MetadataDocument {
    fn into_metadata(self, media_id: &str) -> Result<MediaMetadata, MetadataError> {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| MetadataError::Parse(format!("no title for {}", media_id)))?;

        let artist = self
            .artist
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

        let cover_url = self.thumbnail.filter(|u| !u.trim().is_empty());

        Ok(MediaMetadata {
            title,
            artist,
            cover_url,
        })
    }
}

/// HTTP metadata provider; `{id}` in the endpoint template is the media ID
pub struct HttpMetadataProvider {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpMetadataProvider {
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }

    fn url_for(&self, media_id: &str) -> String {
        self.endpoint
            .replace("{id}", &urlencoding::encode(media_id))
    }
}

#[async_trait::async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn lookup(&self, media_id: &str) -> Result<MediaMetadata, MetadataError> {
        let url = self.url_for(media_id);
        tracing::debug!(media_id = %media_id, url = %url, "Querying metadata provider");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound(media_id.to_string()));
        }

        if !status.is_success() {
            return Err(MetadataError::Status(status.as_u16()));
        }

        let document: MetadataDocument = response
            .json()
            .await
            .map_err(|e| MetadataError::Parse(e.to_string()))?;

        document.into_metadata(media_id)
    }
}

/// Resolver wrapping a provider with the request timeout
pub struct MetadataResolver {
    provider: Arc<dyn MetadataProvider>,
    timeout: Duration,
}

impl MetadataResolver {
    pub fn new(provider: Arc<dyn MetadataProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn resolve(&self, media_id: &str) -> Result<MediaMetadata, MetadataError> {
        let metadata = tokio::time::timeout(self.timeout, self.provider.lookup(media_id))
            .await
            .map_err(|_| MetadataError::TimedOut(self.timeout))??;

        tracing::info!(
            media_id = %media_id,
            title = %metadata.title,
            artist = %metadata.artist,
            has_cover = metadata.cover_url.is_some(),
            "Resolved metadata"
        );

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl MetadataProvider for CountingProvider {
        async fn lookup(&self, media_id: &str) -> Result<MediaMetadata, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(MediaMetadata {
                title: format!("Title {}", media_id),
                artist: "Artist".to_string(),
                cover_url: None,
            })
        }
    }

    #[test]
    fn test_document_aliases_and_defaults() {
        let doc: MetadataDocument =
            serde_json::from_str(r#"{"title": "Song", "author": "Band", "thumbnailUrl": "http://x/c.jpg"}"#)
                .unwrap();
        let metadata = doc.into_metadata("id").unwrap();
        assert_eq!(metadata.artist, "Band");
        assert_eq!(metadata.cover_url.as_deref(), Some("http://x/c.jpg"));

        let doc: MetadataDocument = serde_json::from_str(r#"{"title": "Song", "thumbnail": ""}"#).unwrap();
        let metadata = doc.into_metadata("id").unwrap();
        assert_eq!(metadata.artist, UNKNOWN_ARTIST);
        assert_eq!(metadata.cover_url, None);
    }

    #[test]
    fn test_document_without_title_is_unusable() {
        let doc: MetadataDocument = serde_json::from_str(r#"{"title": "  ", "artist": "Band"}"#).unwrap();
        assert!(matches!(doc.into_metadata("id"), Err(MetadataError::Parse(_))));
    }

    #[test]
    fn test_endpoint_template() {
        let provider = HttpMetadataProvider::new(
            reqwest::Client::new(),
            "http://meta.local/yt?videoId={id}",
        );
        assert_eq!(
            provider.url_for("dQw4w9WgXcQ"),
            "http://meta.local/yt?videoId=dQw4w9WgXcQ"
        );
    }

    #[tokio::test]
    async fn test_resolver_single_call() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let resolver = MetadataResolver::new(provider.clone(), Duration::from_secs(1));

        let metadata = resolver.resolve("abc").await.unwrap();
        assert_eq!(metadata.title, "Title abc");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolver_timeout() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(5),
        });
        let resolver = MetadataResolver::new(provider.clone(), Duration::from_millis(20));

        let err = resolver.resolve("abc").await.unwrap_err();
        assert!(matches!(err, MetadataError::TimedOut(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
