//! Request and metadata models

use serde::{Deserialize, Serialize};
use tagdl_common::{sanitize_filename, RequestId};

use crate::config::DeliveryMode;
use crate::error::PipelineError;
use crate::services::media_id::extract_media_id;

/// Query string of `GET /download`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadQuery {
    pub url: Option<String>,
    pub title: Option<String>,
    pub mode: Option<DeliveryMode>,
}

/// One validated inbound download request
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub request_id: RequestId,
    pub media_id: String,
    pub source_url: String,
    pub requested_title: Option<String>,
}

impl MediaRequest {
    /// Validate the query. Fails with an input error before any upstream call.
    pub fn from_query(request_id: RequestId, query: &DownloadQuery) -> Result<Self, PipelineError> {
        let source_url = query
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                PipelineError::InvalidInput("url query parameter is required".to_string())
            })?;

        let media_id = extract_media_id(source_url).ok_or_else(|| {
            PipelineError::InvalidInput(format!("unrecognized media URL: {}", source_url))
        })?;

        let requested_title = query
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string);

        Ok(Self {
            request_id,
            media_id,
            source_url: source_url.to_string(),
            requested_title,
        })
    }
}

/// Descriptive metadata, fetched once per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaMetadata {
    pub title: String,
    pub artist: String,
    pub cover_url: Option<String>,
}

/// Container-level tags written by the muxer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub title: String,
    pub artist: String,
}

impl TagSet {
    /// The requested title, when given, overrides the resolved one
    pub fn for_request(request: &MediaRequest, metadata: &MediaMetadata) -> Self {
        Self {
            title: request
                .requested_title
                .clone()
                .unwrap_or_else(|| metadata.title.clone()),
            artist: metadata.artist.clone(),
        }
    }

    /// Key/value pairs in engine order
    pub fn pairs(&self) -> Vec<(String, String)> {
        vec![
            ("title".to_string(), self.title.clone()),
            ("artist".to_string(), self.artist.clone()),
        ]
    }

    /// Sanitized filename stem derived from the title
    pub fn file_stem(&self) -> String {
        sanitize_filename(&self.title)
    }
}
