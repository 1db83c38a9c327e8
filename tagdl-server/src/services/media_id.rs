//! Media ID extraction from source URLs

use once_cell::sync::Lazy;
use regex::Regex;

/// YouTube video IDs are 11 characters drawn from a URL-safe alphabet
static VIDEO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:youtube\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?|shorts|live)/|.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
    )
    .expect("video id pattern is valid")
});

/// Extract the media ID from a source URL, `None` if the URL is not recognized
pub fn extract_media_id(url: &str) -> Option<String> {
    VIDEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
