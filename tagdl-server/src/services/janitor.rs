//! Background cleanup
//!
//! Temp files only outlive their request when the process dies mid-request,
//! so the temp directory is emptied once at startup. Stored artifacts nobody
//! fetched are expired on a fixed interval.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

use crate::services::artifact_store::ArtifactStore;

/// Delete every file left in the temp directory by a previous run
pub async fn purge_temp_dir(dir: &Path) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to purge leftover temp file")
            }
        }
    }

    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "Purged leftover temp files");
    }
    Ok(removed)
}

/// Expire unclaimed artifacts every `interval`
pub fn spawn_artifact_expiry(
    store: Arc<ArtifactStore>,
    ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.expire(ttl, SystemTime::now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Artifact expiry sweep"),
                Err(e) => tracing::warn!(error = %e, "Artifact expiry sweep failed"),
            }
        }
    })
}
