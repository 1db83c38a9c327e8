//! Handle-mode artifact store
//!
//! Finished outputs are moved here as `<32-hex request id>-<stem>.mp3` and
//! served once through `GET /files/<name>`. A retrieval claims the artifact
//! by renaming it to a hidden name, so concurrent or replayed requests see
//! 404. A fully sent artifact is deleted; an interrupted retrieval puts the
//! artifact back for another try.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tagdl_common::filename::is_sanitized;
use thiserror::Error;

use crate::services::resources::TempResource;

const ARTIFACT_EXT: &str = ".mp3";
const CLAIM_PREFIX: &str = ".";
const CLAIM_SUFFIX: &str = ".claimed";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("artifact store I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `name` has the shape of a stored artifact name
pub fn is_valid_artifact_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(ARTIFACT_EXT) else {
        return false;
    };
    let Some((id, title)) = stem.split_once('-') else {
        return false;
    };
    id.len() == 32
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && is_sanitized(title)
}

/// Title part of an artifact name, used as the download filename
pub fn artifact_stem(name: &str) -> &str {
    name.strip_suffix(ARTIFACT_EXT)
        .and_then(|stem| stem.split_once('-'))
        .map(|(_, title)| title)
        .unwrap_or(name)
}

pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn claim_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", CLAIM_PREFIX, name, CLAIM_SUFFIX))
    }

    /// Move a finished output into the store; returns the artifact name
    pub async fn publish(&self, output: TempResource, stem: &str) -> Result<String, StoreError> {
        let name = format!("{}-{}{}", output.request_id(), stem, ARTIFACT_EXT);
        let request_id = output.request_id();
        output.persist(&self.dir.join(&name)).await?;

        tracing::info!(request_id = %request_id, artifact = %name, "Artifact stored");
        Ok(name)
    }

    /// Take exclusive ownership of an artifact for one retrieval
    pub async fn claim(&self, name: &str) -> Result<ClaimedArtifact, StoreError> {
        if !is_valid_artifact_name(name) {
            return Err(StoreError::NotFound(format!("unknown artifact {}", name)));
        }

        let stored = self.dir.join(name);
        let claimed = self.claim_path(name);

        match tokio::fs::rename(&stored, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("unknown artifact {}", name)));
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        let mut artifact = ClaimedArtifact {
            name: name.to_string(),
            stored,
            claimed,
            len: 0,
            done: false,
        };
        // On error the drop of `artifact` restores the stored name
        artifact.len = tokio::fs::metadata(&artifact.claimed).await?.len();

        tracing::debug!(artifact = %name, bytes = artifact.len, "Artifact claimed");
        Ok(artifact)
    }

    /// Delete artifacts and stale claims last modified before `now - ttl`
    pub async fn expire(&self, ttl: Duration, now: SystemTime) -> std::io::Result<usize> {
        let cutoff = now.checked_sub(ttl).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            let modified = metadata.modified().unwrap_or(now);
            if modified >= cutoff {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(path = %entry.path().display(), "Expired artifact deleted");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to delete expired artifact");
                }
            }
        }

        Ok(removed)
    }
}

/// An artifact held for one retrieval
#[derive(Debug)]
pub struct ClaimedArtifact {
    name: String,
    stored: PathBuf,
    claimed: PathBuf,
    len: u64,
    done: bool,
}

impl ClaimedArtifact {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn open(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.claimed).await
    }

    /// The artifact was fully sent; delete it
    pub async fn complete(mut self) {
        self.done = true;
        match tokio::fs::remove_file(&self.claimed).await {
            Ok(()) => tracing::info!(artifact = %self.name, "Artifact delivered and deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(artifact = %self.name, error = %e, "Failed to delete delivered artifact")
            }
        }
    }
}

impl Drop for ClaimedArtifact {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        match std::fs::rename(&self.claimed, &self.stored) {
            Ok(()) => tracing::warn!(artifact = %self.name, "Artifact retrieval interrupted, restored"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(artifact = %self.name, error = %e, "Failed to restore artifact")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::resources::{ResourceKind, ResourceScope, ResourceTracker};
    use tagdl_common::RequestId;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    async fn stored(dir: &TempDir, tracker: &ResourceTracker) -> (ArtifactStore, String) {
        let tmp = dir.path().join("tmp");
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::create_dir_all(&artifacts).unwrap();

        let scope = ResourceScope::new(RequestId::new(), &tmp, tracker.clone());
        let mut output = scope.create(ResourceKind::Output, "mp3").await.unwrap();
        let mut file = output.open_truncated().await.unwrap();
        file.write_all(b"ID3tagged").await.unwrap();
        file.flush().await.unwrap();

        let store = ArtifactStore::new(&artifacts);
        let name = store.publish(output, "My_Song_Title").await.unwrap();
        (store, name)
    }

    #[test]
    fn test_artifact_name_validation() {
        let id = RequestId::new().to_string();
        assert!(is_valid_artifact_name(&format!("{}-My_Song.mp3", id)));
        assert!(!is_valid_artifact_name(&format!("{}-My_Song.wav", id)));
        assert!(!is_valid_artifact_name("abc-My_Song.mp3"));
        assert!(!is_valid_artifact_name(&format!("{}-../etc.mp3", id)));
        assert!(!is_valid_artifact_name(&format!(".{}-x.mp3.claimed", id)));
        assert!(!is_valid_artifact_name(""));
    }

    #[test]
    fn test_artifact_stem() {
        let name = format!("{}-My_Song_Title.mp3", RequestId::new());
        assert_eq!(artifact_stem(&name), "My_Song_Title");
    }

    #[tokio::test]
    async fn test_publish_transfers_ownership() {
        let dir = TempDir::new().unwrap();
        let tracker = ResourceTracker::new();
        let (store, name) = stored(&dir, &tracker).await;

        assert!(is_valid_artifact_name(&name));
        assert!(name.ends_with("-My_Song_Title.mp3"));
        assert!(store.dir().join(&name).exists());
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_and_single_use() {
        let dir = TempDir::new().unwrap();
        let (store, name) = stored(&dir, &ResourceTracker::new()).await;

        let claimed = store.claim(&name).await.unwrap();
        assert_eq!(claimed.len(), 9);
        assert!(matches!(store.claim(&name).await, Err(StoreError::NotFound(_))));

        claimed.complete().await;
        assert!(matches!(store.claim(&name).await, Err(StoreError::NotFound(_))));
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_claim_restores_artifact() {
        let dir = TempDir::new().unwrap();
        let (store, name) = stored(&dir, &ResourceTracker::new()).await;

        drop(store.claim(&name).await.unwrap());
        assert!(store.dir().join(&name).exists());
        store.claim(&name).await.unwrap().complete().await;
    }

    #[tokio::test]
    async fn test_expire_removes_old_artifacts_only() {
        let dir = TempDir::new().unwrap();
        let (store, name) = stored(&dir, &ResourceTracker::new()).await;

        let removed = store
            .expire(Duration::from_secs(3600), SystemTime::now())
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(store.dir().join(&name).exists());

        let later = SystemTime::now() + Duration::from_secs(7200);
        let removed = store.expire(Duration::from_secs(3600), later).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.dir().join(&name).exists());
    }
}
