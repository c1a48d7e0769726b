//! Removal of originals once their backup is recorded

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::services::transfer::with_timeout;

/// An original could not be deleted
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to delete '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("deleting '{path}' exceeded {budget:?}")]
    Timeout { path: PathBuf, budget: Duration },
}

/// Deletes originals from primary storage
#[derive(Debug, Clone)]
pub struct OriginalCleanup {
    budget: Duration,
}

impl OriginalCleanup {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// Delete `path`. A file that is already gone counts as a failure:
    /// nothing confirms it was the file that was backed up.
    pub async fn remove(&self, path: &Path) -> Result<(), CleanupError> {
        with_timeout(self.budget, tokio::fs::remove_file(path))
            .await
            .ok_or_else(|| CleanupError::Timeout {
                path: path.to_path_buf(),
                budget: self.budget,
            })?
            .map_err(|source| CleanupError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        info!(path = %path.display(), "Deleted original");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, b"movie").unwrap();

        OriginalCleanup::new(Duration::from_secs(5)).remove(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = OriginalCleanup::new(Duration::from_secs(5))
            .remove(&dir.path().join("gone.mkv"))
            .await;
        assert_matches!(result, Err(CleanupError::Io { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_not_removed() {
        let dir = tempfile::tempdir().unwrap();
        let result = OriginalCleanup::new(Duration::from_secs(5)).remove(dir.path()).await;
        assert_matches!(result, Err(CleanupError::Io { .. }));
        assert!(dir.path().exists());
    }
}
