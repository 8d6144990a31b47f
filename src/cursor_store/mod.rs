//! Cursor Store - Durable Delivery Progress
//!
//! ## Responsibilities
//!
//! - Persist `last_delivered_id` across process restarts
//! - Make the write durable before the in-memory cursor advances
//!
//! The record is a small JSON file owned exclusively by this process.
//! Writes go through a temp file with `sync_all` followed by an atomic
//! rename, so a crash between delivery and persistence re-delivers the
//! batch instead of silently skipping it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    last_delivered_id: i64,
}

/// File-backed cursor store
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the persisted cursor. `None` on first run.
    pub async fn load(&self) -> Result<Option<i64>> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let record: CursorRecord = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Config(format!(
                        "corrupt cursor file {}: {e}",
                        self.path.display()
                    ))
                })?;
                Ok(Some(record.last_delivered_id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Durably persist the cursor value.
    pub async fn persist(&self, last_delivered_id: i64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec(&CursorRecord { last_delivered_id })?;
        let tmp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(
            last_delivered_id,
            path = %self.path.display(),
            "Cursor persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("cursor.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("cursor.json"));

        store.persist(105).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(105));
    }

    #[tokio::test]
    async fn test_persist_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("cursor.json"));

        store.persist(100).await.unwrap();
        store.persist(250).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(250));
    }

    #[tokio::test]
    async fn test_survives_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");

        CursorStore::new(path.clone()).persist(77).await.unwrap();
        let reopened = CursorStore::new(path);
        assert_eq!(reopened.load().await.unwrap(), Some(77));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = CursorStore::new(path);
        assert!(store.load().await.is_err());
    }
}
