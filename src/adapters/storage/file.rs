//! Local filesystem session storage.
//!
//! One pretty-printed JSON document per session, `<root>/<session_id>.json`.
//! Saves write a sibling temporary file and rename it into place so a
//! crash mid-write never leaves a truncated document behind.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::domain::errors::StorageError;
use crate::domain::models::SessionState;
use crate::domain::ports::StorageBackend;

/// Stores each session as a JSON file under a root directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// The directory is created lazily on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StorageError> {
        match tokio::fs::read(self.path_for(session_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let target = self.path_for(session_id);
        let temp = self.root.join(format!(".{session_id}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &target).await?;
        tracing::trace!(session_id, path = %target.display(), "Session saved");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn ping(&self) -> Result<(), StorageError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Connection(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            // Not created yet; the first save will create it.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
