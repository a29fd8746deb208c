//! Object storage for finished job artifacts.
//!
//! Artifacts live under `{root}/{job_id}/{file_name}` and are served back by
//! the HTTP surface at `{public_base_url}/files/{job_id}/{file_name}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object name '{0}'")]
    InvalidName(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// `{job_id}/{file_name}`
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, job_id: &str, local_file: &Path) -> Result<StoredObject, StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("podcast-engine")
        .join("artifacts")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a `{job_id}/{file_name}` pair back to disk. `None` for anything
    /// that could escape the storage root.
    pub fn resolve(&self, job_id: &str, file_name: &str) -> Option<PathBuf> {
        if !is_plain_name(job_id) || !is_plain_name(file_name) {
            return None;
        }
        let path = self.root.join(job_id).join(file_name);
        path.starts_with(&self.root).then_some(path)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(&self, job_id: &str, local_file: &Path) -> Result<StoredObject, StorageError> {
        let file_name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidName(local_file.display().to_string()))?;
        let target = self
            .resolve(job_id, file_name)
            .ok_or_else(|| StorageError::InvalidName(format!("{}/{}", job_id, file_name)))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(local_file, &target).await?;
        tracing::debug!(job_id, file = file_name, bytes, "artifact stored");

        Ok(StoredObject {
            key: format!("{}/{}", job_id, file_name),
            url: format!("{}/files/{}/{}", self.public_base_url, job_id, file_name),
        })
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_copies_and_builds_url() {
        let src_dir = tempfile::TempDir::new().unwrap();
        let root = tempfile::TempDir::new().unwrap();
        let file = src_dir.path().join("episode.mp3");
        std::fs::write(&file, b"ID3 fake").unwrap();

        let storage = LocalObjectStorage::new(root.path(), "http://localhost:8080/");
        let stored = storage.upload("job-1", &file).await.unwrap();

        assert_eq!(stored.key, "job-1/episode.mp3");
        assert_eq!(stored.url, "http://localhost:8080/files/job-1/episode.mp3");
        let copied = std::fs::read(root.path().join("job-1").join("episode.mp3")).unwrap();
        assert_eq!(copied, b"ID3 fake");
    }

    #[test]
    fn resolve_rejects_traversal() {
        let storage = LocalObjectStorage::new("/srv/artifacts", "http://x");
        assert!(storage.resolve("..", "passwd").is_none());
        assert!(storage.resolve("job", "../../etc/passwd").is_none());
        assert!(storage.resolve("job", "a\\b").is_none());
        assert_eq!(
            storage.resolve("job", "script.json"),
            Some(PathBuf::from("/srv/artifacts/job/script.json"))
        );
    }

    #[test]
    fn missing_source_is_io_error() {
        let root = tempfile::TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(root.path(), "http://x");
        let err = tokio_test::assert_err!(tokio_test::block_on(
            storage.upload("job", Path::new("/no/such/file.mp3"))
        ));
        assert!(matches!(err, StorageError::Io(_)));
    }
}
