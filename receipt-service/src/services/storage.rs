//! Object storage behind a trait so the rest of the service never sees the
//! backing store.

use async_trait::async_trait;
use service_core::error::AppError;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), AppError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError>;
    async fn exists(&self, key: &str) -> Result<bool, AppError>;

    /// Move an object from `temp_key` to `permanent_key`. The temp object
    /// ceases to exist on success.
    async fn promote(&self, temp_key: &str, permanent_key: &str) -> Result<(), AppError>;
}

/// Filesystem-backed store. Keys are slash-separated paths under a root
/// directory.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        // Reject anything that could escape the root.
        let escapes = relative.components().any(|c| {
            !matches!(c, Component::Normal(_))
        });
        if key.is_empty() || escapes {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invalid object key: {key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), AppError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(anyhow::anyhow!("object not found: {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let path = self.resolve(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn promote(&self, temp_key: &str, permanent_key: &str) -> Result<(), AppError> {
        let from = self.resolve(temp_key)?;
        let to = self.resolve(permanent_key)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(
                anyhow::anyhow!("object not found: {temp_key}"),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
