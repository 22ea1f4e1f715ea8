//! Filesystem-backed storage for development and self-hosting.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{ObjectStorage, StorageError};

/// Writes objects into a directory and links to them under a public base URL.
pub struct LocalStorage {
    root: PathBuf,
    public_base: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, StorageError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StorageError::Rejected(format!("Invalid object name: {}", name)));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(name), data).await?;

        Ok(format!("{}/{}", self.public_base.trim_end_matches('/'), name))
    }
}
