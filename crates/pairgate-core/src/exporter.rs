//! Credential export: read the finished credential file and upload it.
//!
//! The caller is responsible for the grace period before [`CredentialExporter::export`]
//! runs (see [`CredentialExporter::grace`]); the session driver ends it early
//! when the client reports it has settled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::PairingConfig;
use crate::storage::{random_object_name, session_code_from_link, ObjectStorage, StorageError};

/// Primary credential file written by the protocol client.
pub const CREDENTIALS_FILE: &str = "creds.json";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Credentials file not found: {0}")]
    MissingCredentials(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Upload failed: {0}")]
    Upload(#[from] StorageError),
}

/// Result of a successful export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedCredentials {
    pub object_name: String,
    pub link: String,
    /// The link's unique part, presented to the user as the canonical artifact.
    pub session_code: String,
}

pub struct CredentialExporter {
    storage: Arc<dyn ObjectStorage>,
    upload_prefix: String,
    link_prefix: Option<String>,
    grace: Duration,
}

impl CredentialExporter {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: &PairingConfig) -> Self {
        Self {
            storage,
            upload_prefix: config.upload_prefix.clone(),
            link_prefix: config.link_prefix.clone(),
            grace: config.export_grace,
        }
    }

    /// How long to let the client finish writing before exporting.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Read `creds.json` from `auth_dir` and upload it under a fresh name.
    ///
    /// Every call uploads a new object, so callers must invoke this at most
    /// once per session.
    pub async fn export(&self, auth_dir: &Path) -> Result<ExportedCredentials, ExportError> {
        let path = auth_dir.join(CREDENTIALS_FILE);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExportError::MissingCredentials(path));
            }
            Err(source) => return Err(ExportError::Read { path, source }),
        };

        let object_name = random_object_name(&self.upload_prefix);
        let link = self.storage.upload(&object_name, data).await?;
        let session_code = session_code_from_link(&link, self.link_prefix.as_deref());

        log::info!("Uploaded {} as {}", path.display(), object_name);

        Ok(ExportedCredentials {
            object_name,
            link,
            session_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStorage;
    use tempfile::tempdir;

    fn exporter_with(storage: Arc<RecordingStorage>, link_prefix: Option<&str>) -> CredentialExporter {
        let config = PairingConfig {
            upload_prefix: "test".to_string(),
            link_prefix: link_prefix.map(str::to_string),
            ..PairingConfig::default()
        };
        CredentialExporter::new(storage, &config)
    }

    #[tokio::test]
    async fn uploads_credentials_and_derives_code() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CREDENTIALS_FILE), b"{\"noiseKey\":1}").unwrap();
        let storage = Arc::new(RecordingStorage::default());
        let exporter = exporter_with(Arc::clone(&storage), Some("https://files.example.com/file/"));

        let exported = exporter.export(dir.path()).await.unwrap();

        assert!(exported.object_name.starts_with("test~"));
        assert_eq!(
            exported.session_code,
            exported.object_name.trim_end_matches(".json")
        );
        let uploads = storage.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, b"{\"noiseKey\":1}");
    }

    #[tokio::test]
    async fn missing_file_is_reported_not_uploaded() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(RecordingStorage::default());
        let exporter = exporter_with(Arc::clone(&storage), None);

        let err = exporter.export(dir.path()).await.unwrap_err();

        assert!(matches!(err, ExportError::MissingCredentials(_)));
        assert_eq!(storage.upload_count(), 0);
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_upload_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CREDENTIALS_FILE), b"{}").unwrap();
        let storage = Arc::new(RecordingStorage {
            fail: true,
            ..RecordingStorage::default()
        });
        let exporter = exporter_with(storage, None);

        let err = exporter.export(dir.path()).await.unwrap_err();
        assert!(matches!(err, ExportError::Upload(_)));
    }

    #[test]
    fn grace_comes_from_config() {
        let exporter = exporter_with(Arc::new(RecordingStorage::default()), None);
        assert_eq!(exporter.grace(), Duration::from_secs(10));
    }
}
