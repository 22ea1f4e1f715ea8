//! Upload over plain HTTP.
//!
//! The object is `PUT` to `{endpoint}/{name}`. The shareable link is read from
//! a JSON body (`{"link": "..."}`) or, failing that, the `Location` header.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ObjectStorage, StorageError};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpStorageConfig {
    pub endpoint: String,
    pub token: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    link: Option<String>,
}

pub struct HttpStorage {
    config: HttpStorageConfig,
}

impl HttpStorage {
    pub fn new(config: HttpStorageConfig) -> Self {
        Self { config }
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), name)
    }
}

#[async_trait]
impl ObjectStorage for HttpStorage {
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, StorageError> {
        let url = self.object_url(name);
        let token = self.config.token.clone();

        tokio::task::spawn_blocking(move || {
            let mut request = ureq::put(&url)
                .timeout(UPLOAD_TIMEOUT)
                .set("Content-Type", "application/json");
            if let Some(token) = token {
                request = request.set("Authorization", &format!("Bearer {}", token));
            }

            let response = request
                .send_bytes(&data)
                .map_err(|e| StorageError::Rejected(e.to_string()))?;

            let location = response.header("Location").map(str::to_string);
            let body: Option<UploadResponse> = response.into_json().ok();

            body.and_then(|b| b.link)
                .or(location)
                .ok_or(StorageError::MissingLink)
        })
        .await
        .map_err(|e| StorageError::Rejected(format!("Upload task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_joins_endpoint_and_name() {
        let storage = HttpStorage::new(HttpStorageConfig {
            endpoint: "https://files.example.com/upload/".to_string(),
            token: None,
        });
        assert_eq!(
            storage.object_url("p~abc1231.json"),
            "https://files.example.com/upload/p~abc1231.json"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_rejected() {
        let storage = HttpStorage::new(HttpStorageConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            token: Some("secret".to_string()),
        });

        let result = storage.upload("creds.json", b"{}".to_vec()).await;
        assert!(matches!(result, Err(StorageError::Rejected(_))));
    }
}
