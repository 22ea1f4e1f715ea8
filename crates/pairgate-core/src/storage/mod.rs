//! Seam to external object storage.
//!
//! Uploads are not idempotent: every call creates a new object and a new
//! shareable link.

mod http;
mod local;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

pub use http::{HttpStorage, HttpStorageConfig};
pub use local::LocalStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("Upload response had no shareable link")]
    MissingLink,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that stores a blob under a name and hands back a shareable link.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, StorageError>;
}

/// Generate a fresh object name: `<prefix>~<6 alphanumerics><0-9999>.json`.
pub fn random_object_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let tag: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let number: u16 = rng.gen_range(0..10_000);
    format!("{}~{}{}.json", prefix, tag, number)
}

/// Derive the session code presented to the user from a shareable link.
///
/// With a known link prefix the code is whatever follows it (fragment
/// included, since some providers keep the decryption key there). Without
/// one, the last path segment of the link is used.
pub fn session_code_from_link(link: &str, link_prefix: Option<&str>) -> String {
    if let Some(code) = link_prefix.and_then(|prefix| link.strip_prefix(prefix)) {
        return code.to_string();
    }

    let trimmed = link.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, last)) if !last.is_empty() => last.to_string(),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod object_name {
        use super::*;

        #[test]
        fn has_prefix_and_json_extension() {
            let name = random_object_name("pairgate");
            assert!(name.starts_with("pairgate~"));
            assert!(name.ends_with(".json"));
        }

        #[test]
        fn random_part_is_alphanumeric() {
            let name = random_object_name("p");
            let body = name
                .strip_prefix("p~")
                .and_then(|s| s.strip_suffix(".json"))
                .unwrap();
            assert!(body.len() >= 7 && body.len() <= 10);
            assert!(body.chars().all(|c| c.is_ascii_alphanumeric()));
        }

        #[test]
        fn names_differ() {
            let a = random_object_name("p");
            let b = random_object_name("p");
            assert_ne!(a, b);
        }
    }

    mod session_code {
        use super::*;

        #[test]
        fn strips_known_prefix() {
            let code = session_code_from_link(
                "https://mega.nz/file/AbCd1234#key-part",
                Some("https://mega.nz/file/"),
            );
            assert_eq!(code, "AbCd1234#key-part");
        }

        #[test]
        fn falls_back_to_last_segment() {
            let code = session_code_from_link("https://files.example.com/s/XyZ987", None);
            assert_eq!(code, "XyZ987");
        }

        #[test]
        fn unmatched_prefix_falls_back_to_last_segment() {
            let code = session_code_from_link(
                "https://files.example.com/s/XyZ987/",
                Some("https://mega.nz/file/"),
            );
            assert_eq!(code, "XyZ987");
        }

        #[test]
        fn link_without_slash_is_returned_whole() {
            assert_eq!(session_code_from_link("opaque-ref", None), "opaque-ref");
        }
    }
}
