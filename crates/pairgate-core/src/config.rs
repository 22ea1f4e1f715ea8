//! Tunables for the pairing pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default message sent to the paired account once its credentials are stored.
pub const DEFAULT_MESSAGE_TEMPLATE: &str = "Your session for +{phone} is ready.\n\n\
Session code: {code}\n\
Link: {link}\n\n\
Keep this code private. Anyone holding it can use your account.";

#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// Parent of every per-session credential directory.
    pub credentials_dir: PathBuf,
    /// Pause between connecting and asking for a pairing code, letting the
    /// client finish its handshake.
    pub pairing_delay: Duration,
    /// Upper bound on waiting for the client to settle after `open` before
    /// reading the credential file.
    pub export_grace: Duration,
    /// Pause after notifying before the connection is torn down, so the
    /// message can leave the socket.
    pub cleanup_delay: Duration,
    pub max_session_age: Duration,
    pub sweep_interval: Duration,
    pub reconnect: RetryPolicy,
    /// Refuse a second pairing attempt for a number that already has one in flight.
    pub reject_duplicate_numbers: bool,
    /// Prefix for uploaded object names.
    pub upload_prefix: String,
    /// Part of the shareable link stripped to form the session code.
    pub link_prefix: Option<String>,
    /// Message template with `{phone}`, `{code}` and `{link}` placeholders.
    pub message_template: String,
    /// Where per-session transcripts go. `None` disables them.
    pub transcript_dir: Option<PathBuf>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            credentials_dir: PathBuf::from("sessions"),
            pairing_delay: Duration::from_millis(1500),
            export_grace: Duration::from_secs(10),
            cleanup_delay: Duration::from_millis(100),
            max_session_age: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            reconnect: RetryPolicy::default(),
            reject_duplicate_numbers: true,
            upload_prefix: "pairgate".to_string(),
            link_prefix: None,
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            transcript_dir: None,
        }
    }
}

impl PairingConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials_dir: data_dir.into().join("sessions"),
            ..Self::default()
        }
    }
}
