//! Per-session state and the status transition table.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::Connection;
use crate::phone::PhoneNumber;

/// Unique identifier for a pairing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a pairing attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    WaitingForCode,
    CodeSent,
    Connected,
    Exported,
    Closed,
}

impl SessionStatus {
    /// Whether `self -> next` is in the transition table.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (WaitingForCode, CodeSent)
                | (WaitingForCode, Closed)
                | (CodeSent, Connected)
                | (CodeSent, Closed)
                | (Connected, Exported)
                | (Connected, Closed)
                | (Exported, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Exported | SessionStatus::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::WaitingForCode => "waiting_for_code",
            SessionStatus::CodeSent => "code_sent",
            SessionStatus::Connected => "connected",
            SessionStatus::Exported => "exported",
            SessionStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration data for a new session.
pub struct SessionConfig {
    pub phone_number: PhoneNumber,
    pub auth_dir: PathBuf,
    pub connection: Arc<dyn Connection>,
}

/// A tracked pairing attempt. Owned by the registry until taken out for release.
pub struct Session {
    pub id: SessionId,
    pub phone_number: PhoneNumber,
    pub status: SessionStatus,
    /// Monotonic creation time, used for ageing.
    pub created_at: Instant,
    /// Wall-clock creation time, used for reporting.
    pub created_at_utc: DateTime<Utc>,
    pub auth_dir: PathBuf,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) driver: Option<AbortHandle>,
}

impl Session {
    pub fn new(id: SessionId, config: SessionConfig) -> Self {
        Self {
            id,
            phone_number: config.phone_number,
            status: SessionStatus::WaitingForCode,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            auth_dir: config.auth_dir,
            connection: config.connection,
            driver: None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            phone_number: self.phone_number.clone(),
            status: self.status,
            created_at: self.created_at_utc,
            auth_dir: self.auth_dir.clone(),
        }
    }

    /// Stop the driver task, if one is attached.
    ///
    /// A driver releasing its own session must call [`Session::detach_driver`]
    /// first, or it would cancel itself.
    pub fn abort_driver(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
    }

    pub fn detach_driver(&mut self) {
        self.driver = None;
    }

    /// Close the connection and delete the credential directory.
    ///
    /// Both steps are best-effort: failures are logged, never returned.
    pub async fn release(mut self) {
        self.abort_driver();

        if let Err(e) = self.connection.close().await {
            log::warn!("Failed to close connection for session {}: {}", self.id, e);
        }

        match tokio::fs::remove_dir_all(&self.auth_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove credential directory {}: {}",
                self.auth_dir.display(),
                e
            ),
        }
    }
}

/// Read-only view of a session, safe to hand out of the registry lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub phone_number: PhoneNumber,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub auth_dir: PathBuf,
}
