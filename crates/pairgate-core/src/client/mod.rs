//! Seam to the external messaging-protocol client.
//!
//! Pairgate never speaks the messaging protocol itself. A [`MessagingClient`]
//! opens a [`Connection`] backed by a credential directory and hands back a
//! stream of [`ConnectionEvent`]s. Exactly one consumer (the session driver)
//! reads that stream.

pub mod bridge;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::phone::PhoneNumber;

pub use bridge::{BridgeClient, BridgeConfig};

/// Lifecycle events fired by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The transport is (re)connecting.
    Connecting,
    /// The account is authenticated. `user_id` is the account's own address.
    Open { user_id: String },
    /// The connection dropped.
    Close { reason: DisconnectReason },
    /// Incremental authentication state changed and should be persisted.
    CredentialsUpdated,
    /// The client finished writing all auxiliary state after opening.
    Settled,
}

/// Why a connection closed, decoded from the protocol's status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// 401: credentials were revoked or never authorized.
    LoggedOut,
    /// 403
    Forbidden,
    /// 500: persisted state is corrupt.
    BadSession,
    /// 440: another client took over the session.
    ConnectionReplaced,
    /// 411
    MultideviceMismatch,
    /// 515: the server wants a fresh connection (normal right after pairing).
    RestartRequired,
    /// 408
    TimedOut,
    /// 428
    ConnectionClosed,
    /// 503
    Unavailable,
    /// No status code or one we do not know.
    Unknown,
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(403) => Self::Forbidden,
            Some(500) => Self::BadSession,
            Some(440) => Self::ConnectionReplaced,
            Some(411) => Self::MultideviceMismatch,
            Some(515) => Self::RestartRequired,
            Some(408) => Self::TimedOut,
            Some(428) => Self::ConnectionClosed,
            Some(503) => Self::Unavailable,
            _ => Self::Unknown,
        }
    }

    /// Authorization failures end the session; reconnecting cannot help.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::LoggedOut
                | Self::Forbidden
                | Self::BadSession
                | Self::ConnectionReplaced
                | Self::MultideviceMismatch
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LoggedOut => "logged out",
            Self::Forbidden => "forbidden",
            Self::BadSession => "bad session",
            Self::ConnectionReplaced => "connection replaced",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::RestartRequired => "restart required",
            Self::TimedOut => "timed out",
            Self::ConnectionClosed => "connection closed",
            Self::Unavailable => "service unavailable",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Protocol request failed: {0}")]
    Request(String),

    #[error("Connection is closed")]
    Closed,
}

/// Receiving half of a connection's lifecycle events.
pub type EventStream = mpsc::Receiver<ConnectionEvent>;

/// A freshly opened connection together with its event stream.
pub struct ClientSession {
    pub connection: Arc<dyn Connection>,
    pub events: EventStream,
}

/// Factory for protocol connections.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Begin authentication using the state persisted in `auth_dir`.
    async fn connect(&self, auth_dir: &Path) -> Result<ClientSession, ClientError>;
}

/// One live protocol connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the persisted state already belongs to a paired account.
    fn is_registered(&self) -> bool;

    /// Ask the server for a pairing code bound to `phone`.
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String, ClientError>;

    async fn send_text(&self, to: &str, text: &str) -> Result<(), ClientError>;

    /// Run the client's own credential persistence routine.
    async fn save_credentials(&self) -> Result<(), ClientError>;

    async fn close(&self) -> Result<(), ClientError>;
}

/// Present a raw pairing code as `XXXX-XXXX`.
///
/// Codes that are not eight characters long are returned uppercased but
/// otherwise untouched.
pub fn format_pairing_code(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if compact.len() == 8 {
        format!("{}-{}", &compact[..4], &compact[4..])
    } else {
        compact
    }
}
