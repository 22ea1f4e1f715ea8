//! Connection orchestration: from a phone number to exported credentials.
//!
//! [`Orchestrator::request_code`] provisions a credential directory, opens a
//! protocol connection, obtains a pairing code and registers the session.
//! From then on a single driver task per session consumes the connection's
//! events and is the only code that moves the session through its states:
//!
//! ```text
//! waiting_for_code -> code_sent -> connected -> exported -> closed
//!          \               \            \
//!           `---------------`------------`---> closed
//! ```
//!
//! The sweeper never transitions a session; it takes it out of the registry
//! and aborts the driver before releasing anything.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::client::{
    format_pairing_code, ClientError, ClientSession, Connection, ConnectionEvent,
    DisconnectReason, EventStream, MessagingClient,
};
use crate::config::PairingConfig;
use crate::event_bus::{EventBus, LifecycleEvent, LifecycleKind};
use crate::exporter::CredentialExporter;
use crate::logging::{log_line, open_transcript, TranscriptHandle};
use crate::notifier::Notifier;
use crate::phone::PhoneNumber;
use crate::session::{SessionConfig, SessionError, SessionId, SessionRegistry, SessionStatus};
use crate::storage::ObjectStorage;

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("A pairing attempt for {phone} is already in progress")]
    PairingInProgress { phone: PhoneNumber },

    #[error("Failed to provision credential directory {path}: {source}")]
    Provision {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to initialize messaging client: {0}")]
    ClientInit(ClientError),

    #[error("Phone number is already registered")]
    AlreadyRegistered,

    #[error("Failed to obtain pairing code: {0}")]
    PairingCode(ClientError),

    #[error(transparent)]
    Registry(#[from] SessionError),

    #[error("Pairing task failed: {0}")]
    Task(String),
}

/// What the HTTP caller gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingTicket {
    pub session_id: SessionId,
    /// Formatted as `XXXX-XXXX`.
    pub code: String,
}

pub struct Orchestrator {
    client: Arc<dyn MessagingClient>,
    registry: Arc<SessionRegistry>,
    events: Arc<EventBus>,
    exporter: CredentialExporter,
    notifier: Notifier,
    config: PairingConfig,
    /// Numbers between the duplicate check and registration.
    pending: Mutex<HashSet<PhoneNumber>>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        storage: Arc<dyn ObjectStorage>,
        registry: Arc<SessionRegistry>,
        events: Arc<EventBus>,
        config: PairingConfig,
    ) -> Self {
        Self {
            client,
            exporter: CredentialExporter::new(storage, &config),
            notifier: Notifier::new(config.message_template.clone()),
            registry,
            events,
            config,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// Start a pairing attempt and return its code.
    ///
    /// The attempt runs on its own task, so dropping the returned future does
    /// not interrupt it: it either registers the session or cleans up. On any
    /// error the connection is closed, the credential directory is removed and
    /// nothing is registered.
    pub async fn request_code(
        self: &Arc<Self>,
        phone: PhoneNumber,
    ) -> Result<PairingTicket, PairingError> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.start_pairing(phone).await })
            .await
            .map_err(|e| PairingError::Task(e.to_string()))?
    }

    async fn start_pairing(
        self: &Arc<Self>,
        phone: PhoneNumber,
    ) -> Result<PairingTicket, PairingError> {
        let _reservation = self.reserve(&phone)?;

        let id = SessionId::new();
        let auth_dir = self.config.credentials_dir.join(id.as_str());
        tokio::fs::create_dir_all(&auth_dir)
            .await
            .map_err(|source| PairingError::Provision {
                path: auth_dir.clone(),
                source,
            })?;

        let transcript = open_transcript(self.config.transcript_dir.as_deref(), id.as_str());
        log_line(&transcript, "REQUEST", phone.as_str());

        let ClientSession { connection, events } = match self.client.connect(&auth_dir).await {
            Ok(session) => session,
            Err(e) => {
                discard_dir(&auth_dir).await;
                log_line(&transcript, "FAILED", &e.to_string());
                return Err(PairingError::ClientInit(e));
            }
        };

        if connection.is_registered() {
            abandon(connection.as_ref(), &auth_dir).await;
            log_line(&transcript, "FAILED", "already registered");
            return Err(PairingError::AlreadyRegistered);
        }

        if !self.config.pairing_delay.is_zero() {
            tokio::time::sleep(self.config.pairing_delay).await;
        }

        let raw_code = match connection.request_pairing_code(&phone).await {
            Ok(code) => code,
            Err(e) => {
                abandon(connection.as_ref(), &auth_dir).await;
                log_line(&transcript, "FAILED", &e.to_string());
                return Err(PairingError::PairingCode(e));
            }
        };
        let code = format_pairing_code(&raw_code);

        let registered = self.registry.create(
            id.clone(),
            SessionConfig {
                phone_number: phone.clone(),
                auth_dir: auth_dir.clone(),
                connection: Arc::clone(&connection),
            },
        );
        if let Err(e) = registered {
            abandon(connection.as_ref(), &auth_dir).await;
            return Err(e.into());
        }
        self.events.status(&id, SessionStatus::WaitingForCode);

        // Fresh entry, so this cannot be out of order.
        if let Err(e) = self.registry.transition(&id, SessionStatus::CodeSent) {
            if let Some(session) = self.registry.take(&id) {
                session.release().await;
            }
            return Err(e.into());
        }
        self.events.status(&id, SessionStatus::CodeSent);
        log_line(&transcript, "STATUS", SessionStatus::CodeSent.as_str());

        let driver = SessionDriver {
            orchestrator: Arc::clone(self),
            id: id.clone(),
            phone,
            auth_dir,
            transcript,
            connection,
            events,
            reconnects: 0,
        };
        let task = tokio::spawn(driver.run());
        self.registry.attach_driver(&id, task.abort_handle());

        log::info!("Pairing code issued for session {}", id);

        Ok(PairingTicket {
            session_id: id,
            code,
        })
    }

    /// Release every remaining session. Called once on process shutdown.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        if !sessions.is_empty() {
            log::info!("Releasing {} session(s) on shutdown", sessions.len());
        }
        for session in sessions {
            let id = session.id.clone();
            session.release().await;
            self.events.status(&id, SessionStatus::Closed);
        }
    }

    /// Remove credential directories that belong to no registered session.
    ///
    /// A process that was killed never released its sessions, and their
    /// directories still hold live credentials. Returns how many were removed.
    pub async fn purge_stale_credentials(&self) -> std::io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.config.credentials_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = SessionId(entry.file_name().to_string_lossy().into_owned());
            if self.registry.contains(&id) {
                continue;
            }
            log::debug!("Removing stale credential directory {}", entry.path().display());
            tokio::fs::remove_dir_all(entry.path()).await?;
            removed += 1;
        }
        Ok(removed)
    }

    fn reserve(&self, phone: &PhoneNumber) -> Result<Reservation<'_>, PairingError> {
        if !self.config.reject_duplicate_numbers {
            return Ok(Reservation {
                pending: &self.pending,
                phone: None,
            });
        }

        // Check the registry while holding `pending` so a concurrent request
        // sees either our reservation or our registered session.
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.registry.find_active_by_phone(phone).is_some() || !pending.insert(phone.clone()) {
            return Err(PairingError::PairingInProgress {
                phone: phone.clone(),
            });
        }

        Ok(Reservation {
            pending: &self.pending,
            phone: Some(phone.clone()),
        })
    }
}

struct Reservation<'a> {
    pending: &'a Mutex<HashSet<PhoneNumber>>,
    phone: Option<PhoneNumber>,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(phone) = self.phone.take() {
            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&phone);
        }
    }
}

enum Outcome {
    Exported,
    Failed(String),
}

/// Owns one session's event stream. The only mutator of that session.
struct SessionDriver {
    orchestrator: Arc<Orchestrator>,
    id: SessionId,
    phone: PhoneNumber,
    auth_dir: PathBuf,
    transcript: TranscriptHandle,
    connection: Arc<dyn Connection>,
    events: EventStream,
    reconnects: u32,
}

impl SessionDriver {
    async fn run(mut self) {
        let outcome = self.drive().await;
        self.finish(outcome).await;
    }

    async fn drive(&mut self) -> Outcome {
        loop {
            let Some(event) = self.events.recv().await else {
                return Outcome::Failed("event stream ended".to_string());
            };
            log_line(&self.transcript, "EVENT", &format!("{:?}", event));

            match event {
                ConnectionEvent::Connecting | ConnectionEvent::Settled => {}
                ConnectionEvent::CredentialsUpdated => self.save_credentials().await,
                ConnectionEvent::Open { user_id } => {
                    match self
                        .orchestrator
                        .registry
                        .transition(&self.id, SessionStatus::Connected)
                    {
                        Ok(_) => {
                            self.orchestrator
                                .events
                                .status(&self.id, SessionStatus::Connected);
                            return self.complete(&user_id).await;
                        }
                        Err(e) => log::warn!("Ignoring open event: {}", e),
                    }
                }
                ConnectionEvent::Close { reason } => {
                    if reason.is_terminal() {
                        return Outcome::Failed(format!("connection closed: {}", reason));
                    }
                    if !self.reconnect(reason).await {
                        return Outcome::Failed(format!(
                            "connection closed ({}) and reconnecting failed",
                            reason
                        ));
                    }
                }
            }
        }
    }

    /// Export, notify, and report. Runs at most once per session.
    async fn complete(&mut self, user_id: &str) -> Outcome {
        if let Err(reason) = self.settle().await {
            return Outcome::Failed(reason);
        }

        let exporter = &self.orchestrator.exporter;
        let exported = match exporter.export(&self.auth_dir).await {
            Ok(exported) => exported,
            Err(e) => {
                log::error!("Export failed for session {}: {}", self.id, e);
                return Outcome::Failed(e.to_string());
            }
        };

        if let Err(e) = self
            .orchestrator
            .registry
            .transition(&self.id, SessionStatus::Exported)
        {
            log::warn!("Session {} exported but not tracked: {}", self.id, e);
        }
        self.orchestrator.events.emit(LifecycleEvent::new(
            self.id.clone(),
            LifecycleKind::Exported {
                session_code: exported.session_code.clone(),
            },
        ));
        log_line(&self.transcript, "EXPORTED", &exported.object_name);

        match self
            .orchestrator
            .notifier
            .notify(self.connection.as_ref(), user_id, &self.phone, &exported)
            .await
        {
            Ok(to) => {
                log::info!("Session code for {} delivered to {}", self.id, to);
                log_line(&self.transcript, "NOTIFIED", &to);
            }
            Err(e) => {
                log::warn!("{}", e);
                log_line(&self.transcript, "NOTIFY FAILED", &e.to_string());
            }
        }

        let delay = self.orchestrator.config.cleanup_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Outcome::Exported
    }

    /// Wait until the client reports it has settled or the grace period ends.
    async fn settle(&mut self) -> Result<(), String> {
        let grace = tokio::time::sleep(self.orchestrator.exporter.grace());
        tokio::pin!(grace);

        loop {
            tokio::select! {
                _ = &mut grace => return Ok(()),
                event = self.events.recv() => match event {
                    Some(ConnectionEvent::Settled) => return Ok(()),
                    Some(ConnectionEvent::CredentialsUpdated) => self.save_credentials().await,
                    Some(ConnectionEvent::Close { reason }) => {
                        return Err(format!("connection closed before export: {}", reason));
                    }
                    Some(ConnectionEvent::Open { .. }) => {
                        log::debug!("Ignoring repeated open for session {}", self.id);
                    }
                    Some(ConnectionEvent::Connecting) => {}
                    None => return Err("event stream ended before export".to_string()),
                }
            }
        }
    }

    /// Reconnect with the same credential directory under the retry policy.
    async fn reconnect(&mut self, reason: DisconnectReason) -> bool {
        let orchestrator = Arc::clone(&self.orchestrator);
        let policy = &orchestrator.config.reconnect;

        if let Err(e) = self.connection.close().await {
            log::debug!("Closing dropped connection for {}: {}", self.id, e);
        }

        while let Some(delay) = policy.delay_for(self.reconnects) {
            self.reconnects += 1;
            log::info!(
                "Session {} closed ({}), reconnect {}/{} in {:?}",
                self.id,
                reason,
                self.reconnects,
                policy.max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;

            match self.connect_again().await {
                Ok(Some(ClientSession { connection, events })) => {
                    log_line(&self.transcript, "RECONNECTED", &self.reconnects.to_string());
                    self.connection = connection;
                    self.events = events;
                    return true;
                }
                Ok(None) => return false,
                Err(e) => log::warn!("Reconnect failed for session {}: {}", self.id, e),
            }
        }

        log::warn!(
            "Session {} closed ({}) with no reconnects left",
            self.id,
            reason
        );
        false
    }

    /// Open a new connection on a separate task that also installs it.
    ///
    /// If this driver is aborted mid-connect the task still finishes, and a
    /// connection for a session that is no longer registered gets closed.
    /// `Ok(None)` means the session is gone.
    async fn connect_again(&self) -> Result<Option<ClientSession>, ClientError> {
        let client = Arc::clone(&self.orchestrator.client);
        let registry = Arc::clone(&self.orchestrator.registry);
        let id = self.id.clone();
        let auth_dir = self.auth_dir.clone();

        let task = tokio::spawn(async move {
            let session = match client.connect(&auth_dir).await {
                Ok(session) => session,
                Err(e) => return Err(e),
            };
            if registry
                .replace_connection(&id, Arc::clone(&session.connection))
                .is_err()
            {
                log::info!("Session {} ended while reconnecting, closing new connection", id);
                if let Err(e) = session.connection.close().await {
                    log::warn!("Failed to close orphaned connection for {}: {}", id, e);
                }
                return Ok(None);
            }
            Ok(Some(session))
        });

        task.await
            .map_err(|e| ClientError::Connect(format!("reconnect task failed: {}", e)))?
    }

    async fn save_credentials(&self) {
        if let Err(e) = self.connection.save_credentials().await {
            log::warn!("Failed to persist credentials for {}: {}", self.id, e);
        }
    }

    async fn finish(self, outcome: Outcome) {
        let orchestrator = &self.orchestrator;

        if let Outcome::Failed(reason) = &outcome {
            log::warn!("Session {} discarded: {}", self.id, reason);
            log_line(&self.transcript, "FAILED", reason);
            orchestrator.events.failed(&self.id, reason.clone());
        }

        let _ = orchestrator
            .registry
            .transition(&self.id, SessionStatus::Closed);
        if let Some(mut session) = orchestrator.registry.take(&self.id) {
            session.detach_driver();
            session.release().await;
            orchestrator.events.status(&self.id, SessionStatus::Closed);
            log_line(&self.transcript, "STATUS", SessionStatus::Closed.as_str());
        }
    }
}

/// Close a connection that never made it into the registry and drop its directory.
async fn abandon(connection: &dyn Connection, auth_dir: &Path) {
    if let Err(e) = connection.close().await {
        log::warn!("Failed to close abandoned connection: {}", e);
    }
    discard_dir(auth_dir).await;
}

async fn discard_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", dir.display(), e),
    }
}
