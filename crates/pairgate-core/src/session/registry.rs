//! SessionRegistry - the single owner of every in-flight pairing attempt.

use super::state::{Session, SessionConfig, SessionId, SessionSnapshot, SessionStatus};
use crate::client::Connection;
use crate::phone::PhoneNumber;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("Session {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
}

/// Tracks all pairing sessions.
///
/// One registry is created at startup and shared by `Arc` between the
/// orchestrator, the sweeper and the HTTP handlers. The lock is never held
/// across an await point; anything that needs async work takes the entry out
/// with [`SessionRegistry::take`] first.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new session in `waiting_for_code`.
    pub fn create(
        &self,
        id: SessionId,
        config: SessionConfig,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut sessions = self.lock();
        if sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }
        let session = Session::new(id.clone(), config);
        let snapshot = session.snapshot();
        sessions.insert(id, session);
        Ok(snapshot)
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.lock().get(id).map(Session::snapshot)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    /// Drop a session without releasing its resources.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Take ownership of a session so its resources can be released.
    pub fn take(&self, id: &SessionId) -> Option<Session> {
        self.lock().remove(id)
    }

    /// Move a session along the transition table. Returns the previous status.
    pub fn transition(
        &self,
        id: &SessionId,
        to: SessionStatus,
    ) -> Result<SessionStatus, SessionError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        let from = session.status;
        if !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            });
        }
        session.status = to;
        Ok(from)
    }

    /// Record the task that drives this session. Returns `false` if the
    /// session is already gone, in which case the task is aborted.
    pub fn attach_driver(&self, id: &SessionId, handle: AbortHandle) -> bool {
        match self.lock().get_mut(id) {
            Some(session) => {
                session.driver = Some(handle);
                true
            }
            None => {
                handle.abort();
                false
            }
        }
    }

    /// Swap in a new connection after a reconnect.
    pub fn replace_connection(
        &self,
        id: &SessionId,
        connection: Arc<dyn Connection>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        session.connection = connection;
        Ok(())
    }

    /// Find a session for `phone` that has not reached a terminal status.
    pub fn find_active_by_phone(&self, phone: &PhoneNumber) -> Option<SessionId> {
        self.lock()
            .values()
            .find(|s| &s.phone_number == phone && !s.status.is_terminal())
            .map(|s| s.id.clone())
    }

    /// Take out every non-exported session older than `max_age` at `now`.
    pub fn take_expired(&self, max_age: Duration, now: Instant) -> Vec<Session> {
        let mut sessions = self.lock();
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.status != SessionStatus::Exported)
            .filter(|s| now.saturating_duration_since(s.created_at) > max_age)
            .map(|s| s.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }

    /// Take out every session, for shutdown.
    pub fn drain(&self) -> Vec<Session> {
        self.lock().drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.lock().values().map(Session::snapshot).collect()
    }
}
