//! Session lifecycle broadcasting.
//!
//! Every status change, successful export and failure is published on a
//! tokio broadcast channel. The daemon logs them; tests use them to wait for
//! a session to finish instead of sleeping.
//!
//! # Example
//!
//! ```rust
//! use pairgate_core::event_bus::{EventBus, LifecycleEvent, LifecycleKind};
//! use pairgate_core::session::{SessionId, SessionStatus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(LifecycleEvent::new(
//!     SessionId("abc".to_string()),
//!     LifecycleKind::Status { status: SessionStatus::CodeSent },
//! ));
//!
//! // In async context: let event = rx.recv().await.unwrap();
//! ```

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::{SessionId, SessionStatus};

/// Events beyond this many cause slow subscribers to lag.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleKind {
    Status { status: SessionStatus },
    Exported { session_code: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    pub fn new(session_id: SessionId, kind: LifecycleKind) -> Self {
        Self { session_id, kind }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            LifecycleKind::Status { status } => write!(f, "session {} is {}", self.session_id, status),
            LifecycleKind::Exported { session_code } => {
                write!(f, "session {} exported as {}", self.session_id, session_code)
            }
            LifecycleKind::Failed { reason } => {
                write!(f, "session {} failed: {}", self.session_id, reason)
            }
        }
    }
}

pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns how many subscribers received it.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn status(&self, session_id: &SessionId, status: SessionStatus) -> usize {
        self.emit(LifecycleEvent::new(
            session_id.clone(),
            LifecycleKind::Status { status },
        ))
    }

    pub fn failed(&self, session_id: &SessionId, reason: impl Into<String>) -> usize {
        self.emit(LifecycleEvent::new(
            session_id.clone(),
            LifecycleKind::Failed {
                reason: reason.into(),
            },
        ))
    }

    /// Past events are not replayed to new subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
