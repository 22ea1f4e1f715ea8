//! Session tracking for pairing attempts.
//!
//! A session lives from the moment a pairing code is handed out until its
//! credentials are exported, it fails, or the sweeper evicts it.

mod registry;
mod state;

pub use registry::{SessionError, SessionRegistry};
pub use state::{Session, SessionConfig, SessionId, SessionSnapshot, SessionStatus};
