//! # pairgate-core
//!
//! Core logic for Pairgate, a service that links a messaging account to a
//! fresh device session through a pairing code and hands the resulting
//! credentials back to the account owner.
//!
//! This crate is framework-agnostic. The HTTP surface lives in
//! `pairgate-http` and the process wiring in `pairgate-daemon`.
//!
//! ## Key Concepts
//!
//! - **Session**: One pairing attempt, from code request to credential export
//! - **Connection**: A live protocol connection behind the [`client::Connection`] trait
//! - **Export**: Uploading the finished credential file and messaging its code to the account

pub mod client;
pub mod config;
pub mod event_bus;
pub mod exporter;
pub mod logging;
pub mod notifier;
pub mod orchestrator;
pub mod paths;
pub mod phone;
pub mod retry;
pub mod session;
pub mod storage;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use client::{ClientError, Connection, ConnectionEvent, MessagingClient};
pub use config::PairingConfig;
pub use event_bus::{EventBus, LifecycleEvent, LifecycleKind};
pub use orchestrator::{Orchestrator, PairingError, PairingTicket};
pub use phone::{PhoneNumber, PhoneNumberError};
pub use session::{SessionId, SessionRegistry, SessionStatus};
pub use storage::ObjectStorage;
pub use sweeper::Sweeper;
