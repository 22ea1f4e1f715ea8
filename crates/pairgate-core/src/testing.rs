//! Scripted fakes for the client and storage seams.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::client::{ClientError, ClientSession, Connection, ConnectionEvent, MessagingClient};
use crate::phone::PhoneNumber;
use crate::storage::{ObjectStorage, StorageError};

#[derive(Default)]
pub struct FakeConnection {
    pub registered: bool,
    pub fail_pairing: bool,
    pub fail_send: bool,
    pub sent: Mutex<Vec<(String, String)>>,
    pub saves: AtomicUsize,
    pub closed: AtomicBool,
}

#[async_trait]
impl Connection for FakeConnection {
    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self, _phone: &PhoneNumber) -> Result<String, ClientError> {
        if self.fail_pairing {
            return Err(ClientError::Request("rate limited".to_string()));
        }
        Ok("abcd1234".to_string())
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), ClientError> {
        if self.fail_send {
            return Err(ClientError::Request("not delivered".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        Ok(())
    }

    async fn save_credentials(&self) -> Result<(), ClientError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Client whose connections are driven by the test through [`FakeClient::emit`].
#[derive(Default)]
pub struct FakeClient {
    pub registered: bool,
    pub fail_pairing: bool,
    pub fail_send: bool,
    pub fail_connect: AtomicBool,
    /// Write a credential file into the auth dir on every connect.
    pub write_credentials: bool,
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
    pub senders: Mutex<Vec<mpsc::Sender<ConnectionEvent>>>,
    pub auth_dirs: Mutex<Vec<PathBuf>>,
    /// Connect calls started, including ones still waiting on the gate.
    pub connect_calls: AtomicUsize,
    /// When set, each connect waits for one notification before finishing.
    pub connect_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeClient {
    pub fn connect_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        Arc::clone(&self.connections.lock().unwrap()[index])
    }

    pub fn last_connection(&self) -> Arc<FakeConnection> {
        Arc::clone(self.connections.lock().unwrap().last().unwrap())
    }

    pub fn last_auth_dir(&self) -> PathBuf {
        self.auth_dirs.lock().unwrap().last().unwrap().clone()
    }

    /// Make later connects wait until the returned gate is notified.
    pub fn hold_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Deliver an event on the most recent connection's stream.
    pub async fn emit(&self, event: ConnectionEvent) {
        let sender = self.senders.lock().unwrap().last().unwrap().clone();
        sender.send(event).await.unwrap();
    }

    /// End the most recent connection's event stream.
    pub fn hang_up(&self) {
        self.senders.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn connect(&self, auth_dir: &Path) -> Result<ClientSession, ClientError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.connect_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Connect("bridge unavailable".to_string()));
        }
        if self.write_credentials {
            std::fs::write(auth_dir.join("creds.json"), b"{\"me\":{\"id\":\"1\"}}").unwrap();
        }

        let connection = Arc::new(FakeConnection {
            registered: self.registered,
            fail_pairing: self.fail_pairing,
            fail_send: self.fail_send,
            ..FakeConnection::default()
        });
        let (tx, rx) = mpsc::channel(16);

        self.connections.lock().unwrap().push(Arc::clone(&connection));
        self.senders.lock().unwrap().push(tx);
        self.auth_dirs.lock().unwrap().push(auth_dir.to_path_buf());

        Ok(ClientSession {
            connection,
            events: rx,
        })
    }
}

#[derive(Default)]
pub struct RecordingStorage {
    pub fail: bool,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingStorage {
    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, StorageError> {
        if self.fail {
            return Err(StorageError::Rejected("quota exceeded".to_string()));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((name.to_string(), data));
        Ok(format!("https://files.example.com/file/{}", name.trim_end_matches(".json")))
    }
}
