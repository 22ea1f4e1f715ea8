//! HTTP client for the protocol bridge sidecar.
//!
//! The external messaging-protocol library runs inside a separate bridge
//! process. Pairgate drives it through a small REST API and follows its
//! lifecycle through a server-sent event stream:
//!
//! ```text
//! POST   /sessions                     {authDir, browser} -> {id, registered}
//! GET    /sessions/{id}/events         text/event-stream
//! POST   /sessions/{id}/pairing-code   {phoneNumber} -> {code}
//! POST   /sessions/{id}/messages       {to, text}
//! POST   /sessions/{id}/credentials
//! DELETE /sessions/{id}
//! ```
//!
//! ureq is blocking, so requests run on the blocking pool and the event
//! stream is read on a dedicated thread.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{
    ClientError, ClientSession, Connection, ConnectionEvent, DisconnectReason, MessagingClient,
};
use crate::phone::PhoneNumber;

/// Events buffered between the reader thread and the session driver.
const EVENT_BUFFER: usize = 64;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the bridge lives and how to identify ourselves to it.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub base_url: String,
    /// Browser label the linked device shows up as on the phone.
    pub browser: String,
    pub token: Option<String>,
}

impl BridgeConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let request = ureq::request(method, &self.url(path));
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    id: String,
    #[serde(default)]
    registered: bool,
}

#[derive(Deserialize)]
struct PairingCodeResponse {
    code: String,
}

/// [`MessagingClient`] backed by the bridge sidecar.
pub struct BridgeClient {
    config: Arc<BridgeConfig>,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn connect(&self, auth_dir: &Path) -> Result<ClientSession, ClientError> {
        let config = Arc::clone(&self.config);
        let auth_dir = auth_dir.to_string_lossy().into_owned();

        let created: CreateSessionResponse = blocking(move || {
            let response = config
                .request("POST", "/sessions")
                .timeout(REQUEST_TIMEOUT)
                .send_json(json!({ "authDir": auth_dir, "browser": config.browser }))
                .map_err(|e| ClientError::Connect(e.to_string()))?;
            response
                .into_json()
                .map_err(|e| ClientError::Connect(format!("Invalid bridge response: {}", e)))
        })
        .await?;

        log::debug!("Bridge session {} opened", created.id);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let active = Arc::new(AtomicBool::new(true));
        spawn_event_reader(
            Arc::clone(&self.config),
            created.id.clone(),
            tx,
            Arc::clone(&active),
        );

        let connection = BridgeConnection {
            config: Arc::clone(&self.config),
            id: created.id,
            registered: created.registered,
            active,
        };

        Ok(ClientSession {
            connection: Arc::new(connection),
            events: rx,
        })
    }
}

struct BridgeConnection {
    config: Arc<BridgeConfig>,
    id: String,
    registered: bool,
    active: Arc<AtomicBool>,
}

impl BridgeConnection {
    async fn post(&self, suffix: &str, body: Value) -> Result<ureq::Response, ClientError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let config = Arc::clone(&self.config);
        let path = format!("/sessions/{}{}", self.id, suffix);
        blocking(move || {
            config
                .request("POST", &path)
                .timeout(REQUEST_TIMEOUT)
                .send_json(body)
                .map_err(|e| ClientError::Request(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl Connection for BridgeConnection {
    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String, ClientError> {
        let response = self
            .post("/pairing-code", json!({ "phoneNumber": phone.as_str() }))
            .await?;
        let body: PairingCodeResponse = response
            .into_json()
            .map_err(|e| ClientError::Request(format!("Invalid pairing code response: {}", e)))?;
        Ok(body.code)
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), ClientError> {
        self.post("/messages", json!({ "to": to, "text": text }))
            .await
            .map(|_| ())
    }

    async fn save_credentials(&self) -> Result<(), ClientError> {
        self.post("/credentials", json!({})).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), ClientError> {
        // Stop the reader first so the closing stream is not reported as a drop.
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let config = Arc::clone(&self.config);
        let path = format!("/sessions/{}", self.id);
        blocking(move || match config
            .request("DELETE", &path)
            .timeout(REQUEST_TIMEOUT)
            .call()
        {
            Ok(_) | Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(e) => Err(ClientError::Request(e.to_string())),
        })
        .await
    }
}

/// Follow `/sessions/{id}/events` and forward decoded events to the driver.
///
/// The thread ends when the stream ends, the connection is closed, or the
/// receiving side is dropped. Dropping `tx` ends the driver's event stream.
fn spawn_event_reader(
    config: Arc<BridgeConfig>,
    session_id: String,
    tx: mpsc::Sender<ConnectionEvent>,
    active: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let path = format!("/sessions/{}/events", session_id);
        let response = match config
            .request("GET", &path)
            .set("Accept", "text/event-stream")
            .call()
        {
            Ok(r) => r,
            Err(e) => {
                log::error!("Failed to follow bridge events for {}: {}", session_id, e);
                return;
            }
        };

        let mut reader = BufReader::new(response.into_reader());
        let mut buffer = String::new();

        while active.load(Ordering::SeqCst) {
            buffer.clear();
            match reader.read_line(&mut buffer) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    if active.load(Ordering::SeqCst) {
                        log::error!("Bridge event stream error for {}: {}", session_id, e);
                    }
                    break;
                }
            }

            let Some(data) = buffer.trim().strip_prefix("data:") else {
                continue;
            };
            let payload: Value = match serde_json::from_str(data.trim()) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("Ignoring malformed bridge event for {}: {}", session_id, e);
                    continue;
                }
            };

            if let Some(event) = parse_bridge_event(&payload) {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
        }

        log::debug!("Bridge event stream ended for {}", session_id);
    });
}

/// Decode one bridge event payload. Payloads we do not act on yield `None`.
pub fn parse_bridge_event(payload: &Value) -> Option<ConnectionEvent> {
    match payload.get("type")?.as_str()? {
        "creds.update" => Some(ConnectionEvent::CredentialsUpdated),
        "settled" => Some(ConnectionEvent::Settled),
        "connection.update" => match payload.get("connection").and_then(Value::as_str) {
            Some("connecting") => Some(ConnectionEvent::Connecting),
            Some("open") => {
                let user_id = payload
                    .get("user")
                    .and_then(|u| u.get("id"))
                    .and_then(Value::as_str)?;
                Some(ConnectionEvent::Open {
                    user_id: user_id.to_string(),
                })
            }
            Some("close") => {
                let code = payload
                    .get("statusCode")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok());
                Some(ConnectionEvent::Close {
                    reason: DisconnectReason::from_status_code(code),
                })
            }
            _ => None,
        },
        _ => None,
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ClientError>
where
    F: FnOnce() -> Result<T, ClientError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClientError::Request(format!("Bridge task failed: {}", e)))?
}
