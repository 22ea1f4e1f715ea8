//! HTTP route handlers.
//!
//! The main route is `GET /code?number=<digits>`, which validates the number,
//! starts a pairing attempt and answers with the pairing code.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use pairgate_core::orchestrator::PairingError;
use pairgate_core::phone::PhoneNumber;
use pairgate_core::session::{SessionId, SessionStatus};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

use super::AppState;

/// Envelope shared by the `/code` and `/session` routes.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    /// Route-specific fields, flattened into the envelope.
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingData {
    pub code: String,
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    #[serde(default)]
    pub number: Option<String>,
}

/// Handler for GET /code?number=<digits>
pub async fn code_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CodeQuery>,
) -> (StatusCode, Json<ApiResponse<PairingData>>) {
    let phone = match PhoneNumber::parse(query.number.as_deref().unwrap_or_default()) {
        Ok(phone) => phone,
        Err(e) => {
            log::debug!("Rejected pairing request: {}", e);
            return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string())));
        }
    };

    match state.orchestrator.request_code(phone).await {
        Ok(ticket) => (
            StatusCode::OK,
            Json(ApiResponse::ok(PairingData {
                code: ticket.code,
                session_id: ticket.session_id,
            })),
        ),
        Err(e) => {
            let status = pairing_error_status(&e);
            if status.is_server_error() {
                log::error!("Session initialization failed: {}", e);
            } else {
                log::info!("Pairing request refused: {}", e);
            }
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

fn pairing_error_status(error: &PairingError) -> StatusCode {
    match error {
        PairingError::PairingInProgress { .. } => StatusCode::CONFLICT,
        PairingError::AlreadyRegistered
        | PairingError::Provision { .. }
        | PairingError::ClientInit(_)
        | PairingError::PairingCode(_)
        | PairingError::Registry(_)
        | PairingError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handler for GET /session/{id}
pub async fn session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<SessionData>>) {
    match state.registry().get(&SessionId(id)) {
        Some(session) => (
            StatusCode::OK,
            Json(ApiResponse::ok(SessionData {
                session_id: session.id,
                status: session.status,
                created_at: session.created_at,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Session not found")),
        ),
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.registry().len(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

pub async fn not_found_handler() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not Found",
            "message": "The requested resource does not exist",
        })),
    )
}

/// Turns a handler panic into a 500 so the process keeps serving.
pub fn panic_handler(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    log::error!("Request handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "Internal Server Error",
            "message": "Something went wrong",
        })),
    )
        .into_response()
}
