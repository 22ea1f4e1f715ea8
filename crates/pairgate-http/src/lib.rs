//! HTTP front door for Pairgate.
//!
//! Exposes pairing-code requests, session status and health as JSON over
//! REST. The daemon merges its static page routes into [`api_routes`],
//! wraps them with [`with_layers`] and runs the result with [`serve`].

mod routes;
mod state;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};

pub use routes::{not_found_handler, ApiResponse, HealthResponse, PairingData, SessionData};
pub use state::AppState;

/// The complete API: [`api_routes`] under [`with_layers`].
pub fn router(state: Arc<AppState>) -> Router {
    with_layers(api_routes(state))
}

pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/code", get(routes::code_handler))
        .route("/health", get(routes::health_handler))
        .route("/session/{id}", get(routes::session_handler))
        .with_state(state)
}

/// Add CORS for any origin, panic catching and a JSON 404 fallback.
pub fn with_layers(app: Router) -> Router {
    app.fallback(routes::not_found_handler)
        .layer(CatchPanicLayer::custom(routes::panic_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Bind `addr` and serve `app` until `shutdown` resolves.
pub async fn serve<F>(app: Router, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("HTTP server shutting down");
        })
        .await
}

// ============================================================================
// TESTS
// ============================================================================
