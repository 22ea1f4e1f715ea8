//! Pairgate daemon: wires the bridge client, storage, orchestrator, sweeper
//! and HTTP server together and runs until interrupted.

mod assets;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pairgate_core::client::{BridgeClient, BridgeConfig};
use pairgate_core::config::PairingConfig;
use pairgate_core::event_bus::{EventBus, LifecycleKind};
use pairgate_core::orchestrator::Orchestrator;
use pairgate_core::paths;
use pairgate_core::retry::RetryPolicy;
use pairgate_core::session::SessionRegistry;
use pairgate_core::storage::{HttpStorage, HttpStorageConfig, LocalStorage, ObjectStorage};
use pairgate_core::sweeper::Sweeper;
use pairgate_http::AppState;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

#[derive(Parser, Debug)]
#[command(
    name = "pairgate",
    version,
    about = "Hands out pairing codes and delivers linked-device credentials"
)]
struct Args {
    #[arg(long, env = "PAIRGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Root for credential directories and local uploads [default: ~/.pairgate]
    #[arg(long, env = "PAIRGATE_HOME")]
    data_dir: Option<PathBuf>,

    /// Base URL of the protocol bridge sidecar.
    #[arg(long, env = "PAIRGATE_BRIDGE_URL", default_value = "http://127.0.0.1:3001")]
    bridge_url: String,

    #[arg(long, env = "PAIRGATE_BRIDGE_TOKEN")]
    bridge_token: Option<String>,

    /// How the linked device is labelled on the phone.
    #[arg(long, env = "PAIRGATE_BROWSER", default_value = "Ubuntu,Chrome,20.0.04")]
    browser: String,

    /// Upload endpoint. Without one, uploads are written under `<data dir>/exports`.
    #[arg(long, env = "PAIRGATE_STORAGE_URL")]
    storage_url: Option<String>,

    #[arg(long, env = "PAIRGATE_STORAGE_TOKEN")]
    storage_token: Option<String>,

    /// Public base URL for local uploads.
    #[arg(long, env = "PAIRGATE_PUBLIC_URL")]
    public_url: Option<String>,

    /// Link prefix stripped to form the session code.
    #[arg(long, env = "PAIRGATE_LINK_PREFIX")]
    link_prefix: Option<String>,

    #[arg(long, env = "PAIRGATE_UPLOAD_PREFIX", default_value = "pairgate")]
    upload_prefix: String,

    /// Message sent to the account; `{phone}`, `{code}` and `{link}` are filled in.
    #[arg(long, env = "PAIRGATE_MESSAGE_TEMPLATE")]
    message_template: Option<String>,

    #[arg(long, env = "PAIRGATE_PAIRING_DELAY_MS", default_value_t = 1500)]
    pairing_delay_ms: u64,

    #[arg(long, env = "PAIRGATE_EXPORT_GRACE_SECS", default_value_t = 10)]
    export_grace_secs: u64,

    #[arg(long, env = "PAIRGATE_MAX_SESSION_AGE_SECS", default_value_t = 600)]
    max_session_age_secs: u64,

    #[arg(long, env = "PAIRGATE_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    sweep_interval_secs: u64,

    /// Reconnects per session after a recoverable disconnect. 0 disables.
    #[arg(long, env = "PAIRGATE_RECONNECT_ATTEMPTS", default_value_t = 3)]
    reconnect_attempts: u32,

    /// Allow several concurrent pairing attempts for one number.
    #[arg(long, env = "PAIRGATE_ALLOW_DUPLICATES")]
    allow_duplicates: bool,

    /// Write a transcript per session into this directory.
    #[arg(long, env = "PAIRGATE_TRANSCRIPT_DIR")]
    transcript_dir: Option<PathBuf>,
}

impl Args {
    fn resolve_data_dir(&self) -> Result<PathBuf, String> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::data_dir(),
        }
    }

    fn pairing_config(&self, data_dir: &std::path::Path) -> PairingConfig {
        let mut config = PairingConfig::with_data_dir(data_dir);
        config.pairing_delay = Duration::from_millis(self.pairing_delay_ms);
        config.export_grace = Duration::from_secs(self.export_grace_secs);
        config.max_session_age = Duration::from_secs(self.max_session_age_secs);
        config.sweep_interval = Duration::from_secs(self.sweep_interval_secs.max(1));
        config.reconnect = RetryPolicy {
            max_attempts: self.reconnect_attempts,
            ..RetryPolicy::default()
        };
        config.reject_duplicate_numbers = !self.allow_duplicates;
        config.upload_prefix = self.upload_prefix.clone();
        config.link_prefix = self.link_prefix.clone();
        if let Some(template) = &self.message_template {
            config.message_template = template.clone();
        }
        config.transcript_dir = self.transcript_dir.clone();
        config
    }

    fn storage(&self, data_dir: &std::path::Path) -> Arc<dyn ObjectStorage> {
        match &self.storage_url {
            Some(endpoint) => {
                log::info!("Uploading credentials to {}", endpoint);
                Arc::new(HttpStorage::new(HttpStorageConfig {
                    endpoint: endpoint.clone(),
                    token: self.storage_token.clone(),
                }))
            }
            None => {
                let root = data_dir.join("exports");
                let public_base = self
                    .public_url
                    .clone()
                    .unwrap_or_else(|| format!("file://{}", root.display()));
                log::info!("Writing credentials to {}", root.display());
                Arc::new(LocalStorage::new(root, public_base))
            }
        }
    }

    fn bridge(&self) -> BridgeClient {
        BridgeClient::new(BridgeConfig {
            base_url: self.bridge_url.clone(),
            browser: self.browser.clone(),
            token: self.bridge_token.clone(),
        })
    }

    fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("Invalid address: {}", e))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    install_panic_hook();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), String> {
    let addr = args.addr()?;
    let data_dir = args.resolve_data_dir()?;
    let config = args.pairing_config(&data_dir);

    tokio::fs::create_dir_all(&config.credentials_dir)
        .await
        .map_err(|e| {
            format!(
                "Failed to create {}: {}",
                config.credentials_dir.display(),
                e
            )
        })?;

    let registry = Arc::new(SessionRegistry::new());
    let events = Arc::new(EventBus::new());
    let lifecycle_logger = spawn_lifecycle_logger(&events);
    let sweeper = Sweeper::from_config(Arc::clone(&registry), Arc::clone(&events), &config).spawn();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(args.bridge()),
        args.storage(&data_dir),
        registry,
        events,
        config,
    ));
    log::info!("Using protocol bridge at {}", args.bridge_url);

    match orchestrator.purge_stale_credentials().await {
        Ok(0) => {}
        Ok(n) => log::info!("Removed {} stale credential directories", n),
        Err(e) => log::warn!("Failed to clear stale credential directories: {}", e),
    }

    let state = Arc::new(AppState::new(Arc::clone(&orchestrator)));
    let app = pairgate_http::with_layers(pairgate_http::api_routes(state).merge(assets::routes()));

    let served = pairgate_http::serve(app, addr, shutdown_signal()).await;

    sweeper.abort();
    orchestrator.shutdown().await;
    lifecycle_logger.abort();

    served.map_err(|e| format!("HTTP server failed on {}: {}", addr, e))
}

/// Log panics through `log` so they reach the same sink as everything else.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        log::error!("Unhandled panic: {}", info);
    }));
}

fn spawn_lifecycle_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.kind {
                    LifecycleKind::Failed { .. } => log::warn!("{}", event),
                    _ => log::info!("{}", event),
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Lifecycle log skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
