use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use nextcmd_settings::ServerSettings;

use crate::handlers::HandlerState;
use crate::session::{self, SessionRegistry};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_send_queue: settings.max_send_queue.max(1),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
            max_message_size: settings.max_message_size,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<ServerConfig>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, handler_state: Arc<HandlerState>) -> Self {
        Self {
            handler_state,
            sessions: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and serve in the background.
pub async fn start(
    config: ServerConfig,
    handler_state: Arc<HandlerState>,
) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    let state = AppState::new(config, handler_state);
    let shutdown = state.shutdown.clone();
    let sessions = Arc::clone(&state.sessions);
    let router = build_router(state);

    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        {
            error!(error = %e, "server exited with error");
        }
    });

    info!(addr = %local_addr, "nextcmd server listening");

    Ok(ServerHandle {
        addr: local_addr,
        sessions,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub addr: SocketAddr,
    sessions: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.count()
    }

    /// Token that stops the listener and every open session when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting, close open sessions, and wait for the listener task.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            warn!(error = %e, "server task did not finish cleanly");
        }
        info!("nextcmd server stopped");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = state.sessions.register();
    session::run_session(socket, session, state).await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let handler_state = &state.handler_state;
    let records = handler_state.with_store(|store| store.count()).await;

    let (code, status, history_records) = match records {
        Ok(n) => (StatusCode::OK, "healthy", Some(n)),
        Err(e) => {
            warn!(error = %e, "health check could not reach the store");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", None)
        }
    };

    let body = serde_json::json!({
        "status": status,
        "active_sessions": state.sessions.count(),
        "proposer": handler_state.engine.proposer_name(),
        "history_records": history_records,
        "metrics": handler_state.metrics.snapshot(),
    });

    (code, Json(body))
}
