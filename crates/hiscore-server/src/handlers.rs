//! HTTP and WebSocket handlers for the hiscore server.
//!
//! `GET /ws` upgrades into a client session; `/events/*` is the narrow
//! interface through which the score service reports domain events.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MeteredConnection};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hiscore_core::{validate_topic_name, ClientSession, Hub, Notifier};
use hiscore_protocol::{LeaderboardUpdatePayload, ScoreUpdatePayload};
use hiscore_transport::AxumConnection;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The fan-out hub.
    pub hub: Hub,
    /// Publishes domain events through the hub.
    pub notifier: Notifier,
    /// Server configuration.
    pub config: Config,
    /// Game names announced to new clients.
    games: RwLock<BTreeSet<String>>,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state around a running hub.
    #[must_use]
    pub fn new(config: Config, hub: Hub) -> Self {
        Self {
            notifier: Notifier::new(hub.clone()),
            hub,
            games: RwLock::new(config.games.iter().cloned().collect()),
            connections: AtomicUsize::new(0),
            config,
        }
    }

    /// Known game names, sorted.
    #[must_use]
    pub fn games(&self) -> Vec<String> {
        self.games.read().iter().cloned().collect()
    }

    /// Add a game to the catalog. Names clients could not subscribe to are
    /// left out.
    fn remember_game(&self, game: &str) {
        if let Err(reason) = validate_topic_name(game) {
            debug!(reason, "Not cataloguing game");
            return;
        }
        if self.games.read().contains(game) {
            return;
        }
        self.games.write().insert(game.to_string());
    }

    /// Reserve a connection slot, or `None` at the limit.
    fn acquire_slot(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                state: Arc::clone(self),
            })
    }

    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        let allowed = &self.config.transport.allowed_origins;
        if allowed.is_empty() {
            return true;
        }
        match headers.get(header::ORIGIN).map(|v| v.to_str()) {
            None => true,
            Some(Ok(origin)) => allowed.iter().any(|a| a == origin),
            Some(Err(_)) => false,
        }
    }
}

/// Holds one unit of the connection limit until dropped.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    let stats_path = format!("{}/stats", ws_path.trim_end_matches('/'));
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route(&stats_path, get(stats_handler))
        .route("/health", get(health_handler))
        .route("/events/score", post(score_event_handler))
        .route("/events/leaderboard", post(leaderboard_event_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let hub = Hub::spawn(config.hub_config());
    let state = Arc::new(AppState::new(config.clone(), hub.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        tokio::spawn(refresh_hub_gauges(
            hub,
            Duration::from_millis(config.metrics.refresh_interval_ms.max(1)),
        ));
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("hiscore server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn refresh_hub_gauges(hub: Hub, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        metrics::set_hub_stats(&hub.stats());
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Connection statistics.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsStats {
    pub connected_clients: usize,
    pub active_games: Vec<String>,
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<WsStats> {
    Json(WsStats {
        connected_clients: state.hub.client_count(),
        active_games: state.hub.connected_topics().into_iter().collect(),
    })
}

async fn score_event_handler(
    State(state): State<Arc<AppState>>,
    Json(score): Json<ScoreUpdatePayload>,
) -> StatusCode {
    metrics::record_event("score");
    state.remember_game(&score.game_name);
    match state.notifier.score_recorded(score).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            error!(error = %e, "Failed to publish score update");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn leaderboard_event_handler(
    State(state): State<Arc<AppState>>,
    Json(update): Json<LeaderboardUpdatePayload>,
) -> StatusCode {
    metrics::record_event("leaderboard");
    state.remember_game(&update.game_name);
    match state
        .notifier
        .leaderboard_changed(&update.game_name, update.top_scores)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            error!(error = %e, "Failed to publish leaderboard update");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.origin_allowed(&headers) {
        warn!(remote = %addr, "WebSocket connection rejected: origin not allowed");
        metrics::record_rejection("origin");
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(slot) = state.acquire_slot() else {
        warn!(remote = %addr, "WebSocket connection rejected: connection limit reached");
        metrics::record_rejection("limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, addr, state, slot))
}

/// Run a client session on an upgraded socket.
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    state: Arc<AppState>,
    _slot: ConnectionSlot,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection = MeteredConnection::new(AxumConnection::new(
        socket,
        Some(addr),
        state.config.limits.max_message_size,
    ));

    match ClientSession::start(
        state.hub.clone(),
        Box::new(connection),
        state.games(),
        state.config.session_config(),
    )
    .await
    {
        Ok(session) => {
            let id = session.id().clone();
            session.wait().await;
            debug!(client = %id, "Session finished");
        }
        Err(e) => error!(remote = %addr, error = %e, "Failed to start session"),
    }
}
