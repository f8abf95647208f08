//! HTTP and WebSocket API for the dashboard.
//!
//! Endpoints:
//!
//! - `GET /health`                      — liveness check
//! - `GET /api/data?secs=&max_points=`  — latest snapshot (JSON)
//! - `GET /api/settings`                — persisted settings (JSON)
//! - `GET|POST /api/toggle_speedtest`   — flip the scheduled speedtest
//! - `GET|POST /api/trigger_speedtest`  — run one speedtest now
//! - `GET /api/obstruction_map`         — fresh sky obstruction grid
//! - `GET /ws`                          — snapshot stream
//! - anything else                      — static dashboard files
//!
//! WebSocket clients send `{"type": "start_broadcast", "secs_history": N}`
//! and then receive `{"type": "data", ...snapshot}` messages from the single
//! process-wide broadcast loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use dishwatch::collect::{Dish, GrpcurlDish, SpeedtestCli};
use dishwatch::{Broadcaster, ObstructionMap, DishwatchError, Monitor, Poller, Settings, Snapshot, SpeedtestOutcome};

/// The poller type used by the server.
pub type DishPoller = Poller<GrpcurlDish, SpeedtestCli>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Snapshot source.
    pub monitor: Arc<Monitor>,
    /// Poller, for on-demand speedtests.
    pub poller: Arc<DishPoller>,
    /// The single broadcast loop.
    pub broadcaster: Arc<Broadcaster>,
    /// Serialized `data` messages fanned out to every socket.
    pub updates: broadcast::Sender<Arc<str>>,
    /// Interval between broadcast pushes.
    pub push_interval: Duration,
}

/// Builds the application router.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/data", get(data))
        .route("/api/settings", get(settings))
        .route("/api/toggle_speedtest", get(toggle_speedtest).post(toggle_speedtest))
        .route("/api/trigger_speedtest", get(trigger_speedtest).post(trigger_speedtest))
        .route("/api/obstruction_map", get(obstruction_map))
        .route("/ws", get(ws_upgrade))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps any internal error to a generic 500 response.
pub struct ApiError(DishwatchError);

impl From<DishwatchError> for ApiError {
    fn from(e: DishwatchError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "internal server error" })),
        )
            .into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Optional overrides for `GET /api/data`.
#[derive(Debug, Default, Deserialize)]
struct DataParams {
    secs: Option<u64>,
    max_points: Option<i64>,
}

async fn data(
    State(state): State<AppState>,
    Query(params): Query<DataParams>,
) -> Result<Json<Snapshot>, ApiError> {
    let defaults = state.monitor.settings().get();
    let snapshot = state.monitor.latest(
        params.secs.unwrap_or(defaults.history_secs),
        params.max_points.unwrap_or_else(|| defaults.max_points()),
    )?;
    Ok(Json(snapshot))
}

async fn settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.monitor.settings().get())
}

async fn toggle_speedtest(State(state): State<AppState>) -> Result<Json<Settings>, ApiError> {
    state.monitor.settings().toggle_speedtest()?;
    Ok(Json(state.monitor.settings().get()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum TriggerStatus {
    Started,
    InFlight,
}

async fn trigger_speedtest(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let status = if state.poller.speedtest_in_flight() {
        TriggerStatus::InFlight
    } else {
        let poller = Arc::clone(&state.poller);
        tokio::spawn(async move {
            match poller.trigger_speedtest().await {
                Ok(SpeedtestOutcome::InFlight) => {
                    tracing::debug!("speedtest trigger raced with a running test");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(source = "speedtest", error = %e, "triggered speedtest failed"),
            }
        });
        TriggerStatus::Started
    };
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "status": status })))
}

/// Fetched on demand; the map is not part of the stored series.
async fn obstruction_map(State(state): State<AppState>) -> Result<Json<ObstructionMap>, ApiError> {
    let map = state.poller.dish().fetch_obstruction_map().await?;
    Ok(Json(map))
}

// ── WebSocket ───────────────────────────────────────────────────────

/// Client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    StartBroadcast { secs_history: Option<u64> },
}

/// Server to client.
#[derive(Debug, Serialize)]
struct DataMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

/// Serializes a snapshot as a `data` message.
pub fn encode_data_message(snapshot: &Snapshot) -> serde_json::Result<String> {
    serde_json::to_string(&DataMessage {
        kind: "data",
        snapshot,
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut updates = state.updates.subscribe();
    tracing::debug!("websocket connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => handle_command(&state, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("websocket receive error: {e}");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(text) => {
                    if socket.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "websocket client lagging, dropped updates");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::debug!("websocket disconnected");
}

async fn handle_command(state: &AppState, text: &str) {
    let command = match serde_json::from_str::<ClientMessage>(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!("ignoring websocket message: {e}");
            return;
        }
    };

    match command {
        ClientMessage::StartBroadcast { secs_history } => {
            let secs = secs_history.unwrap_or_else(|| state.monitor.settings().get().history_secs);
            let updates = state.updates.clone();
            state
                .broadcaster
                .start(secs, state.push_interval, move |snapshot| {
                    match encode_data_message(&snapshot) {
                        // No subscribers is not an error.
                        Ok(text) => {
                            let _ = updates.send(Arc::from(text));
                        }
                        Err(e) => tracing::warn!("failed to encode snapshot: {e}"),
                    }
                })
                .await;
        }
    }
}
