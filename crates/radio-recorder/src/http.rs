//! HTTP control and status API.
//!
//! `GET /api/state`, `GET /api/stations`, `GET /api/logs` read shared state
//! directly; `/api/record/:station` and `/api/stop` go through the recorder
//! event loop and wait for its reply.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use radio_capture::protocol::{Command, Station};
use radio_capture::state::SessionMonitor;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::core::{CommandError, RecorderEvent};
use crate::BroadcastMessage;

const RECENT_LOG_LINES: usize = 200;

/// Ring of the most recent WARN/ERROR lines forwarded by the log layer.
#[derive(Clone, Default)]
pub struct RecentLogs {
    lines: Arc<RwLock<VecDeque<String>>>,
}

impl RecentLogs {
    pub async fn push(&self, line: String) {
        let mut lines = self.lines.write().await;
        if lines.len() == RECENT_LOG_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub async fn lines(&self) -> Vec<String> {
        self.lines.read().await.iter().cloned().collect()
    }

    /// Collect `BroadcastMessage::Log` lines until the channel closes.
    pub fn spawn_collector(
        &self,
        mut rx: broadcast::Receiver<BroadcastMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let logs = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BroadcastMessage::Log(line)) => logs.push(line).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub monitor: SessionMonitor,
    pub stations: Arc<Vec<Station>>,
    pub event_tx: mpsc::Sender<RecorderEvent>,
    pub logs: RecentLogs,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/stations", get(get_stations))
        .route("/api/logs", get(get_logs))
        .route("/api/record/:station", get(record).post(record))
        .route("/api/stop", get(stop).post(stop))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: ApiState,
) -> tokio::task::JoinHandle<()> {
    let app = router(state);

    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind HTTP API on {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP API listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            warn!("HTTP API error: {}", e);
        }
    })
}

async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.monitor.snapshot().await)
}

async fn get_stations(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.stations.as_ref().clone())
}

async fn get_logs(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.logs.lines().await)
}

async fn record(State(state): State<ApiState>, Path(station): Path<String>) -> Response {
    send_command(&state, Command::Record { station }).await
}

async fn stop(State(state): State<ApiState>) -> Response {
    send_command(&state, Command::Stop).await
}

async fn send_command(state: &ApiState, command: Command) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    let event = RecorderEvent::Command {
        command,
        reply: Some(reply_tx),
    };
    if state.event_tx.send(event).await.is_err() {
        return unavailable();
    }
    let Ok(result) = reply_rx.await else {
        return unavailable();
    };

    let snapshot = state.monitor.snapshot().await;
    match result {
        Ok(message) => {
            Json(json!({ "ok": true, "message": message, "state": snapshot })).into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            (
                status,
                Json(json!({ "ok": false, "error": e.to_string(), "state": snapshot })),
            )
                .into_response()
        }
    }
}

fn status_for(error: &CommandError) -> StatusCode {
    match error {
        CommandError::UnknownStation(_) => StatusCode::NOT_FOUND,
        CommandError::Busy(_) | CommandError::NotRecording => StatusCode::CONFLICT,
        CommandError::Capture(e) if e.is_playlist_error() => StatusCode::BAD_GATEWAY,
        CommandError::Capture(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "ok": false, "error": "recorder is shutting down" })),
    )
        .into_response()
}
