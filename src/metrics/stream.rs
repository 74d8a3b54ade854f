use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

use super::collector::SystemStatus;
use crate::AppState;

/// How often the stream endpoint pushes a snapshot
const STREAM_INTERVAL: Duration = Duration::from_secs(1);

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    /// The aggregator has stopped; the process is shutting down
    StatsUnavailable,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::StatsUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "pipeline is shutting down",
            ),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

// ─── GET /monitor ────────────────────────────────────────────────
/// Returns a single JSON status snapshot.

pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, AppError> {
    state
        .stats
        .snapshot()
        .await
        .map(Json)
        .ok_or(AppError::StatsUnavailable)
}

// ─── GET /monitor/stream ─────────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a fresh snapshot every second; the stream ends when the
/// aggregator stops, so it never holds up a graceful shutdown.

pub async fn status_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let stats = state.stats.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STREAM_INTERVAL);
        loop {
            interval.tick().await;
            let Some(snapshot) = stats.snapshot().await else {
                break;
            };
            let json = serde_json::to_string(&snapshot).unwrap_or_default();
            if tx.send(Ok(Event::default().data(json))).await.is_err() {
                // Client went away
                break;
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
