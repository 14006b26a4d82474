//! HTTP and WebSocket surface.
//!
//! A thin layer over [`EngineHandle`]:
//!
//! - `GET /ws/logs` streams status lines (history first, then live).
//! - `GET /api/status` reports the ledger, stage board and profiles.
//! - `POST /api/reprocess` regenerates missing proxies in the background.
//! - `DELETE /api/delete` removes a clip and its proxy as a pair.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use offload_core::status;
use offload_devices::{remove_clip_pair, ArchiveError, EngineHandle, StatusReport};
use serde::Deserialize;

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Shared state for every handler.
pub struct ApiState {
    pub engine: EngineHandle,
}

impl ApiState {
    pub fn new(engine: EngineHandle) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws/logs", get(logs_ws))
        .route("/api/status", get(status_report))
        .route("/api/reprocess", post(reprocess))
        .route("/api/delete", delete(delete_clip))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Log stream
// ---------------------------------------------------------------------------

async fn logs_ws(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_logs(socket, state))
}

async fn stream_logs(socket: WebSocket, state: Arc<ApiState>) {
    let broadcaster = state.engine.broadcaster().clone();
    let (mut sender, mut receiver) = socket.split();
    let (id, mut lines) = match broadcaster.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(error = %e, "log stream could not attach");
            return;
        }
    };
    tracing::debug!(observer = id, "log stream opened");

    let forward = async {
        while let Some(line) = lines.recv().await {
            if sender.send(Message::Text(line.into())).await.is_err() {
                break;
            }
        }
    };
    let drain = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        _ = forward => {},
        _ = drain => {},
    }
    broadcaster.detach(id);
    tracing::debug!(observer = id, "log stream closed");
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

async fn status_report(State(state): State<Arc<ApiState>>) -> Json<StatusReport> {
    Json(state.engine.report())
}

// ---------------------------------------------------------------------------
// Reprocess
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ReprocessRequest {
    label: Option<String>,
}

async fn reprocess(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let request: ReprocessRequest = if body.is_empty() {
        ReprocessRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    };

    if let Some(label) = &request.label {
        if !state.engine.profiles().snapshot().is_known(label) {
            return Err((StatusCode::NOT_FOUND, format!("no profile for label {label}")));
        }
    }

    let engine = state.engine.clone();
    let label = request.label.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.reprocess(label.as_deref()).await {
            tracing::warn!(error = %e, "reprocess request failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted", "label": request.label })),
    ))
}

// ---------------------------------------------------------------------------
// Clip removal
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    original: PathBuf,
    proxy: PathBuf,
}

async fn delete_clip(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<StatusCode> {
    let snapshot = state.engine.profiles().snapshot();
    for path in [&request.original, &request.proxy] {
        if !snapshot.owns_path(path) {
            return Err((
                StatusCode::FORBIDDEN,
                format!("{} is outside the archive", path.display()),
            ));
        }
    }

    remove_clip_pair(&request.original, &request.proxy)
        .await
        .map_err(|e| {
            let code = match e {
                ArchiveError::Missing(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, e.to_string())
        })?;

    status!(
        state.engine.broadcaster(),
        "Deleted {} and its proxy {}",
        request.original.display(),
        request.proxy.display()
    );
    Ok(StatusCode::NO_CONTENT)
}
