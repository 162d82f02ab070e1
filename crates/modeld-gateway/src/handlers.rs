//! Request handlers for the daemon's HTTP surface

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use modeld_core::{InferRequest, ModelsResponse, StatusResponse};

use crate::error::ApiError;
use crate::pipeline;
use crate::state::AppState;

/// `GET /healthz` — liveness probe; 200 once the process is listening.
pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /readyz` — readiness: 200 iff at least one instance is ready.
pub async fn readyz(State(state): State<AppState>) -> Response {
    if state.manager.ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "loading").into_response()
    }
}

/// `GET /models` — every catalog entry, in catalog order.
pub async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse { models: state.manager.models() })
}

/// `GET /status` — registry snapshot.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.manager.snapshot_status().await)
}

/// `GET /metrics` — prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// `POST /infer` — resolve, admit, and stream NDJSON token lines.
pub async fn infer(
    State(state): State<AppState>,
    payload: Result<Json<InferRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(ApiError::from_rejection)?;
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt is required"));
    }

    match pipeline::stream_infer(&state, req).await {
        Ok(body) => Ok((
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            body,
        )
            .into_response()),
        Err(e) => {
            if e.is_too_busy() {
                state.metrics.inc_backpressure("queue");
            }
            Err(ApiError::from(e))
        }
    }
}
