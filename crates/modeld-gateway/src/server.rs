//! Router construction and the serve loop
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/healthz` | Liveness — `200 ok` once listening. |
//! | `GET`  | `/readyz` | Readiness — 200 iff any instance is ready. |
//! | `GET`  | `/models` | Catalog listing. |
//! | `POST` | `/infer` | NDJSON token stream. |
//! | `GET`  | `/status` | Instance registry snapshot. |
//! | `GET`  | `/metrics` | Prometheus text exposition. |

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::metrics;
use crate::state::AppState;

/// Build the router wired to the shared [`AppState`].
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/models", get(handlers::models))
        .route("/infer", post(handlers::infer))
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), metrics::track))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(state.settings.max_body_bytes));

    if state.settings.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Serve until the shutdown coordinator's root token fires, then stop
/// accepting connections and let in-flight (already cancelled) streams end.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "modeld listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
