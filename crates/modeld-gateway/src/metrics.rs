//! Prometheus instrumentation for the HTTP surface
//!
//! Collectors are registered on a private registry (not the global default)
//! so several servers can coexist in one process, which the integration
//! tests rely on. Request labels use the matched route pattern rather than
//! the raw URI to keep label cardinality bounded.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::state::AppState;

const NAMESPACE: &str = "modeld";
const SUBSYSTEM: &str = "http";

/// HTTP-level collectors.
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    inflight: IntGaugeVec,
    backpressure_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total number of HTTP requests")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["path", "method", "status"],
        )
        .expect("valid collector definition");

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
            &["path", "method"],
        )
        .expect("valid collector definition");

        let inflight = IntGaugeVec::new(
            Opts::new("inflight_requests", "In-flight HTTP requests")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["path"],
        )
        .expect("valid collector definition");

        let backpressure_total = IntCounterVec::new(
            Opts::new("backpressure_total", "Total backpressure rejections (429)")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["reason"],
        )
        .expect("valid collector definition");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("collector registers once");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("collector registers once");
        registry
            .register(Box::new(inflight.clone()))
            .expect("collector registers once");
        registry
            .register(Box::new(backpressure_total.clone()))
            .expect("collector registers once");

        Self {
            registry,
            requests_total,
            request_duration,
            inflight,
            backpressure_total,
        }
    }

    /// Record one completed request.
    pub fn observe_request(&self, path: &str, method: &str, status: u16, seconds: f64) {
        self.requests_total
            .with_label_values(&[path, method, &status.to_string()])
            .inc();
        self.request_duration
            .with_label_values(&[path, method])
            .observe(seconds);
    }

    /// Called when returning 429 to the client.
    pub fn inc_backpressure(&self, reason: &str) {
        let reason = if reason.is_empty() { "unspecified" } else { reason };
        self.backpressure_total.with_label_values(&[reason]).inc();
    }

    /// Render the text exposition format for `GET /metrics`.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum middleware instrumenting every request.
pub async fn track(
    State(state): State<AppState>,
    matched_path: Option<MatchedPath>,
    req: Request,
    next: Next,
) -> Response {
    // Matched route pattern keeps the label set bounded; unmatched requests
    // fall back to the raw path.
    let path = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().to_string();

    let gauge = state.metrics.inflight.with_label_values(&[path.as_str()]);
    gauge.inc();
    let start = Instant::now();
    let response = next.run(req).await;
    gauge.dec();

    state.metrics.observe_request(
        &path,
        &method,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
