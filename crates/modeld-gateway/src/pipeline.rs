//! Streaming inference pipeline
//!
//! Resolution and admission complete before any response bytes exist, so
//! `NotFound`, `TooBusy`, and load failures still surface as plain HTTP
//! errors. Once a token stream is obtained, events are forwarded line by
//! line into the response body; a dropped body (client disconnect) asserts
//! the per-request cancel token so the backend stops promptly, and nothing
//! about that path is treated as a server fault.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use futures::StreamExt;
use modeld_core::{BoxTokenStream, GenParams, InferRequest, Result};
use modeld_manager::GenPermit;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::AppState;

/// Resolve the request to a ready instance and start streaming.
///
/// The returned body yields one JSON object per line; the terminal line has
/// `done: true`. Errors after the stream begins end the body early instead
/// of surfacing a status code — the response head is already on the wire.
pub async fn stream_infer(state: &AppState, req: InferRequest) -> Result<Body> {
    let cancel = state.shutdown.child_token();
    let instance = state.manager.resolve_or_load(req.model.as_deref()).await?;
    let permit = instance.begin_generation(&cancel).await?;
    let stream = instance
        .generate(&req.prompt, GenParams::from(&req), cancel.clone())
        .await?;

    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, Infallible>>(16);
    let model_id = instance.model_id().to_string();
    tokio::spawn(drive_stream(stream, tx, cancel, permit, model_id));
    Ok(Body::from_stream(ReceiverStream::new(rx)))
}

/// Forward token events into the response channel until the terminal event,
/// a disconnect, or a backend failure.
async fn drive_stream(
    mut stream: BoxTokenStream,
    tx: mpsc::Sender<std::result::Result<Bytes, Infallible>>,
    cancel: CancellationToken,
    permit: GenPermit,
    model_id: String,
) {
    // The in-flight slot is held for the whole life of the stream.
    let _permit = permit;

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                let done = event.is_done();
                let mut line = match serde_json::to_vec(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(model = %model_id, error = %e, "unserializable stream event");
                        break;
                    }
                };
                line.push(b'\n');
                if tx.send(Ok(Bytes::from(line))).await.is_err() {
                    // Client went away mid-stream. Normal termination: stop
                    // the generation and move on.
                    debug!(model = %model_id, "client disconnected mid-stream");
                    cancel.cancel();
                    break;
                }
                if done {
                    break;
                }
            }
            Err(e) => {
                warn!(model = %model_id, error = %e, "generation failed mid-stream");
                cancel.cancel();
                break;
            }
        }
    }
}
