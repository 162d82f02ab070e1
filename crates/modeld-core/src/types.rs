//! Wire and domain types shared across the daemon

use std::path::PathBuf;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ModeldError;

/// One model artifact discovered in the models directory.
///
/// The `id` is the artifact file name and is unique within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub path: PathBuf,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { id: id.into(), path: path.into() }
    }
}

/// Body of `POST /infer`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferRequest {
    /// Target model id; the configured default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Generation stops when any of these sequences is produced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Sampling parameters handed to a backend, resolved from an [`InferRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub seed: Option<u64>,
}

impl From<&InferRequest> for GenParams {
    fn from(req: &InferRequest) -> Self {
        Self {
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop: req.stop.clone(),
            seed: req.seed,
        }
    }
}

/// One NDJSON line of a streamed inference response.
///
/// A well-formed stream is zero or more `Token` events followed by exactly
/// one terminal `Done` event carrying the accumulated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Token {
        token: String,
    },
    Done {
        done: bool,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl StreamEvent {
    /// Token-only event
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token { token: token.into() }
    }

    pub fn done(content: impl Into<String>, finish_reason: impl Into<String>) -> Self {
        Self::Done {
            done: true,
            content: content.into(),
            finish_reason: Some(finish_reason.into()),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Blanket trait for `Stream<Item = Result<StreamEvent, ModeldError>> + Send`
pub trait TokenStream: Stream<Item = Result<StreamEvent, ModeldError>> + Send {}
impl<T> TokenStream for T where T: Stream<Item = Result<StreamEvent, ModeldError>> + Send {}

/// Type erased token stream
pub type BoxTokenStream = Pin<Box<dyn TokenStream>>;

/// Lifecycle state of a model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Loading,
    Ready,
    Failed,
    Stopping,
    Stopped,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Per-instance entry of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub model_id: String,
    pub state: InstanceState,
    /// Seconds since this instance last served a request.
    pub idle_secs: u64,
    pub queue_len: usize,
    pub inflight: usize,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub instances: Vec<InstanceStatus>,
    pub max_instances: usize,
    pub uptime_seconds: u64,
    pub loads_total: u64,
    pub evictions_total: u64,
}

/// Body of `GET /models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_constructors_and_predicates() {
        let t = StreamEvent::token("hello");
        assert!(!t.is_done());

        let d = StreamEvent::done("hello world", "stop");
        assert!(d.is_done());
    }

    #[test]
    fn stream_event_ndjson_shape() {
        let t = serde_json::to_string(&StreamEvent::token("hi")).unwrap();
        assert_eq!(t, r#"{"token":"hi"}"#);

        let d = serde_json::to_string(&StreamEvent::done("hi there", "stop")).unwrap();
        assert_eq!(
            d,
            r#"{"done":true,"content":"hi there","finish_reason":"stop"}"#
        );
    }

    #[test]
    fn stream_event_roundtrip_is_untagged() {
        let line = r#"{"token":"x"}"#;
        let ev: StreamEvent = serde_json::from_str(line).unwrap();
        assert_eq!(ev, StreamEvent::token("x"));

        let line = r#"{"done":true,"content":"x"}"#;
        let ev: StreamEvent = serde_json::from_str(line).unwrap();
        assert!(ev.is_done());
    }

    #[test]
    fn infer_request_defaults() {
        let req: InferRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(req.model, None);
        assert_eq!(req.prompt, "hi");
        assert!(req.stop.is_empty());

        let params = GenParams::from(&req);
        assert_eq!(params.max_tokens, None);
    }

    #[test]
    fn instance_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&InstanceState::Ready).unwrap(),
            r#""ready""#
        );
        assert_eq!(InstanceState::Loading.to_string(), "loading");
    }
}
