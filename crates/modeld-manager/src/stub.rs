//! Deterministic stub backend
//!
//! Serves generations without any external engine: the prompt is split into
//! whitespace words and echoed back one token at a time, followed by the
//! terminal event. Used when no engine binary is configured and throughout
//! the test suites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use modeld_core::{BoxTokenStream, GenParams, ModeldError, Result, StreamEvent};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Pause between fabricated tokens so consumers observe real interleaving.
const TOKEN_PACING: Duration = Duration::from_millis(5);

/// In-process backend that fabricates a deterministic token sequence.
pub struct StubBackend {
    model_id: String,
    started: AtomicBool,
}

impl StubBackend {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            started: AtomicBool::new(false),
        }
    }

    /// Echo tokens for `prompt`: the first word verbatim, every following
    /// word with its separating space, capped by `max_tokens`.
    fn fabricate(prompt: &str, params: &GenParams) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for word in prompt.split_whitespace() {
            if tokens.is_empty() {
                tokens.push(word.to_string());
            } else {
                tokens.push(format!(" {word}"));
            }
        }
        if let Some(max) = params.max_tokens {
            tokens.truncate(max as usize);
        }
        tokens
    }
}

#[async_trait]
impl super::ModelBackend for StubBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn generate(
        &self,
        prompt: &str,
        params: GenParams,
        cancel: CancellationToken,
    ) -> Result<BoxTokenStream> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ModeldError::backend("stub backend is not started"));
        }

        let tokens = Self::fabricate(prompt, &params);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut content = String::new();
            for token in tokens {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(TOKEN_PACING) => {}
                }
                content.push_str(&token);
                if tx.send(Ok(StreamEvent::token(token))).await.is_err() {
                    // Consumer went away; nothing left to do.
                    return;
                }
            }
            if cancel.is_cancelled() {
                return;
            }
            let _ = tx.send(Ok(StreamEvent::done(content, "stop"))).await;
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelBackend;
    use futures::StreamExt;

    #[tokio::test]
    async fn streams_tokens_then_terminal_event() {
        let backend = StubBackend::new("alpha.gguf");
        backend.start().await.unwrap();

        let mut stream = backend
            .generate("hello stub world", GenParams::default(), CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }

        assert_eq!(events.len(), 4);
        assert!(events[..3].iter().all(|e| !e.is_done()));
        match events.last().unwrap() {
            StreamEvent::Done { content, .. } => assert_eq!(content, "hello stub world"),
            other => panic!("expected terminal event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn respects_max_tokens() {
        let backend = StubBackend::new("alpha.gguf");
        backend.start().await.unwrap();

        let params = GenParams { max_tokens: Some(1), ..Default::default() };
        let mut stream = backend
            .generate("one two three", params, CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        // one token + terminal
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn generate_before_start_fails() {
        let backend = StubBackend::new("alpha.gguf");
        let result = backend
            .generate("hi", GenParams::default(), CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancellation_ends_stream_without_terminal_event() {
        let backend = StubBackend::new("alpha.gguf");
        backend.start().await.unwrap();

        let cancel = CancellationToken::new();
        let mut stream = backend
            .generate("a b c d e f g h", GenParams::default(), cancel.clone())
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_done());

        cancel.cancel();
        // The stream must end without ever producing the terminal event.
        let mut saw_done = false;
        while let Some(ev) = stream.next().await {
            saw_done |= ev.unwrap().is_done();
        }
        assert!(!saw_done);
    }
}
