//! Backend adapter capability trait
//!
//! A [`ModelBackend`] is the runnable engine behind one instance: bring it
//! up, stream tokens out of it, tear it down. The concrete implementation is
//! chosen at construction time from configuration, never by runtime type
//! inspection.

use std::sync::Arc;

use async_trait::async_trait;
use modeld_core::{BoxTokenStream, GenParams, ModelEntry, Result, Settings};
use tokio_util::sync::CancellationToken;

use crate::llama::LlamaServerBackend;
use crate::stub::StubBackend;

/// Abstraction over a runnable inference engine.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Model id this backend is bound to.
    fn model_id(&self) -> &str;

    /// Bring the engine up and return once it is ready to generate, or fail
    /// within the configured startup timeout.
    async fn start(&self) -> Result<()>;

    /// Begin one generation. The returned stream is finite and not
    /// restartable: zero or more token events, then a terminal event. When
    /// `cancel` fires, production stops promptly and any unread engine
    /// output is discarded.
    async fn generate(
        &self,
        prompt: &str,
        params: GenParams,
        cancel: CancellationToken,
    ) -> Result<BoxTokenStream>;

    /// Tear the engine down. Graceful first, forced after a bounded grace
    /// period. Idempotent.
    async fn stop(&self);
}

/// Which backend implementation serves generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Deterministic in-process token fabric; no external engine.
    Stub,
    /// One llama.cpp `llama-server` subprocess per model artifact.
    LlamaServer,
}

impl BackendKind {
    /// Select the backend from configuration: the subprocess engine when an
    /// engine binary is configured, the stub otherwise.
    pub fn from_settings(settings: &Settings) -> Self {
        if settings.llama_bin.is_some() {
            Self::LlamaServer
        } else {
            Self::Stub
        }
    }
}

/// Constructor for the backend bound to one catalog entry.
pub type BackendFactory = Arc<dyn Fn(&ModelEntry) -> Box<dyn ModelBackend> + Send + Sync>;

/// Factory producing backends of `kind` configured by `settings`.
pub fn factory_for(kind: BackendKind, settings: &Settings) -> BackendFactory {
    match kind {
        BackendKind::Stub => Arc::new(|entry: &ModelEntry| {
            Box::new(StubBackend::new(&entry.id)) as Box<dyn ModelBackend>
        }),
        BackendKind::LlamaServer => {
            let settings = settings.clone();
            Arc::new(move |entry: &ModelEntry| {
                Box::new(LlamaServerBackend::new(entry.clone(), settings.clone()))
                    as Box<dyn ModelBackend>
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_engine_binary() {
        let plain = Settings::default();
        assert_eq!(BackendKind::from_settings(&plain), BackendKind::Stub);

        let with_engine = Settings::default().with_llama_bin("/usr/bin/llama-server");
        assert_eq!(
            BackendKind::from_settings(&with_engine),
            BackendKind::LlamaServer
        );
    }

    #[test]
    fn stub_factory_binds_model_id() {
        let factory = factory_for(BackendKind::Stub, &Settings::default());
        let backend = factory(&ModelEntry::new("alpha.gguf", "/models/alpha.gguf"));
        assert_eq!(backend.model_id(), "alpha.gguf");
    }
}
