//! Daemon error taxonomy
//!
//! Every fallible path in the workspace funnels into [`ModeldError`]. The
//! HTTP layer maps variants onto status codes: `ModelNotFound` → 404,
//! `TooBusy` → 429, `InvalidRequest` → 400, `LoadFailed`/`Backend` → 500,
//! `Closed` → 503. `Cancelled` never reaches a client — a cancelled stream
//! simply ends.

use thiserror::Error;

/// Main error type for the daemon
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModeldError {
    /// The requested model id is not in the catalog, or no id was given and
    /// no default is configured.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The backend failed to reach its ready state.
    #[error("model '{model}' failed to load: {reason}")]
    LoadFailed { model: String, reason: String },

    /// Admission queue overflow or wait timeout (maps to 429).
    #[error("too busy: {0}")]
    TooBusy(String),

    /// The request was cancelled by the client or by shutdown.
    #[error("request cancelled")]
    Cancelled,

    /// The manager has been shut down and no longer accepts work.
    #[error("manager is closed")]
    Closed,

    /// A running backend reported an error mid-generation.
    #[error("backend error: {0}")]
    Backend(String),

    /// Malformed or unacceptable client input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, ModeldError>;

impl ModeldError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::ModelNotFound(id.into())
    }

    pub fn load_failed(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadFailed { model: model.into(), reason: reason.into() }
    }

    pub fn too_busy(model: impl Into<String>) -> Self {
        Self::TooBusy(model.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors a client caused (404/400-class), false for faults.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ModelNotFound(_) | Self::InvalidRequest(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound(_))
    }

    pub fn is_too_busy(&self) -> bool {
        matches!(self, Self::TooBusy(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ModeldError::not_found("tiny").to_string(),
            "model not found: tiny"
        );
        assert_eq!(
            ModeldError::load_failed("tiny", "spawn failed").to_string(),
            "model 'tiny' failed to load: spawn failed"
        );
        assert_eq!(ModeldError::Cancelled.to_string(), "request cancelled");
    }

    #[test]
    fn classification_predicates() {
        assert!(ModeldError::not_found("x").is_not_found());
        assert!(ModeldError::not_found("x").is_client_error());
        assert!(ModeldError::too_busy("x").is_too_busy());
        assert!(!ModeldError::backend("x").is_client_error());
        assert!(ModeldError::Cancelled.is_cancelled());
    }
}
