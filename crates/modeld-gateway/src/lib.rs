//! # modeld-gateway
//!
//! The HTTP face of the daemon: an axum router over the instance manager,
//! the NDJSON streaming inference pipeline, prometheus instrumentation, and
//! the shutdown coordinator that ties signal handling to draining.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod shutdown;
pub mod state;

// Re-exports
pub use error::ApiError;
pub use metrics::Metrics;
pub use server::{build_router, serve};
pub use shutdown::{Phase, ShutdownCoordinator};
pub use state::AppState;
