//! # modeld-manager
//!
//! Lifecycle management for local model instances:
//!
//! - **Catalog** — one startup scan of the models directory; immutable
//!   afterwards.
//! - **Backends** — the [`ModelBackend`] capability trait with a subprocess
//!   implementation driving a llama.cpp `llama-server` and a deterministic
//!   stub used when no engine binary is configured.
//! - **Instances** — one live instance per model id, owning its backend and a
//!   FIFO admission queue with a single in-flight generation.
//! - **Manager** — load-on-demand with single-flight loading, count-budgeted
//!   LRU eviction, readiness aggregation, and close-and-stop-all shutdown.

pub mod backend;
pub mod catalog;
pub mod instance;
pub mod llama;
pub mod manager;
pub mod stub;

// Re-exports
pub use backend::{BackendFactory, BackendKind, ModelBackend, factory_for};
pub use catalog::ModelCatalog;
pub use instance::{GenPermit, Instance};
pub use llama::LlamaServerBackend;
pub use manager::InstanceManager;
pub use stub::StubBackend;
