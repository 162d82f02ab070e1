//! # modeld-core
//!
//! Shared foundation for the modeld daemon: the wire/domain types exchanged
//! between the HTTP gateway and the instance manager, the error taxonomy that
//! maps onto HTTP status codes, and runtime configuration.
//!
//! Nothing in this crate performs I/O beyond reading a configuration file;
//! the heavier machinery lives in `modeld-manager` and `modeld-gateway`.

pub mod config;
pub mod error;
pub mod types;

// Re-exports
pub use config::{FileSettings, Settings};
pub use error::{ModeldError, Result};
pub use types::{
    BoxTokenStream, GenParams, InferRequest, InstanceState, InstanceStatus, ModelEntry,
    ModelsResponse, StatusResponse, StreamEvent, TokenStream,
};
