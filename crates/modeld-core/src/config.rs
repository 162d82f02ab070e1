//! Runtime configuration
//!
//! [`Settings`] is the fully-resolved configuration the daemon runs with.
//! [`FileSettings`] is the partial form read from an optional config file
//! (toml/json/yaml, selected by extension); only fields present in the file
//! override the corresponding [`Settings`] values. Command-line precedence
//! over file values is applied by the binary, which calls
//! [`Settings::apply_file`] before layering explicit flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ModeldError, Result};

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP listen address.
    pub addr: String,
    /// Directory scanned for `*.gguf` model artifacts at startup.
    pub models_dir: PathBuf,
    /// Model id used when a request omits `model`.
    pub default_model: Option<String>,
    /// Maximum simultaneous loading+ready instances (0 = unlimited).
    pub max_instances: usize,
    /// Queue slots per instance before requests are rejected with 429.
    pub max_queue_depth: usize,
    /// Longest a request may wait for admission before 429.
    pub max_wait: Duration,
    /// Grace period for draining on shutdown.
    pub shutdown_grace: Duration,
    /// Maximum accepted `POST /infer` body size in bytes.
    pub max_body_bytes: usize,
    /// Path to the llama.cpp `llama-server` binary. When unset the
    /// deterministic stub backend serves instead.
    pub llama_bin: Option<PathBuf>,
    /// Context window passed to the engine.
    pub llama_ctx: u32,
    /// Engine threads (0 = auto).
    pub llama_threads: u32,
    /// How long a spawned engine may take to report ready.
    pub startup_timeout: Duration,
    /// Attach a permissive CORS layer to the HTTP surface.
    pub cors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            models_dir: PathBuf::from("~/models/llm"),
            default_model: None,
            max_instances: 2,
            max_queue_depth: 32,
            max_wait: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            max_body_bytes: 1 << 20,
            llama_bin: None,
            llama_ctx: 4096,
            llama_threads: 0,
            startup_timeout: Duration::from_secs(30),
            cors: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    pub fn with_default_model(mut self, id: impl Into<String>) -> Self {
        self.default_model = Some(id.into());
        self
    }

    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = max;
        self
    }

    pub fn with_llama_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.llama_bin = Some(bin.into());
        self
    }

    /// Overlay values present in a config file onto these settings.
    pub fn apply_file(&mut self, file: &FileSettings) {
        if let Some(ref v) = file.addr {
            self.addr = v.clone();
        }
        if let Some(ref v) = file.models_dir {
            self.models_dir = v.clone();
        }
        if let Some(ref v) = file.default_model {
            self.default_model = Some(v.clone());
        }
        if let Some(v) = file.max_instances {
            self.max_instances = v;
        }
        if let Some(v) = file.max_queue_depth {
            self.max_queue_depth = v;
        }
        if let Some(v) = file.max_wait_secs {
            self.max_wait = Duration::from_secs(v);
        }
        if let Some(v) = file.shutdown_grace_secs {
            self.shutdown_grace = Duration::from_secs(v);
        }
        if let Some(v) = file.max_body_bytes {
            self.max_body_bytes = v;
        }
        if let Some(ref v) = file.llama_bin {
            self.llama_bin = Some(v.clone());
        }
        if let Some(v) = file.llama_ctx {
            self.llama_ctx = v;
        }
        if let Some(v) = file.llama_threads {
            self.llama_threads = v;
        }
        if let Some(v) = file.startup_timeout_secs {
            self.startup_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.cors {
            self.cors = v;
        }
    }
}

/// Partial settings decoded from a config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSettings {
    pub addr: Option<String>,
    pub models_dir: Option<PathBuf>,
    pub default_model: Option<String>,
    pub max_instances: Option<usize>,
    pub max_queue_depth: Option<usize>,
    pub max_wait_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub llama_bin: Option<PathBuf>,
    pub llama_ctx: Option<u32>,
    pub llama_threads: Option<u32>,
    pub startup_timeout_secs: Option<u64>,
    pub cors: Option<bool>,
}

impl FileSettings {
    /// Read a config file; the format is chosen by file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| ModeldError::config(format!("{}: {e}", path.display())))?;
        cfg.try_deserialize()
            .map_err(|e| ModeldError::config(format!("{}: {e}", path.display())))
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let home = || std::env::var_os("HOME").map(PathBuf::from);
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
