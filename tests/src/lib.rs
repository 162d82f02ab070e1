//! Test harness for black-box HTTP tests against a running daemon
//!
//! Boots the full router on an ephemeral port with a temporary models
//! directory. No engine binary is configured, so instances run the
//! deterministic stub backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use modeld_core::Settings;
use modeld_gateway::{AppState, Metrics, ShutdownCoordinator, server};
use modeld_manager::{InstanceManager, ModelCatalog};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// One daemon under test.
pub struct TestServer {
    pub addr: SocketAddr,
    pub manager: Arc<InstanceManager>,
    pub coordinator: ShutdownCoordinator,
    pub client: reqwest::Client,
    server: JoinHandle<std::io::Result<()>>,
    _models_dir: TempDir,
}

impl TestServer {
    /// Start a server whose catalog holds `models`, optionally with a
    /// default model id.
    pub async fn start(models: &[&str], default_model: Option<&str>) -> Self {
        Self::start_with(models, default_model, |s| s).await
    }

    /// Like [`start`](Self::start), with a hook to adjust settings.
    pub async fn start_with(
        models: &[&str],
        default_model: Option<&str>,
        tweak: impl FnOnce(Settings) -> Settings,
    ) -> Self {
        let models_dir = tempfile::tempdir().expect("create models dir");
        for model in models {
            std::fs::write(models_dir.path().join(model), b"stub artifact")
                .expect("write artifact");
        }

        let mut settings = Settings::default().with_models_dir(models_dir.path());
        if let Some(id) = default_model {
            settings = settings.with_default_model(id);
        }
        let settings = tweak(settings);

        let catalog = Arc::new(ModelCatalog::scan(&settings.models_dir).expect("scan catalog"));
        let manager = Arc::new(InstanceManager::new(catalog, settings.clone()));
        let coordinator = ShutdownCoordinator::new();
        let state = AppState::new(
            manager.clone(),
            Arc::new(Metrics::new()),
            coordinator.clone(),
            settings,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(server::serve(listener, state));

        Self {
            addr,
            manager,
            coordinator,
            client: reqwest::Client::new(),
            server,
            _models_dir: models_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Drain and wait for the serve loop to exit.
    pub async fn shutdown(self) {
        self.coordinator
            .drain(&self.manager, Duration::from_secs(5))
            .await;
        let _ = self.server.await;
    }
}

/// Split an NDJSON body into parsed lines.
pub fn ndjson_lines(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("valid NDJSON line"))
        .collect()
}
