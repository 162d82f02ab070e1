//! llama.cpp subprocess backend
//!
//! Spawns one `llama-server` process per model artifact, waits for its HTTP
//! surface to come up, then streams `/completion` output back as token
//! events. The process is owned exclusively by this backend: acquisition
//! happens in `start()`, release on every exit path of `stop()` including
//! forced termination after the grace period.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use modeld_core::{BoxTokenStream, GenParams, ModelEntry, ModeldError, Result, Settings, StreamEvent};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval between readiness probes while the engine boots.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);
/// Per-probe HTTP timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long `stop()` waits after SIGTERM before killing the process.
const STOP_GRACE: Duration = Duration::from_secs(2);

struct EngineProcess {
    child: Child,
    base_url: String,
}

/// Backend that drives an external llama.cpp server bound to one artifact.
pub struct LlamaServerBackend {
    entry: ModelEntry,
    settings: Settings,
    http: reqwest::Client,
    proc: tokio::sync::Mutex<Option<EngineProcess>>,
}

impl LlamaServerBackend {
    pub fn new(entry: ModelEntry, settings: Settings) -> Self {
        Self {
            entry,
            settings,
            http: reqwest::Client::new(),
            proc: tokio::sync::Mutex::new(None),
        }
    }

    /// Bind-and-release against port 0 to find a free local port.
    fn pick_free_port() -> Result<u16> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
        Ok(listener.local_addr()?.port())
    }

    fn spawn_engine(&self, bin: &Path, port: u16) -> Result<Child> {
        let mut cmd = Command::new(bin);
        cmd.arg("-m")
            .arg(&self.entry.path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("-c")
            .arg(self.settings.llama_ctx.to_string());
        if self.settings.llama_threads > 0 {
            cmd.arg("-t").arg(self.settings.llama_threads.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            ModeldError::backend(format!("spawn {}: {e}", bin.display()))
        })?;
        Ok(child)
    }

    /// Poll the engine's model listing until it answers or the startup
    /// timeout elapses.
    async fn wait_ready(&self, base_url: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.settings.startup_timeout;
        let probe_url = format!("{base_url}/v1/models");
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(ModeldError::backend(format!(
                    "engine not ready within {:?} at {base_url}",
                    self.settings.startup_timeout
                )));
            }
            let probe = self.http.get(&probe_url).timeout(PROBE_TIMEOUT).send().await;
            if let Ok(resp) = probe {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }
}

#[async_trait]
impl super::ModelBackend for LlamaServerBackend {
    fn model_id(&self) -> &str {
        &self.entry.id
    }

    async fn start(&self) -> Result<()> {
        let bin = self
            .settings
            .llama_bin
            .clone()
            .ok_or_else(|| ModeldError::config("llama_bin is not configured"))?;

        let mut guard = self.proc.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let port = Self::pick_free_port()?;
        let base_url = format!("http://127.0.0.1:{port}");
        let child = self.spawn_engine(&bin, port)?;
        let pid = child.id();
        info!(
            model = %self.entry.id,
            port = port,
            pid = ?pid,
            "engine process spawned"
        );
        *guard = Some(EngineProcess { child, base_url: base_url.clone() });
        drop(guard);

        if let Err(e) = self.wait_ready(&base_url).await {
            // The engine never came up; reclaim the process before failing.
            self.stop().await;
            return Err(e);
        }
        info!(model = %self.entry.id, "engine ready");
        Ok(())
    }

    async fn generate(
        &self,
        prompt: &str,
        params: GenParams,
        cancel: CancellationToken,
    ) -> Result<BoxTokenStream> {
        let base_url = {
            let guard = self.proc.lock().await;
            guard
                .as_ref()
                .map(|p| p.base_url.clone())
                .ok_or_else(|| ModeldError::backend("engine process is not running"))?
        };

        let mut body = serde_json::json!({
            "prompt": prompt,
            "stream": true,
        });
        if let Some(n) = params.max_tokens {
            body["n_predict"] = n.into();
        }
        if let Some(t) = params.temperature {
            body["temperature"] = t.into();
        }
        if let Some(p) = params.top_p {
            body["top_p"] = p.into();
        }
        if !params.stop.is_empty() {
            body["stop"] = serde_json::json!(params.stop);
        }
        if let Some(seed) = params.seed {
            body["seed"] = seed.into();
        }

        let resp = self
            .http
            .post(format!("{base_url}/completion"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ModeldError::backend(format!("engine request: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(ModeldError::backend(format!(
                "engine status {status}: {detail}"
            )));
        }

        let (tx, rx) = mpsc::channel(16);
        let model_id = self.entry.id.clone();
        tokio::spawn(forward_engine_stream(resp, tx, cancel, model_id));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn stop(&self) {
        let Some(mut proc) = self.proc.lock().await.take() else {
            return;
        };
        debug!(model = %self.entry.id, "stopping engine process");

        terminate_gracefully(&proc.child);
        match tokio::time::timeout(STOP_GRACE, proc.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(model = %self.entry.id, %status, "engine process exited");
            }
            Ok(Err(e)) => {
                warn!(model = %self.entry.id, error = %e, "waiting on engine process failed");
            }
            Err(_) => {
                warn!(model = %self.entry.id, "engine ignored termination request; killing");
                let _ = proc.child.kill().await;
            }
        }
    }
}

/// Ask the engine to exit via SIGTERM. `stop()` escalates to SIGKILL when
/// the grace period runs out.
fn terminate_gracefully(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        return;
    }
    // Non-unix (or already-reaped child): nothing graceful to send; the
    // kill in stop() handles it.
    let _ = child;
}

/// Translate the engine's streamed response into token events.
///
/// Accepts both raw NDJSON lines and SSE `data:` framing; llama.cpp builds
/// differ. Cancellation drops the response body, which closes the upstream
/// connection and discards whatever the engine had buffered.
async fn forward_engine_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<Result<StreamEvent>>,
    cancel: CancellationToken,
    model_id: String,
) {
    let mut bytes = resp.bytes_stream();
    let mut buf = String::new();
    let mut content = String::new();
    let mut finish_reason = "stop".to_string();

    'read: loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = bytes.next() => chunk,
        };
        match chunk {
            None => break 'read,
            Some(Err(e)) => {
                warn!(model = %model_id, error = %e, "engine stream read failed");
                let _ = tx
                    .send(Err(ModeldError::backend(format!("engine stream: {e}"))))
                    .await;
                return;
            }
            Some(Ok(data)) => {
                buf.push_str(&String::from_utf8_lossy(&data));
                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    let parsed = parse_engine_line(line.trim());
                    if let Some(token) = parsed.token {
                        content.push_str(&token);
                        if tx.send(Ok(StreamEvent::token(token))).await.is_err() {
                            // Consumer disconnected.
                            return;
                        }
                    }
                    if let Some(reason) = parsed.finish_reason {
                        finish_reason = reason;
                    }
                    if parsed.end_of_stream {
                        break 'read;
                    }
                }
            }
        }
    }

    let _ = tx.send(Ok(StreamEvent::done(content, finish_reason))).await;
}

#[derive(Debug, Default, PartialEq)]
struct EngineLine {
    token: Option<String>,
    finish_reason: Option<String>,
    end_of_stream: bool,
}

/// Parse one line of engine output.
fn parse_engine_line(line: &str) -> EngineLine {
    let mut out = EngineLine::default();
    if line.is_empty() {
        return out;
    }
    // SSE framing: strip the data prefix, honor the end marker.
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => line,
    };
    if payload == "[DONE]" {
        out.end_of_stream = true;
        return out;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
        debug!(line = %payload, "unparseable engine line skipped");
        return out;
    };
    // Token text appears under different keys across engine builds.
    for key in ["token", "content"] {
        if let Some(tok) = value.get(key).and_then(|v| v.as_str()) {
            if !tok.is_empty() {
                out.token = Some(tok.to_string());
            }
            break;
        }
    }
    if value.get("stop").and_then(|v| v.as_bool()) == Some(true) {
        out.end_of_stream = true;
    }
    if let Some(reason) = value.get("finish_reason").and_then(|v| v.as_str()) {
        if !reason.is_empty() {
            out.finish_reason = Some(reason.to_string());
        }
    }
    out
}
