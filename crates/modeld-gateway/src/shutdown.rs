//! Shutdown coordination
//!
//! One [`ShutdownCoordinator`] is shared by the server loop, the inference
//! pipeline, and the instance manager. Its root cancellation token is the
//! single cancellation path: per-request tokens are children of it, so a
//! termination signal cancels every in-flight generation the same way a
//! client disconnect cancels one.

use std::sync::Arc;
use std::time::Duration;

use modeld_manager::InstanceManager;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{info, warn};

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

struct Inner {
    root: CancellationToken,
    phase: parking_lot::Mutex<Phase>,
}

/// Cheap-to-clone handle over the shared shutdown state.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                root: CancellationToken::new(),
                phase: parking_lot::Mutex::new(Phase::Running),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Per-request token; cancelled individually on disconnect and
    /// collectively on shutdown.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.root.child_token()
    }

    /// Future for the server's graceful-shutdown hook.
    pub fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.inner.root.clone().cancelled_owned()
    }

    /// Enter `Draining`: stop intake and cancel all in-flight work.
    pub fn trigger(&self) {
        let mut phase = self.inner.phase.lock();
        if *phase != Phase::Running {
            return;
        }
        *phase = Phase::Draining;
        drop(phase);
        self.inner.root.cancel();
    }

    /// Full drain: cancel in-flight work, stop every instance within the
    /// grace period, then mark the coordinator `Stopped`.
    pub async fn drain(&self, manager: &InstanceManager, grace: Duration) {
        self.trigger();
        if tokio::time::timeout(grace, manager.shutdown()).await.is_err() {
            warn!(grace = ?grace, "instance shutdown exceeded the grace period");
        }
        *self.inner.phase.lock() = Phase::Stopped;
        info!("shutdown complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler; falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeld_core::Settings;
    use modeld_manager::ModelCatalog;

    #[tokio::test]
    async fn trigger_cancels_children_once() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.is_running());

        let child = coordinator.child_token();
        coordinator.trigger();
        assert!(child.is_cancelled());
        assert_eq!(coordinator.phase(), Phase::Draining);

        // A second trigger is a no-op.
        coordinator.trigger();
        assert_eq!(coordinator.phase(), Phase::Draining);
    }

    #[tokio::test]
    async fn drain_reaches_stopped() {
        let coordinator = ShutdownCoordinator::new();
        let manager = InstanceManager::new(
            Arc::new(ModelCatalog::from_entries(Vec::new())),
            Settings::default(),
        );

        coordinator
            .drain(&manager, Duration::from_secs(1))
            .await;
        assert_eq!(coordinator.phase(), Phase::Stopped);
        assert!(!coordinator.is_running());
    }
}
